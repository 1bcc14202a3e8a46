//! Multi-member group fixture.
//!
//! Every member gets its own [`MemoryStore`] (nothing is shared between
//! members except the simulated environment), and the cluster plays the role
//! of the transport by handing distributions and envelopes from one member
//! to the others.

use chorus_crypto::{ChainType, DistributionMessage, GroupMessageEnvelope, RustCryptoProvider};
use chorus_session::{GroupSessionManager, Identity, MemoryStore, SessionConfig, SessionError};

use crate::SimEnv;

/// Session manager as used inside a [`GroupCluster`].
pub type ClusterManager = GroupSessionManager<MemoryStore, RustCryptoProvider, SimEnv>;

/// `count` distinct, well-formed EVM identities.
pub fn evm_identities(count: usize) -> Vec<Identity> {
    (1..=count).map(|i| Identity::new(format!("0x{i:040x}"), ChainType::Evm)).collect()
}

/// Simulated group of members sharing one deterministic environment.
pub struct GroupCluster {
    env: SimEnv,
    members: Vec<ClusterManager>,
}

impl GroupCluster {
    /// Create one manager per identity with the default configuration.
    pub fn new(seed: u64, identities: Vec<Identity>) -> Result<Self, SessionError> {
        Self::with_config(seed, identities, &SessionConfig::default())
    }

    /// Create one manager per identity sharing `config`.
    pub fn with_config(
        seed: u64,
        identities: Vec<Identity>,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let env = SimEnv::with_seed(seed);
        let members = identities
            .into_iter()
            .map(|identity| {
                GroupSessionManager::new(
                    identity,
                    MemoryStore::new(),
                    RustCryptoProvider::new(),
                    env.clone(),
                    config.clone(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { env, members })
    }

    /// Shared simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// All members in creation order.
    pub fn members(&self) -> &[ClusterManager] {
        &self.members
    }

    /// Member at `index`.
    pub fn member(&self, index: usize) -> &ClusterManager {
        &self.members[index]
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the cluster has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Form a group where every member holds every other member's key.
    ///
    /// Member 0 creates the group with everyone else on the roster, each
    /// other member joins from the creator's distribution, and once everyone
    /// holds a session each joiner's distribution is delivered to all other
    /// members.
    ///
    /// # Panics
    ///
    /// Panics if the cluster is empty.
    pub async fn form_group(&self, group_name: &str) -> Result<String, SessionError> {
        let creator = &self.members[0];
        let joiners = &self.members[1..];

        let invitees = joiners.iter().map(|m| m.identity().clone()).collect();
        let created = creator.create_group(group_name, invitees).await?;
        let group_id = created.session.group_id().to_string();

        let mut joined = Vec::with_capacity(joiners.len());
        for joiner in joiners {
            joined.push(joiner.join_group(&group_id, group_name, &created.distribution).await?);
        }
        for (offset, join) in joined.iter().enumerate() {
            self.broadcast_distribution(offset + 1, &join.my_distribution).await?;
        }

        tracing::debug!(%group_id, members = self.members.len(), "formed cluster group");

        Ok(group_id)
    }

    /// Deliver `distribution` from member `from` to every other member.
    pub async fn broadcast_distribution(
        &self,
        from: usize,
        distribution: &DistributionMessage,
    ) -> Result<(), SessionError> {
        for (index, member) in self.members.iter().enumerate() {
            if index != from {
                member.process_distribution(distribution).await?;
            }
        }
        Ok(())
    }

    /// Send `plaintext` from member `from` and deliver it to every other
    /// member, returning each receiver's result in member order.
    pub async fn broadcast_message(
        &self,
        from: usize,
        group_id: &str,
        plaintext: &[u8],
    ) -> Result<Vec<Result<Vec<u8>, SessionError>>, SessionError> {
        let envelope = self.members[from].send_message(group_id, plaintext).await?;
        Ok(self.deliver(from, &envelope).await)
    }

    /// Deliver an envelope sent by member `from` to every other member.
    pub async fn deliver(
        &self,
        from: usize,
        envelope: &GroupMessageEnvelope,
    ) -> Vec<Result<Vec<u8>, SessionError>> {
        let mut results = Vec::with_capacity(self.members.len().saturating_sub(1));
        for (index, member) in self.members.iter().enumerate() {
            if index != from {
                results.push(member.receive_message(envelope).await);
            }
        }
        results
    }
}

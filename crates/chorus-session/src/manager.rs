//! Group lifecycle orchestration.
//!
//! [`GroupSessionManager`] ties the synchronous sender keys core to an async
//! [`GroupSessionStore`]. Every operation follows the same shape:
//!
//! ```text
//! lock(group) ─► load ─► crypto (sync) ─► bookkeeping ─► save ─► unlock
//! ```
//!
//! The per-group lock is held across store I/O, so two operations on the
//! same group never interleave their load/save pairs. Different groups use
//! different locks and proceed concurrently. A lock entry lives only while
//! some operation holds or awaits it.

use std::{collections::HashMap, sync::Arc};

use chorus_crypto::{
    CryptoProvider, DistributionMessage, Environment, GroupMessageBuilder, GroupMessageEnvelope,
    RustCryptoProvider, SenderKeyDistributionBuilder, SenderKeyError, SenderKeyRatchet, SystemEnv,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    config::SessionConfig,
    error::SessionError,
    session::{GroupMember, GroupSession, Identity, KeyInstall, MemberRole, MemberSenderKey},
    store::GroupSessionStore,
};

/// Result of [`GroupSessionManager::create_group`].
#[derive(Debug, Clone)]
pub struct CreatedGroup {
    /// The persisted session
    pub session: GroupSession,
    /// Our distribution, to be broadcast to every invitee
    pub distribution: DistributionMessage,
}

/// Result of [`GroupSessionManager::join_group`].
#[derive(Debug, Clone)]
pub struct JoinedGroup {
    /// The persisted session
    pub session: GroupSession,
    /// Our distribution, to be broadcast back to the group
    pub my_distribution: DistributionMessage,
}

/// Group session manager for one local identity.
///
/// Generic over the store, the primitive suite and the environment so that
/// simulations can run it deterministically.
pub struct GroupSessionManager<S, P = RustCryptoProvider, E = SystemEnv> {
    identity: Identity,
    store: S,
    ratchet: SenderKeyRatchet<P, E>,
    distributions: SenderKeyDistributionBuilder<P, E>,
    messages: GroupMessageBuilder<P, E>,
    env: E,
    config: SessionConfig,
    group_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S, P, E> GroupSessionManager<S, P, E>
where
    S: GroupSessionStore,
    P: CryptoProvider,
    E: Environment,
{
    /// Create a manager for `identity`.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if the identity's address does not match its chain
    ///   type
    pub fn new(
        identity: Identity,
        store: S,
        provider: P,
        env: E,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        identity.chain_type.validate_address(&identity.address)?;

        let ratchet =
            SenderKeyRatchet::new(provider.clone(), env.clone()).with_max_skip(config.max_skip);

        Ok(Self {
            identity,
            store,
            distributions: SenderKeyDistributionBuilder::new(provider, env.clone()),
            messages: GroupMessageBuilder::new(ratchet.clone()),
            ratchet,
            env,
            config,
            group_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a new group with ourselves as admin.
    ///
    /// `members` are recorded on the roster (duplicates and our own address
    /// are skipped). The returned distribution is the same for every
    /// invitee.
    pub async fn create_group(
        &self,
        group_name: &str,
        members: Vec<Identity>,
    ) -> Result<CreatedGroup, SessionError> {
        for member in &members {
            member.chain_type.validate_address(&member.address)?;
        }

        let group_id = self.env.random_id();
        let _guard = self.lock_group(&group_id).await;
        let now = self.env.wall_clock_millis();

        let my_sender_key =
            self.ratchet.create_sender_key_state(&self.identity.address, self.identity.chain_type)?;

        let mut session = GroupSession::new(
            group_id.clone(),
            group_name.to_string(),
            my_sender_key,
            vec![GroupMember::new(&self.identity, MemberRole::Admin, now)],
            now,
        );
        for member in members.iter().filter(|m| m.address != self.identity.address) {
            session.add_member(GroupMember::new(member, MemberRole::Member, now));
        }

        let distribution = self.distributions.create_distribution(&group_id, session.my_sender_key())?;
        self.save(&mut session).await?;

        tracing::info!(
            %group_id,
            members = session.members().len(),
            key_id = session.my_sender_key().key_id(),
            "created group"
        );

        Ok(CreatedGroup { session, distribution })
    }

    /// Join `group_id` from the creator's distribution.
    ///
    /// Loads the existing session or creates one with a fresh sender key,
    /// stores the creator's public state and records the creator as admin.
    pub async fn join_group(
        &self,
        group_id: &str,
        group_name: &str,
        creator_distribution: &DistributionMessage,
    ) -> Result<JoinedGroup, SessionError> {
        self.verify(creator_distribution)?;
        if creator_distribution.group_id != group_id {
            return Err(SessionError::GroupMismatch {
                expected: group_id.to_string(),
                actual: creator_distribution.group_id.clone(),
            });
        }

        let _guard = self.lock_group(group_id).await;
        let now = self.env.wall_clock_millis();

        let mut session = match self.store.load_group_session(group_id).await? {
            Some(session) => session,
            None => {
                let my_sender_key = self
                    .ratchet
                    .create_sender_key_state(&self.identity.address, self.identity.chain_type)?;
                GroupSession::new(
                    group_id.to_string(),
                    group_name.to_string(),
                    my_sender_key,
                    vec![GroupMember::new(&self.identity, MemberRole::Member, now)],
                    now,
                )
            },
        };

        if creator_distribution.sender_address != self.identity.address {
            self.apply_distribution(&mut session, creator_distribution, now)?;
            session.promote_member(&creator_distribution.sender_address, MemberRole::Admin);
        }

        let my_distribution = self.distributions.create_distribution(group_id, session.my_sender_key())?;
        self.save(&mut session).await?;

        tracing::info!(%group_id, creator = %creator_distribution.sender_address, "joined group");

        Ok(JoinedGroup { session, my_distribution })
    }

    /// Store a peer's distribution in the session it names.
    ///
    /// Our own echoed distributions are ignored. A new key for a known sender
    /// retires that sender's older keys; unknown senders join the roster.
    /// Distributions from removed members are rejected until they are added
    /// again.
    pub async fn process_distribution(
        &self,
        distribution: &DistributionMessage,
    ) -> Result<(), SessionError> {
        self.verify(distribution)?;

        let group_id = distribution.group_id.as_str();
        let _guard = self.lock_group(group_id).await;
        let mut session = self.load(group_id).await?;

        if distribution.sender_address == self.identity.address {
            tracing::debug!(%group_id, key_id = distribution.key_id, "ignoring own distribution");
            return Ok(());
        }

        let now = self.env.wall_clock_millis();
        self.apply_distribution(&mut session, distribution, now)?;
        self.save(&mut session).await?;

        tracing::debug!(
            %group_id,
            sender = %distribution.sender_address,
            key_id = distribution.key_id,
            iteration = distribution.iteration,
            "processed distribution"
        );

        Ok(())
    }

    /// Encrypt and sign `plaintext` for `group_id` with our sender key.
    pub async fn send_message(
        &self,
        group_id: &str,
        plaintext: &[u8],
    ) -> Result<GroupMessageEnvelope, SessionError> {
        let _guard = self.lock_group(group_id).await;
        let mut session = self.load(group_id).await?;

        let envelope = self.messages.build_message(group_id, plaintext, session.my_sender_key_mut())?;
        session.touch(self.env.wall_clock_millis());
        self.save(&mut session).await?;

        tracing::debug!(
            %group_id,
            message_id = %envelope.message_id,
            iteration = envelope.iteration,
            "sent group message"
        );

        Ok(envelope)
    }

    /// Verify and decrypt an envelope from a peer.
    ///
    /// The advanced peer state is persisted on success. A failure that
    /// consumed a cached skipped key is persisted too, so the key cannot be
    /// retried after a restart.
    pub async fn receive_message(
        &self,
        envelope: &GroupMessageEnvelope,
    ) -> Result<Vec<u8>, SessionError> {
        let group_id = envelope.group_id.as_str();
        let _guard = self.lock_group(group_id).await;
        let mut session = self.load(group_id).await?;
        let now = self.env.wall_clock_millis();
        let ttl_millis = self.config.retired_key_ttl_millis();

        let (result, cache_changed) = {
            let entry = session
                .member_sender_key_mut(&envelope.sender_address, envelope.key_id)
                .ok_or_else(|| SessionError::UnknownSender {
                    group_id: group_id.to_string(),
                    sender_address: envelope.sender_address.clone(),
                    key_id: envelope.key_id,
                })
                .inspect_err(|_| {
                    tracing::warn!(
                        %group_id,
                        sender = %envelope.sender_address,
                        key_id = envelope.key_id,
                        "message from unknown sender key"
                    );
                })?;

            if entry.is_expired(now, ttl_millis) {
                return Err(SessionError::SenderKeyExpired {
                    sender_address: envelope.sender_address.clone(),
                    key_id: envelope.key_id,
                });
            }

            let cached_before = entry.state.cached_key_count();
            let result = self.messages.decrypt_message(envelope, &mut entry.state);
            (result, entry.state.cached_key_count() != cached_before)
        };

        match result {
            Ok(plaintext) => {
                session.touch(now);
                self.save(&mut session).await?;

                tracing::debug!(
                    %group_id,
                    message_id = %envelope.message_id,
                    sender = %envelope.sender_address,
                    iteration = envelope.iteration,
                    "received group message"
                );
                Ok(plaintext)
            },
            Err(err) => {
                if cache_changed {
                    self.save(&mut session).await?;
                }

                tracing::warn!(
                    %group_id,
                    message_id = %envelope.message_id,
                    sender = %envelope.sender_address,
                    error = %err,
                    "rejected group message"
                );
                Err(err.into())
            },
        }
    }

    /// Replace our sender key for `group_id` and return its distribution.
    pub async fn rotate_sender_key(
        &self,
        group_id: &str,
    ) -> Result<DistributionMessage, SessionError> {
        let _guard = self.lock_group(group_id).await;
        let mut session = self.load(group_id).await?;

        let distribution = self.rotate(&mut session)?;
        self.save(&mut session).await?;

        Ok(distribution)
    }

    /// Record a new member and return our current distribution for them.
    pub async fn add_member(
        &self,
        group_id: &str,
        member: Identity,
    ) -> Result<DistributionMessage, SessionError> {
        member.chain_type.validate_address(&member.address)?;

        let _guard = self.lock_group(group_id).await;
        let mut session = self.load(group_id).await?;
        let now = self.env.wall_clock_millis();

        if !session.add_member(GroupMember::new(&member, MemberRole::Member, now)) {
            return Err(SessionError::MemberExists {
                group_id: group_id.to_string(),
                address: member.address,
            });
        }

        let distribution = self.distributions.create_distribution(group_id, session.my_sender_key())?;
        self.save(&mut session).await?;

        tracing::info!(%group_id, member = %member.address, "added member");

        Ok(distribution)
    }

    /// Drop a member and their sender keys.
    ///
    /// With `rotate_on_remove`, our sender key is rotated so the removed
    /// member cannot read later messages; the new distribution is returned
    /// for the remaining members.
    pub async fn remove_member(
        &self,
        group_id: &str,
        address: &str,
    ) -> Result<Option<DistributionMessage>, SessionError> {
        if address == self.identity.address {
            return Err(SessionError::CannotRemoveSelf { group_id: group_id.to_string() });
        }

        let _guard = self.lock_group(group_id).await;
        let mut session = self.load(group_id).await?;

        if session.remove_member(address).is_none() {
            return Err(SessionError::MemberNotFound {
                group_id: group_id.to_string(),
                address: address.to_string(),
            });
        }

        let distribution =
            if self.config.rotate_on_remove { Some(self.rotate(&mut session)?) } else { None };
        self.save(&mut session).await?;

        tracing::info!(%group_id, member = %address, rotated = distribution.is_some(), "removed member");

        Ok(distribution)
    }

    /// Membership roster of `group_id`.
    pub async fn get_members(&self, group_id: &str) -> Result<Vec<GroupMember>, SessionError> {
        let _guard = self.lock_group(group_id).await;
        Ok(self.load(group_id).await?.members().to_vec())
    }

    /// Session for `group_id`, if any.
    pub async fn get_session(&self, group_id: &str) -> Result<Option<GroupSession>, SessionError> {
        let _guard = self.lock_group(group_id).await;
        Ok(self.store.load_group_session(group_id).await?)
    }

    /// All stored sessions.
    pub async fn list_sessions(&self) -> Result<Vec<GroupSession>, SessionError> {
        Ok(self.store.list_group_sessions().await?)
    }

    /// Delete the session for `group_id`. Returns whether one existed.
    pub async fn delete_session(&self, group_id: &str) -> Result<bool, SessionError> {
        let deleted = {
            let _guard = self.lock_group(group_id).await;
            self.store.delete_group_session(group_id).await?
        };
        prune_idle_locks(&mut *self.group_locks.lock().await);

        if deleted {
            tracing::info!(%group_id, "deleted session");
        }
        Ok(deleted)
    }

    async fn lock_group(&self, group_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.group_locks.lock().await;
            prune_idle_locks(&mut locks);
            Arc::clone(locks.entry(group_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn load(&self, group_id: &str) -> Result<GroupSession, SessionError> {
        self.store
            .load_group_session(group_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound { group_id: group_id.to_string() })
    }

    /// Purge expired retired keys, then persist.
    async fn save(&self, session: &mut GroupSession) -> Result<(), SessionError> {
        let now = self.env.wall_clock_millis();
        let purged = session.purge_expired_keys(now, self.config.retired_key_ttl_millis());
        if purged > 0 {
            tracing::debug!(group_id = %session.group_id(), purged, "purged expired sender keys");
        }

        self.store.save_group_session(session).await?;
        Ok(())
    }

    fn verify(&self, distribution: &DistributionMessage) -> Result<(), SessionError> {
        if self.distributions.verify_distribution(distribution) {
            return Ok(());
        }

        tracing::warn!(
            group_id = %distribution.group_id,
            sender = %distribution.sender_address,
            key_id = distribution.key_id,
            "rejected distribution with invalid signature"
        );
        Err(SenderKeyError::InvalidSignature.into())
    }

    fn rotate(&self, session: &mut GroupSession) -> Result<DistributionMessage, SessionError> {
        let previous_key_id = session.my_sender_key().key_id();
        let rotated = self.ratchet.rotate_sender_key_state(session.my_sender_key())?;
        let distribution = self.distributions.create_distribution(session.group_id(), &rotated)?;
        session.replace_my_sender_key(rotated);

        tracing::info!(
            group_id = %session.group_id(),
            previous_key_id,
            key_id = distribution.key_id,
            "rotated sender key"
        );

        Ok(distribution)
    }

    /// Insert or advance a verified peer distribution in `session`.
    ///
    /// - A known key is only replaced by a snapshot further along its chain;
    ///   an equal iteration is a no-op that keeps cached skipped keys
    /// - A known key re-sent with a different signing key is rejected
    /// - A new key retires the sender's keys with an earlier signed timestamp,
    ///   or is stored retired if a later one is already known
    /// - Removed members are rejected
    fn apply_distribution(
        &self,
        session: &mut GroupSession,
        distribution: &DistributionMessage,
        now: u64,
    ) -> Result<(), SessionError> {
        let sender = distribution.sender_address.as_str();

        if session.is_removed(sender) {
            tracing::warn!(
                group_id = %distribution.group_id,
                %sender,
                key_id = distribution.key_id,
                "rejected distribution from removed member"
            );
            return Err(SessionError::MemberRemoved {
                group_id: distribution.group_id.clone(),
                address: sender.to_string(),
            });
        }

        if let Some(existing) = session.member_sender_key(sender, distribution.key_id) {
            if existing.state.public_signing_key() != distribution.public_signing_key.as_slice() {
                tracing::warn!(
                    group_id = %distribution.group_id,
                    %sender,
                    key_id = distribution.key_id,
                    "distribution reuses a known key id with a different signing key"
                );
                return Err(SenderKeyError::InvalidSignature.into());
            }

            let current = existing.state.iteration();
            if distribution.iteration < current {
                return Err(SessionError::StaleDistribution {
                    sender_address: sender.to_string(),
                    key_id: distribution.key_id,
                    received: distribution.iteration,
                    current,
                });
            }
            if distribution.iteration == current {
                return Ok(());
            }

            let retired_at = existing.retired_at;
            let distributed_at = existing.distributed_at.max(distribution.timestamp);
            let state = self.distributions.create_sender_key_state_from_distribution(distribution)?;
            let mut entry = MemberSenderKey::new(state, distributed_at, now);
            entry.retired_at = retired_at;
            session.upsert_member_sender_key(entry);
            return Ok(());
        }

        let state = self.distributions.create_sender_key_state_from_distribution(distribution)?;
        let entry = MemberSenderKey::new(state, distribution.timestamp, now);

        match session.install_sender_key(entry, now, self.config.max_retired_keys_per_sender) {
            KeyInstall::Current { retired: 0 } => {},
            KeyInstall::Current { retired } => {
                tracing::info!(
                    group_id = %distribution.group_id,
                    %sender,
                    key_id = distribution.key_id,
                    retired,
                    "sender rotated key"
                );
            },
            KeyInstall::Superseded => {
                tracing::info!(
                    group_id = %distribution.group_id,
                    %sender,
                    key_id = distribution.key_id,
                    timestamp = distribution.timestamp,
                    "stored late distribution as retired"
                );
            },
        }

        let joined = session.add_member(GroupMember {
            address: sender.to_string(),
            chain_type: distribution.sender_chain_type,
            role: MemberRole::Member,
            joined_at: now,
        });
        if joined {
            tracing::info!(group_id = %distribution.group_id, member = %sender, "added member from distribution");
        }

        Ok(())
    }
}

/// Drop lock entries no operation holds or awaits.
fn prune_idle_locks(locks: &mut HashMap<String, Arc<Mutex<()>>>) {
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chorus_crypto::ChainType;

    use super::*;
    use crate::store::MemoryStore;

    const ALICE: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
    const BOB: &str = "0x000000000000000000000000000000000000b0b0";
    const CAROL: &str = "cosmos1vqpjljwsynsn58dugz0w8ut7kun7t8ls2qkmsq";

    type Manager = GroupSessionManager<MemoryStore, RustCryptoProvider, SystemEnv>;

    fn manager(address: &str, chain_type: ChainType) -> Manager {
        manager_with(address, chain_type, SessionConfig::default())
    }

    fn manager_with(address: &str, chain_type: ChainType, config: SessionConfig) -> Manager {
        GroupSessionManager::new(
            Identity::new(address, chain_type),
            MemoryStore::new(),
            RustCryptoProvider::new(),
            SystemEnv::new(),
            config,
        )
        .unwrap()
    }

    /// Alice creates a group and Bob joins it; both have each other's keys.
    async fn two_member_group(alice: &Manager, bob: &Manager) -> String {
        let created = alice
            .create_group("pair", vec![Identity::new(BOB, ChainType::Evm)])
            .await
            .unwrap();
        let group_id = created.session.group_id().to_string();

        let joined = bob.join_group(&group_id, "pair", &created.distribution).await.unwrap();
        alice.process_distribution(&joined.my_distribution).await.unwrap();

        group_id
    }

    #[tokio::test]
    async fn rejects_malformed_identity() {
        let result = GroupSessionManager::new(
            Identity::new("not-an-address", ChainType::Evm),
            MemoryStore::new(),
            RustCryptoProvider::new(),
            SystemEnv::new(),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(SessionError::Crypto(SenderKeyError::InvalidAddress { .. }))));
    }

    #[tokio::test]
    async fn create_group_records_roster() {
        let alice = manager(ALICE, ChainType::Evm);

        let created = alice
            .create_group(
                "friends",
                vec![
                    Identity::new(BOB, ChainType::Evm),
                    Identity::new(BOB, ChainType::Evm),
                    Identity::new(ALICE, ChainType::Evm),
                ],
            )
            .await
            .unwrap();

        let members = created.session.members();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].role, MemberRole::Admin);
        assert_eq!(members[1].role, MemberRole::Member);
        assert_eq!(created.distribution.group_id, created.session.group_id());
        assert_eq!(created.session.group_id().len(), 32);
        assert_eq!(alice.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_flows_both_ways() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let group_id = two_member_group(&alice, &bob).await;

        let envelope = alice.send_message(&group_id, b"hi bob").await.unwrap();
        assert_eq!(bob.receive_message(&envelope).await.unwrap(), b"hi bob");

        let reply = bob.send_message(&group_id, b"hi alice").await.unwrap();
        assert_eq!(alice.receive_message(&reply).await.unwrap(), b"hi alice");

        let members = bob.get_members(&group_id).await.unwrap();
        assert_eq!(members.iter().find(|m| m.address == ALICE).unwrap().role, MemberRole::Admin);
    }

    #[tokio::test]
    async fn join_rejects_distribution_for_other_group() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();

        let result = bob.join_group("some-other-group", "g", &created.distribution).await;
        assert!(matches!(result, Err(SessionError::GroupMismatch { .. })));
    }

    #[tokio::test]
    async fn forged_distribution_is_rejected() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let mut created = alice.create_group("g", vec![]).await.unwrap();
        created.distribution.key_id = created.distribution.key_id.wrapping_add(1);

        let group_id = created.session.group_id().to_string();
        let result = bob.join_group(&group_id, "g", &created.distribution).await;

        assert!(matches!(result, Err(SessionError::Crypto(SenderKeyError::InvalidSignature))));
        assert!(bob.get_session(&group_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn own_distribution_echo_is_ignored() {
        let alice = manager(ALICE, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();

        alice.process_distribution(&created.distribution).await.unwrap();

        let session = alice.get_session(created.session.group_id()).await.unwrap().unwrap();
        assert_eq!(session.member_sender_key_count(), 0);
    }

    #[tokio::test]
    async fn distribution_for_unknown_group_fails() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();

        let result = bob.process_distribution(&created.distribution).await;
        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn stale_distribution_is_rejected() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();
        let group_id = created.session.group_id().to_string();
        bob.join_group(&group_id, "g", &created.distribution).await.unwrap();

        let envelope = alice.send_message(&group_id, b"advance").await.unwrap();
        bob.receive_message(&envelope).await.unwrap();

        let result = bob.process_distribution(&created.distribution).await;
        assert!(matches!(
            result,
            Err(SessionError::StaleDistribution { received: 0, current: 1, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_sender_requests_redistribution() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();
        let group_id = created.session.group_id().to_string();
        bob.join_group(&group_id, "g", &created.distribution).await.unwrap();

        alice.rotate_sender_key(&group_id).await.unwrap();
        let envelope = alice.send_message(&group_id, b"new key").await.unwrap();

        let err = bob.receive_message(&envelope).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSender { .. }));
        assert!(err.should_request_redistribution());
    }

    #[tokio::test]
    async fn rotation_retires_previous_peer_key() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();
        let group_id = created.session.group_id().to_string();
        bob.join_group(&group_id, "g", &created.distribution).await.unwrap();

        let in_flight = alice.send_message(&group_id, b"before rotation").await.unwrap();
        let rotated = alice.rotate_sender_key(&group_id).await.unwrap();
        assert_ne!(rotated.key_id, created.distribution.key_id);

        bob.process_distribution(&rotated).await.unwrap();
        let after = alice.send_message(&group_id, b"after rotation").await.unwrap();

        assert_eq!(bob.receive_message(&after).await.unwrap(), b"after rotation");
        assert_eq!(bob.receive_message(&in_flight).await.unwrap(), b"before rotation");

        let session = bob.get_session(&group_id).await.unwrap().unwrap();
        let old = session.member_sender_key(ALICE, created.distribution.key_id).unwrap();
        assert!(old.is_retired());
        assert!(!session.member_sender_key(ALICE, rotated.key_id).unwrap().is_retired());
    }

    #[tokio::test]
    async fn zero_ttl_purges_retired_key_on_rotation() {
        let config = SessionConfig { retired_key_ttl: Duration::ZERO, ..SessionConfig::default() };
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager_with(BOB, ChainType::Evm, config);
        let created = alice.create_group("g", vec![]).await.unwrap();
        let group_id = created.session.group_id().to_string();
        bob.join_group(&group_id, "g", &created.distribution).await.unwrap();

        let in_flight = alice.send_message(&group_id, b"late").await.unwrap();
        let rotated = alice.rotate_sender_key(&group_id).await.unwrap();
        bob.process_distribution(&rotated).await.unwrap();

        let session = bob.get_session(&group_id).await.unwrap().unwrap();
        assert!(session.member_sender_key(ALICE, created.distribution.key_id).is_none());

        let result = bob.receive_message(&in_flight).await;
        let old_key_id = created.distribution.key_id;
        assert!(matches!(
            result,
            Err(SessionError::UnknownSender { key_id, .. }) if key_id == old_key_id
        ));
    }

    #[tokio::test]
    async fn removed_member_distribution_is_rejected() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice
            .create_group("pair", vec![Identity::new(BOB, ChainType::Evm)])
            .await
            .unwrap();
        let group_id = created.session.group_id().to_string();
        let joined = bob.join_group(&group_id, "pair", &created.distribution).await.unwrap();
        alice.process_distribution(&joined.my_distribution).await.unwrap();

        alice.remove_member(&group_id, BOB).await.unwrap();

        let replayed = alice.process_distribution(&joined.my_distribution).await;
        assert!(matches!(replayed, Err(SessionError::MemberRemoved { .. })));
        let rotated = bob.rotate_sender_key(&group_id).await.unwrap();
        let fresh = alice.process_distribution(&rotated).await;
        assert!(matches!(fresh, Err(SessionError::MemberRemoved { .. })));

        let session = alice.get_session(&group_id).await.unwrap().unwrap();
        assert_eq!(session.members().len(), 1);
        assert!(session.is_removed(BOB));
        assert_eq!(session.member_sender_key_count(), 0);

        let envelope = bob.send_message(&group_id, b"i am back").await.unwrap();
        let result = alice.receive_message(&envelope).await;
        assert!(matches!(result, Err(SessionError::UnknownSender { .. })));
    }

    #[tokio::test]
    async fn re_added_member_is_accepted_again() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let created = alice
            .create_group("pair", vec![Identity::new(BOB, ChainType::Evm)])
            .await
            .unwrap();
        let group_id = created.session.group_id().to_string();
        let joined = bob.join_group(&group_id, "pair", &created.distribution).await.unwrap();

        alice.remove_member(&group_id, BOB).await.unwrap();
        alice.add_member(&group_id, Identity::new(BOB, ChainType::Evm)).await.unwrap();
        alice.process_distribution(&joined.my_distribution).await.unwrap();

        let envelope = bob.send_message(&group_id, b"welcome back").await.unwrap();
        assert_eq!(alice.receive_message(&envelope).await.unwrap(), b"welcome back");
        assert!(!alice.get_session(&group_id).await.unwrap().unwrap().is_removed(BOB));
    }

    #[tokio::test]
    async fn lock_table_tracks_only_active_groups() {
        let alice = manager(ALICE, ChainType::Evm);
        let bob = manager(BOB, ChainType::Evm);
        let group_id = two_member_group(&alice, &bob).await;
        let envelope = alice.send_message(&group_id, b"real").await.unwrap();

        for n in 0..1_000 {
            let mut bogus = envelope.clone();
            bogus.group_id = format!("bogus-{n}");
            let result = bob.receive_message(&bogus).await;
            assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
        }
        assert!(bob.group_locks.lock().await.len() <= 1);

        assert_eq!(bob.receive_message(&envelope).await.unwrap(), b"real");
        assert!(bob.delete_session(&group_id).await.unwrap());
        assert!(bob.group_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn add_and_remove_members() {
        let alice = manager(ALICE, ChainType::Evm);
        let created = alice.create_group("g", vec![]).await.unwrap();
        let group_id = created.session.group_id().to_string();
        let carol = Identity::new(CAROL, ChainType::Cosmos);

        let distribution = alice.add_member(&group_id, carol.clone()).await.unwrap();
        assert_eq!(distribution.key_id, created.distribution.key_id);

        let duplicate = alice.add_member(&group_id, carol).await;
        assert!(matches!(duplicate, Err(SessionError::MemberExists { .. })));

        let rotated = alice.remove_member(&group_id, CAROL).await.unwrap().unwrap();
        assert_ne!(rotated.key_id, created.distribution.key_id);
        assert_eq!(alice.get_members(&group_id).await.unwrap().len(), 1);

        let missing = alice.remove_member(&group_id, CAROL).await;
        assert!(matches!(missing, Err(SessionError::MemberNotFound { .. })));

        let myself = alice.remove_member(&group_id, ALICE).await;
        assert!(matches!(myself, Err(SessionError::CannotRemoveSelf { .. })));
    }

    #[tokio::test]
    async fn remove_without_rotation() {
        let config = SessionConfig { rotate_on_remove: false, ..SessionConfig::default() };
        let alice = manager_with(ALICE, ChainType::Evm, config);
        let created =
            alice.create_group("g", vec![Identity::new(BOB, ChainType::Evm)]).await.unwrap();
        let group_id = created.session.group_id().to_string();

        assert!(alice.remove_member(&group_id, BOB).await.unwrap().is_none());

        let session = alice.get_session(&group_id).await.unwrap().unwrap();
        assert_eq!(session.my_sender_key().key_id(), created.distribution.key_id);
    }

    #[tokio::test]
    async fn delete_session_leaves_others() {
        let alice = manager(ALICE, ChainType::Evm);
        let first = alice.create_group("first", vec![]).await.unwrap();
        let second = alice.create_group("second", vec![]).await.unwrap();

        assert!(alice.delete_session(first.session.group_id()).await.unwrap());
        assert!(!alice.delete_session(first.session.group_id()).await.unwrap());

        let remaining = alice.list_sessions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].group_name(), "second");
        assert_eq!(remaining[0].group_id(), second.session.group_id());
    }

    #[tokio::test]
    async fn send_to_unknown_group_fails() {
        let alice = manager(ALICE, ChainType::Evm);
        let result = alice.send_message("missing", b"x").await;
        assert!(matches!(result, Err(SessionError::SessionNotFound { .. })));
    }
}

//! Per-group session state.
//!
//! A [`GroupSession`] is everything one local identity knows about one group:
//! its own private sender key, the public sender keys of its peers and the
//! membership roster. It is a plain value; persistence and locking belong to
//! the manager.

use std::collections::{BTreeMap, BTreeSet};

use chorus_crypto::{ChainType, SenderKeyState};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Address plus chain family identifying a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Blockchain address
    pub address: String,
    /// Chain family of the address
    pub chain_type: ChainType,
}

impl Identity {
    /// Create an identity.
    pub fn new(address: impl Into<String>, chain_type: ChainType) -> Self {
        Self { address: address.into(), chain_type }
    }
}

/// Role of a member within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Group creator
    Admin,
    /// Regular member
    Member,
}

/// Roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    /// Member address
    pub address: String,
    /// Chain family of the address
    pub chain_type: ChainType,
    /// Member role
    pub role: MemberRole,
    /// When the member was recorded (Unix millis)
    pub joined_at: u64,
}

impl GroupMember {
    pub(crate) fn new(identity: &Identity, role: MemberRole, joined_at: u64) -> Self {
        Self {
            address: identity.address.clone(),
            chain_type: identity.chain_type,
            role,
            joined_at,
        }
    }
}

/// Key of a peer's sender key entry: `(sender_address, key_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SenderKeyRef {
    /// Sender address
    pub sender_address: String,
    /// Key generation
    pub key_id: u32,
}

impl SenderKeyRef {
    /// Create a reference.
    pub fn new(sender_address: impl Into<String>, key_id: u32) -> Self {
        Self { sender_address: sender_address.into(), key_id }
    }
}

/// A peer's public sender key plus lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSenderKey {
    /// Public-only ratchet state
    pub state: SenderKeyState,
    /// Signed creation time of the distribution (Unix millis)
    #[serde(default)]
    pub distributed_at: u64,
    /// When the distribution was processed (Unix millis)
    pub received_at: u64,
    /// When the sender moved to a newer key (Unix millis)
    pub retired_at: Option<u64>,
}

impl MemberSenderKey {
    pub(crate) fn new(state: SenderKeyState, distributed_at: u64, received_at: u64) -> Self {
        Self { state, distributed_at, received_at, retired_at: None }
    }

    /// True if the sender has rotated away from this key.
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// True if this key was retired at least `ttl_millis` before `now`.
    pub fn is_expired(&self, now: u64, ttl_millis: u64) -> bool {
        self.retired_at.is_some_and(|retired_at| now.saturating_sub(retired_at) >= ttl_millis)
    }

    fn key_ref(&self) -> SenderKeyRef {
        SenderKeyRef::new(self.state.sender_address(), self.state.key_id())
    }
}

/// Outcome of [`GroupSession::install_sender_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyInstall {
    /// The key is now the sender's live key; `retired` older keys were retired
    Current {
        /// Keys newly retired
        retired: usize,
    },
    /// A newer generation of the sender is already known; stored retired
    Superseded,
}

/// Everything the local identity knows about one group.
///
/// # Invariants
///
/// - `my_sender_key` always carries a private signing key
/// - Every `member_sender_keys` entry is public-only and filed under its own
///   `(sender_address, key_id)`
/// - At most one entry per sender is live (not retired)
/// - `members` holds each address at most once
/// - Removed addresses hold no sender keys until re-added
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSession {
    group_id: String,
    group_name: String,
    my_sender_key: SenderKeyState,
    #[serde(with = "member_key_entries")]
    member_sender_keys: BTreeMap<SenderKeyRef, MemberSenderKey>,
    members: Vec<GroupMember>,
    #[serde(default)]
    removed: BTreeSet<String>,
    created_at: u64,
    last_activity_at: u64,
}

impl GroupSession {
    pub(crate) fn new(
        group_id: String,
        group_name: String,
        my_sender_key: SenderKeyState,
        members: Vec<GroupMember>,
        now: u64,
    ) -> Self {
        Self {
            group_id,
            group_name,
            my_sender_key,
            member_sender_keys: BTreeMap::new(),
            members,
            removed: BTreeSet::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Group identifier.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Human-readable group name.
    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Local sender key (private).
    pub fn my_sender_key(&self) -> &SenderKeyState {
        &self.my_sender_key
    }

    /// Membership roster.
    pub fn members(&self) -> &[GroupMember] {
        &self.members
    }

    /// Roster entry for `address`.
    pub fn member(&self, address: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.address == address)
    }

    /// True if `address` is on the roster.
    pub fn is_member(&self, address: &str) -> bool {
        self.member(address).is_some()
    }

    /// True if `address` was removed and has not been re-added since.
    pub fn is_removed(&self, address: &str) -> bool {
        self.removed.contains(address)
    }

    /// Peer sender key stored under `(sender_address, key_id)`.
    pub fn member_sender_key(&self, sender_address: &str, key_id: u32) -> Option<&MemberSenderKey> {
        self.member_sender_keys.get(&SenderKeyRef::new(sender_address, key_id))
    }

    /// All peer sender keys, ordered by `(sender_address, key_id)`.
    pub fn member_sender_keys(&self) -> impl Iterator<Item = (&SenderKeyRef, &MemberSenderKey)> {
        self.member_sender_keys.iter()
    }

    /// Number of stored peer sender keys, live and retired.
    pub fn member_sender_key_count(&self) -> usize {
        self.member_sender_keys.len()
    }

    /// Creation time (Unix millis).
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last send or receive (Unix millis).
    pub fn last_activity_at(&self) -> u64 {
        self.last_activity_at
    }

    pub(crate) fn my_sender_key_mut(&mut self) -> &mut SenderKeyState {
        &mut self.my_sender_key
    }

    pub(crate) fn replace_my_sender_key(&mut self, state: SenderKeyState) {
        self.my_sender_key = state;
    }

    pub(crate) fn member_sender_key_mut(
        &mut self,
        sender_address: &str,
        key_id: u32,
    ) -> Option<&mut MemberSenderKey> {
        self.member_sender_keys.get_mut(&SenderKeyRef::new(sender_address, key_id))
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_activity_at = self.last_activity_at.max(now);
    }

    /// Add a roster entry, lifting any removal of that address. Returns false
    /// if the address is already present.
    pub(crate) fn add_member(&mut self, member: GroupMember) -> bool {
        if self.is_member(&member.address) {
            return false;
        }
        self.removed.remove(&member.address);
        self.members.push(member);
        true
    }

    /// Change the role of a roster entry. Returns false if absent.
    pub(crate) fn promote_member(&mut self, address: &str, role: MemberRole) -> bool {
        match self.members.iter_mut().find(|m| m.address == address) {
            Some(member) => {
                member.role = role;
                true
            },
            None => false,
        }
    }

    /// Remove a roster entry and every sender key of that address, and
    /// remember the removal until the address is added again.
    pub(crate) fn remove_member(&mut self, address: &str) -> Option<GroupMember> {
        let index = self.members.iter().position(|m| m.address == address)?;
        self.member_sender_keys.retain(|key, _| key.sender_address != address);
        self.removed.insert(address.to_string());
        Some(self.members.remove(index))
    }

    /// Insert or replace a peer sender key under its own reference.
    pub(crate) fn upsert_member_sender_key(&mut self, entry: MemberSenderKey) {
        self.member_sender_keys.insert(entry.key_ref(), entry);
    }

    /// Store a new key generation for its sender.
    ///
    /// The generation with the latest signed distribution time is the live
    /// one; on a tie the later arrival wins. A newer generation retires the
    /// sender's other live keys. An older generation arriving late is stored
    /// already retired. Retired keys of the sender are then capped at
    /// `max_retired`, dropping the oldest generations first.
    pub(crate) fn install_sender_key(
        &mut self,
        mut entry: MemberSenderKey,
        now: u64,
        max_retired: usize,
    ) -> KeyInstall {
        let new_ref = entry.key_ref();
        let superseded = self.member_sender_keys.iter().any(|(key, existing)| {
            key.sender_address == new_ref.sender_address
                && key.key_id != new_ref.key_id
                && existing.distributed_at > entry.distributed_at
        });

        let outcome = if superseded {
            entry.retired_at = Some(now);
            KeyInstall::Superseded
        } else {
            let mut retired = 0;
            for (key, existing) in &mut self.member_sender_keys {
                if key.sender_address == new_ref.sender_address
                    && key.key_id != new_ref.key_id
                    && existing.retired_at.is_none()
                {
                    existing.retired_at = Some(now);
                    retired += 1;
                }
            }
            KeyInstall::Current { retired }
        };

        self.member_sender_keys.insert(new_ref.clone(), entry);
        self.cap_retired_keys(&new_ref.sender_address, max_retired);
        outcome
    }

    fn cap_retired_keys(&mut self, sender_address: &str, max_retired: usize) {
        let mut retired: Vec<(u64, u64, SenderKeyRef)> = self
            .member_sender_keys
            .iter()
            .filter(|(key, entry)| key.sender_address == sender_address && entry.is_retired())
            .map(|(key, entry)| (entry.distributed_at, entry.received_at, key.clone()))
            .collect();

        if retired.len() > max_retired {
            retired.sort();
            let excess = retired.len() - max_retired;
            for (_, _, key) in retired.into_iter().take(excess) {
                self.member_sender_keys.remove(&key);
            }
        }
    }

    /// Drop retired keys whose grace period has passed.
    ///
    /// Returns the number of keys dropped.
    pub(crate) fn purge_expired_keys(&mut self, now: u64, ttl_millis: u64) -> usize {
        let before = self.member_sender_keys.len();
        self.member_sender_keys.retain(|_, entry| !entry.is_expired(now, ttl_millis));
        before - self.member_sender_keys.len()
    }
}

/// Peer sender keys travel as a list; map keys are rebuilt from each state.
mod member_key_entries {
    use std::collections::BTreeMap;

    use super::{Deserialize, Deserializer, MemberSenderKey, SenderKeyRef, Serializer};

    pub(super) fn serialize<S: Serializer>(
        map: &BTreeMap<SenderKeyRef, MemberSenderKey>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.values())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<SenderKeyRef, MemberSenderKey>, D::Error> {
        let entries = Vec::<MemberSenderKey>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|entry| (entry.key_ref(), entry)).collect())
    }
}

#[cfg(test)]
mod tests {
    use chorus_crypto::{
        RustCryptoProvider, SenderKeyDistributionBuilder, SenderKeyRatchet, SystemEnv,
    };

    use super::*;

    const ALICE: &str = "0x52908400098527886e0f7030069857d2e4169ee7";
    const BOB: &str = "0x000000000000000000000000000000000000b0b0";

    fn ratchet() -> SenderKeyRatchet<RustCryptoProvider, SystemEnv> {
        SenderKeyRatchet::new(RustCryptoProvider::new(), SystemEnv::new())
    }

    fn peer_key(address: &str, at: u64) -> MemberSenderKey {
        let state = ratchet().create_sender_key_state(address, ChainType::Evm).unwrap();
        let builder = SenderKeyDistributionBuilder::new(RustCryptoProvider::new(), SystemEnv::new());
        let distribution = builder.create_distribution("group", &state).unwrap();
        let public = builder.create_sender_key_state_from_distribution(&distribution).unwrap();
        MemberSenderKey::new(public, at, at)
    }

    fn session() -> GroupSession {
        let me = Identity::new(ALICE, ChainType::Evm);
        let state = ratchet().create_sender_key_state(ALICE, ChainType::Evm).unwrap();
        GroupSession::new(
            "group".to_string(),
            "Group".to_string(),
            state,
            vec![GroupMember::new(&me, MemberRole::Admin, 1)],
            1,
        )
    }

    #[test]
    fn roster_rejects_duplicates() {
        let mut session = session();
        let bob = Identity::new(BOB, ChainType::Evm);

        assert!(session.add_member(GroupMember::new(&bob, MemberRole::Member, 2)));
        assert!(!session.add_member(GroupMember::new(&bob, MemberRole::Member, 3)));
        assert_eq!(session.members().len(), 2);
    }

    #[test]
    fn removing_member_drops_their_keys() {
        let mut session = session();
        let bob = Identity::new(BOB, ChainType::Evm);
        session.add_member(GroupMember::new(&bob, MemberRole::Member, 2));
        session.upsert_member_sender_key(peer_key(BOB, 2));

        let removed = session.remove_member(BOB).unwrap();

        assert_eq!(removed.address, BOB);
        assert_eq!(session.member_sender_key_count(), 0);
        assert!(session.remove_member(BOB).is_none());
    }

    #[test]
    fn removal_is_remembered_until_readded() {
        let mut session = session();
        let bob = Identity::new(BOB, ChainType::Evm);
        session.add_member(GroupMember::new(&bob, MemberRole::Member, 2));

        session.remove_member(BOB);
        assert!(session.is_removed(BOB));
        assert!(!session.is_member(BOB));

        assert!(session.add_member(GroupMember::new(&bob, MemberRole::Member, 3)));
        assert!(!session.is_removed(BOB));
    }

    #[test]
    fn retirement_keeps_newest_retired_keys() {
        let mut session = session();
        for t in 0..4 {
            let outcome = session.install_sender_key(peer_key(BOB, t), 100 + t, 2);
            assert_eq!(outcome, KeyInstall::Current { retired: usize::from(t > 0) });
        }

        let (retired, live): (Vec<_>, Vec<_>) =
            session.member_sender_keys().map(|(_, e)| e).partition(|e| e.is_retired());
        let retired: Vec<u64> = retired.iter().map(|e| e.distributed_at).collect();
        let live: Vec<u64> = live.iter().map(|e| e.distributed_at).collect();

        assert_eq!(live, vec![3]);
        assert_eq!(retired.len(), 2);
        assert!(retired.iter().all(|&t| t >= 1));
    }

    #[test]
    fn late_older_generation_is_stored_retired() {
        let mut session = session();
        let newer = peer_key(BOB, 20);
        let newer_id = newer.state.key_id();
        let older = peer_key(BOB, 10);
        let older_id = older.state.key_id();

        assert_eq!(session.install_sender_key(newer, 100, 2), KeyInstall::Current { retired: 0 });
        assert_eq!(session.install_sender_key(older, 101, 2), KeyInstall::Superseded);

        assert!(!session.member_sender_key(BOB, newer_id).unwrap().is_retired());
        assert_eq!(session.member_sender_key(BOB, older_id).unwrap().retired_at, Some(101));
    }

    #[test]
    fn cap_drops_oldest_generation_first() {
        let mut session = session();
        let current = peer_key(BOB, 30);
        let current_id = current.state.key_id();
        session.install_sender_key(current, 100, 1);
        session.install_sender_key(peer_key(BOB, 20), 101, 1);
        let oldest = peer_key(BOB, 10);
        let oldest_id = oldest.state.key_id();
        session.install_sender_key(oldest, 102, 1);

        assert_eq!(session.member_sender_key_count(), 2);
        assert!(session.member_sender_key(BOB, oldest_id).is_none());
        assert!(!session.member_sender_key(BOB, current_id).unwrap().is_retired());
    }

    #[test]
    fn expired_keys_are_purged() {
        let mut session = session();
        session.install_sender_key(peer_key(BOB, 0), 0, 2);
        let newest = peer_key(BOB, 1);
        let newest_id = newest.state.key_id();
        session.install_sender_key(newest, 1_000, 2);

        assert_eq!(session.purge_expired_keys(1_500, 1_000), 0);
        assert_eq!(session.purge_expired_keys(2_000, 1_000), 1);
        assert!(session.member_sender_key(BOB, newest_id).is_some());
    }

    #[test]
    fn cbor_roundtrip_rebuilds_key_index() {
        let mut session = session();
        let entry = peer_key(BOB, 5);
        let key_id = entry.state.key_id();
        session.upsert_member_sender_key(entry);

        let mut bytes = Vec::new();
        ciborium::into_writer(&session, &mut bytes).unwrap();
        let restored: GroupSession = ciborium::from_reader(bytes.as_slice()).unwrap();

        assert_eq!(restored.group_id(), "group");
        assert_eq!(restored.member_sender_key(BOB, key_id).unwrap().received_at, 5);
        assert!(!restored.my_sender_key().is_public_only());
    }
}

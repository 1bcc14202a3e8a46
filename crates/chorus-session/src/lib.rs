//! Chorus Group Sessions
//!
//! Async orchestration on top of `chorus-crypto`: one [`GroupSession`] per
//! group per local identity, persisted through a pluggable
//! [`GroupSessionStore`] and driven by [`GroupSessionManager`].
//!
//! # Architecture
//!
//! ```text
//! GroupSessionManager
//!   ├── SenderKeyDistributionBuilder   (create / verify distributions)
//!   ├── GroupMessageBuilder            (build / open envelopes)
//!   │     └── SenderKeyRatchet
//!   └── GroupSessionStore              (async, whole-session load/save)
//! ```
//!
//! # Retired keys
//!
//! When a peer rotates, its previous sender key is kept as *retired* for
//! [`SessionConfig::retired_key_ttl`] so messages already in flight still
//! decrypt. Expired retired keys are refused and purged on the next write.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;
pub mod session;
pub mod store;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::{CreatedGroup, GroupSessionManager, JoinedGroup};
pub use session::{GroupMember, GroupSession, Identity, MemberRole, MemberSenderKey, SenderKeyRef};
pub use store::{GroupSessionStore, MemoryStore, StoreError};

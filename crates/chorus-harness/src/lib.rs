//! Deterministic simulation harness for Chorus protocol testing.
//!
//! [`SimEnv`] replaces the system environment with a seeded RNG and a manual
//! clock, so every key, nonce, identifier and timestamp in a run is a pure
//! function of the seed. [`GroupCluster`] wires several
//! [`chorus_session::GroupSessionManager`]s into one group and delivers
//! distributions between them, standing in for the transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod sim_env;

pub use cluster::{ClusterManager, GroupCluster, evm_identities};
pub use sim_env::SimEnv;

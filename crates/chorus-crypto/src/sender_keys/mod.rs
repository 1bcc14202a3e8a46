//! Sender Keys group messaging primitives.
//!
//! Each group member owns one forward-secure hash ratchet per key generation
//! and shares its current chain key with peers through a signed
//! [`DistributionMessage`]. Messages are encrypted once for the whole group
//! and wrapped in a signed [`GroupMessageEnvelope`].
//!
//! ```text
//! chain_key[i] ──derive("MSG")───► message_key[i] ──AEAD──► ciphertext
//!      │
//!      └──derive("CHAIN")──► chain_key[i+1]
//! ```
//!
//! Old chain keys are overwritten as the ratchet advances, so compromise of
//! the current state does not expose earlier messages.

mod distribution;
mod error;
mod message;
mod ratchet;
mod state;

pub use distribution::{DistributionMessage, SenderKeyDistributionBuilder};
pub use error::SenderKeyError;
pub use message::{GroupMessageBuilder, GroupMessageEnvelope};
pub use ratchet::{Ciphertext, MAX_SKIP, SenderKeyRatchet};
pub use state::{KEY_SIZE, MessageKey, SecretBytes, SenderKeyState, SymmetricKey};

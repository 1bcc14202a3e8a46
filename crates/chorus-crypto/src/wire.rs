//! Canonical signing payloads and JSON transport encoding.
//!
//! Signed payloads use a structured domain-separated layout:
//!
//! ```text
//! "chorus-v1." || purpose || "." || field*
//! field := len(bytes) as 4-byte BE || bytes     (byte strings)
//!        | 4-byte BE                             (u32)
//!        | 8-byte BE                             (u64)
//! ```
//!
//! Every variable-length field is length-prefixed, so no two distinct field
//! tuples serialize to the same bytes. Binary fields travel as standard
//! padded base64 inside JSON.

use thiserror::Error;

/// Protocol prefix for every signed or authenticated payload.
const DOMAIN_PREFIX: &[u8] = b"chorus-v1.";

/// Well-known domain separation purposes.
pub mod purposes {
    /// Sender key distribution signature.
    pub const SENDER_KEY_DISTRIBUTION: &str = "SENDER-KEY-DISTRIBUTION";
    /// Group message envelope signature.
    pub const GROUP_MESSAGE: &str = "GROUP-MESSAGE";
    /// Associated data for group message AEAD.
    pub const GROUP_MESSAGE_AAD: &str = "GROUP-MESSAGE-AAD";
}

/// Errors decoding wire structures.
#[derive(Debug, Error)]
pub enum WireError {
    /// Malformed JSON or base64
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// Structurally valid but semantically invalid field
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Builder for canonical, domain-separated payloads.
pub struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    /// Start a payload for the given purpose.
    pub fn new(purpose: &str) -> Self {
        let mut buf = Vec::with_capacity(DOMAIN_PREFIX.len() + purpose.len() + 1 + 128);
        buf.extend_from_slice(DOMAIN_PREFIX);
        buf.extend_from_slice(purpose.as_bytes());
        buf.push(b'.');
        Self { buf }
    }

    /// Append a length-prefixed byte string.
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn str(self, value: &str) -> Self {
        self.bytes(value.as_bytes())
    }

    /// Append a big-endian `u32`.
    pub fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a big-endian `u64`.
    pub fn u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Finished payload bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Serde adapter encoding byte strings as standard base64.
pub(crate) mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(crate) fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

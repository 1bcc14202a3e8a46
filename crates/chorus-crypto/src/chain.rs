//! Chain-qualified sender addresses.
//!
//! Every sender is identified by an address string qualified with the chain
//! family it belongs to. The chain type is an explicit tagged variant on the
//! wire, and each variant knows the shape of its own addresses so malformed
//! identities are rejected where they enter the system.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sender_keys::SenderKeyError;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Chain family a sender address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    /// Ethereum and EVM-compatible chains (`0x` + 20 bytes hex)
    Evm,
    /// Solana (base58 public key)
    Solana,
    /// Bitcoin (bech32 or legacy base58)
    Bitcoin,
    /// Cosmos SDK chains (bech32 with chain prefix)
    Cosmos,
}

impl ChainType {
    /// Stable lowercase tag used on the wire and in signed payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Solana => "solana",
            Self::Bitcoin => "bitcoin",
            Self::Cosmos => "cosmos",
        }
    }

    /// Check that `address` is well-formed for this chain type.
    ///
    /// Only the textual shape is checked (length, prefix, alphabet). Checksums
    /// and ownership are the identity layer's concern.
    pub fn validate_address(self, address: &str) -> Result<(), SenderKeyError> {
        let valid = match self {
            Self::Evm => is_evm_address(address),
            Self::Solana => is_base58(address, 32..=44),
            Self::Bitcoin => is_bitcoin_address(address),
            Self::Cosmos => is_cosmos_address(address),
        };

        if valid {
            Ok(())
        } else {
            Err(SenderKeyError::InvalidAddress { chain_type: self, address: address.to_string() })
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_evm_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_base58(address: &str, length: std::ops::RangeInclusive<usize>) -> bool {
    length.contains(&address.len()) && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}

fn is_bitcoin_address(address: &str) -> bool {
    let bech32 = ["bc1", "tb1", "bcrt1"].iter().any(|prefix| {
        address.strip_prefix(prefix).is_some_and(|data| {
            (14..=74).contains(&address.len()) && is_lower_alphanumeric(data)
        })
    });

    bech32 || is_base58(address, 26..=35)
}

fn is_cosmos_address(address: &str) -> bool {
    let Some((hrp, data)) = address.rsplit_once('1') else {
        return false;
    };

    !hrp.is_empty()
        && hrp.chars().all(|c| c.is_ascii_lowercase())
        && data.len() >= 38
        && is_lower_alphanumeric(data)
}

fn is_lower_alphanumeric(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

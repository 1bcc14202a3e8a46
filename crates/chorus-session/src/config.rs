//! Session manager configuration.

use std::time::Duration;

use chorus_crypto::MAX_SKIP;
use serde::{Deserialize, Serialize};

/// How long a peer's previous sender key stays usable after rotation
pub const DEFAULT_RETIRED_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Retired keys kept per sender before the oldest are dropped
pub const DEFAULT_MAX_RETIRED_KEYS_PER_SENDER: usize = 2;

/// Session manager configuration
///
/// Every field has a default, so a partial document deserializes cleanly.
/// Durations are expressed in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Maximum ratchet iterations a receiver will skip to catch up
    pub max_skip: u32,
    /// Grace period for a peer's retired sender keys
    #[serde(with = "duration_secs")]
    pub retired_key_ttl: Duration,
    /// Maximum retired sender keys kept per peer
    pub max_retired_keys_per_sender: usize,
    /// Rotate our own sender key whenever a member is removed
    pub rotate_on_remove: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_skip: MAX_SKIP,
            retired_key_ttl: DEFAULT_RETIRED_KEY_TTL,
            max_retired_keys_per_sender: DEFAULT_MAX_RETIRED_KEYS_PER_SENDER,
            rotate_on_remove: true,
        }
    }
}

impl SessionConfig {
    /// Retired key TTL in milliseconds, saturating.
    pub(crate) fn retired_key_ttl_millis(&self) -> u64 {
        u64::try_from(self.retired_key_ttl.as_millis()).unwrap_or(u64::MAX)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

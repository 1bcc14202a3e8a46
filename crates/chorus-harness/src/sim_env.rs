//! Seeded environment with a manual clock.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chorus_crypto::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Simulated start time: 2024-01-01T00:00:00Z in Unix millis
pub const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Deterministic environment for simulations and tests.
///
/// Clones share the RNG stream and the clock, so every component handed a
/// clone draws from one reproducible sequence.
#[derive(Clone)]
pub struct SimEnv {
    inner: Arc<Mutex<SimEnvInner>>,
}

struct SimEnvInner {
    rng: ChaCha20Rng,
    now_millis: u64,
}

impl SimEnv {
    /// Create an environment seeded with `seed`, clock at [`SIM_EPOCH_MILLIS`].
    pub fn with_seed(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimEnvInner {
                rng: ChaCha20Rng::seed_from_u64(seed),
                now_millis: SIM_EPOCH_MILLIS,
            })),
        }
    }

    /// Create an environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Move the clock forward.
    pub fn advance_clock(&self, millis: u64) {
        let mut inner = self.lock();
        inner.now_millis = inner.now_millis.saturating_add(millis);
    }

    /// Current simulated time (Unix millis).
    pub fn now_millis(&self) -> u64 {
        self.lock().now_millis
    }

    // A panic while holding the lock leaves RNG and clock consistent, so a
    // poisoned lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, SimEnvInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        self.now_millis()
    }
}

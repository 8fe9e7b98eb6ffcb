//! Turmoil-based Environment implementation for deterministic testing.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use heliobeam_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall clock reading at the start of every simulation (2023-11-14).
pub const SIM_EPOCH: Duration = Duration::from_secs(1_700_000_000);

/// Simulation environment using Turmoil's virtual time and seeded RNG.
///
/// - **Virtual Time**: `now()` returns Tokio's clock, which Turmoil advances
///   instantly on `sleep`.
/// - **Virtual Wall Clock**: `unix_time()` is [`SIM_EPOCH`] plus the virtual
///   time elapsed since the first clock read, so signed timestamps are
///   reproducible too.
/// - **Seeded RNG**: `random_bytes()` uses ChaCha20 seeded with a fixed
///   value, so nonces and keys repeat across runs.
///
/// Clones share both the RNG stream and the clock origin.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    origin: Arc<Mutex<Option<Instant>>>,
}

impl SimEnv {
    /// Create a new SimEnv with default seed (0)
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a new SimEnv with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            origin: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }

    fn unix_time(&self) -> Duration {
        let now = self.now();
        let mut guard = self.origin.lock().unwrap_or_else(|e| {
            unreachable!("clock mutex poisoned in single-threaded context: {}", e)
        });
        let origin = *guard.get_or_insert(now);
        SIM_EPOCH + now.saturating_duration_since(origin)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        self.rng
            .lock()
            .unwrap_or_else(|e| {
                // Turmoil is single threaded. The mutex can only be poisoned if
                // another thread panics while holding the lock.
                unreachable!("RNG mutex poisoned in single-threaded context: {}", e)
            })
            .fill_bytes(dest);
    }
}

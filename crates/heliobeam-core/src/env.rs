//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples protocol logic from system resources
//! (time, randomness). This enables:
//!
//! - Deterministic Simulation: the harness provides a virtual clock and a
//!   seeded RNG, allowing perfect bug reproduction.
//!
//! - Production Runtime: [`SystemEnv`] uses the real clocks and OS entropy
//!   without any code changes to the protocol logic.
//!
//! # Two Clocks
//!
//! Nodes need two notions of time, captured together in a [`Moment`]:
//!
//! - a monotonic [`Instant`] for all timeout arithmetic (liveness windows,
//!   challenge expiry), which is always the *local* receiver clock
//! - a wall clock (duration since the UNIX epoch) that is bound into signed
//!   and MACed fields, and used only for freshness windows
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::{
    ops::Add,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use rand::{RngCore, rngs::OsRng};

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Implementations
///
/// - Simulation (`heliobeam-harness::SimEnv`): virtual time that can be
///   advanced instantly, seeded RNG for reproducibility.
/// - Production ([`SystemEnv`]): real clocks, OS entropy.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production. Nonces and signing keys are drawn from it.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Returns the wall clock as a duration since the UNIX epoch.
    ///
    /// Only used for fields that are bound into signatures and MACs. Never
    /// used for timeout arithmetic.
    fn unix_time(&self) -> Duration;

    /// Sleeps for the specified duration.
    ///
    /// Driver code only. Protocol logic never sleeps; it is polled through
    /// `tick` instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST draw from the OS entropy pool.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Production environment: system clocks and OS entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn unix_time(&self) -> Duration {
        // A clock set before 1970 reads as the epoch, which every freshness
        // window then rejects.
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}

/// A point in time as seen by one node.
///
/// State machine methods take a `Moment` instead of reading clocks. Tests
/// build one with [`Moment::new`] and move it forward with `+ Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Moment {
    /// Monotonic time, used for every timeout
    pub instant: Instant,
    /// Wall clock since the UNIX epoch, used for bound fields
    pub unix: Duration,
}

impl Moment {
    /// Create a moment from both clocks.
    #[must_use]
    pub fn new(instant: Instant, unix: Duration) -> Self {
        Self { instant, unix }
    }

    /// Read both clocks from an environment.
    #[must_use]
    pub fn capture<E: Environment<Instant = Instant>>(env: &E) -> Self {
        Self { instant: env.now(), unix: env.unix_time() }
    }

    /// Whole seconds since the UNIX epoch.
    #[must_use]
    pub fn unix_secs(&self) -> u64 {
        self.unix.as_secs()
    }

    /// Milliseconds since the UNIX epoch, saturating.
    #[must_use]
    pub fn unix_millis(&self) -> u64 {
        u64::try_from(self.unix.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Add<Duration> for Moment {
    type Output = Moment;

    fn add(self, rhs: Duration) -> Moment {
        Moment { instant: self.instant + rhs, unix: self.unix + rhs }
    }
}

//! Ramp scheduler: rate-limited, jittered fleet startup.
//!
//! Starting hundreds of players in the same instant synchronizes them on
//! every shared boundary afterwards (playlist refresh above all), which
//! makes the load profile unrealistically spiky. The ramp staggers starts at
//! the configured rate and adds a per-client jitter that is deterministic in
//! the client id, so a restarted run schedules every client at the same
//! offset again.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Staggered startup delays for the fleet.
#[derive(Debug, Clone)]
pub struct RampScheduler {
    rate: f64,
    max_jitter: Duration,
    seed: u64,
}

impl RampScheduler {
    pub fn new(rate: f64, max_jitter: Duration, seed: u64) -> Self {
        Self {
            rate,
            max_jitter,
            seed,
        }
    }

    /// Gap between consecutive starts at the target rate.
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }

    /// Delay before starting client `id`: base + per-client jitter.
    ///
    /// Jitter is uniform in `[0, max_jitter)` from a source seeded with
    /// `id XOR seed`, and capped to half the base delay so high rates are
    /// not throttled by their own jitter.
    pub fn delay_before(&self, client_id: u32) -> Duration {
        let base = self.base_delay();
        let cap = base.as_secs_f64() / 2.0;
        let bound = self.max_jitter.as_secs_f64().min(cap);
        if bound <= 0.0 {
            return base;
        }

        let mut rng = StdRng::seed_from_u64(client_id as u64 ^ self.seed);
        let jitter = rng.random_range(0.0..bound);
        base + Duration::from_secs_f64(jitter)
    }
}

//! Restart backoff with deterministic per-client jitter.
//!
//! Exponential series with a dedicated random source seeded from
//! `client_id XOR config_seed`: re-running with the same seed reproduces the
//! same schedule, and no two siblings share one.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use swarm_stats::ExitCategory;

/// First delay of the series.
pub const BACKOFF_INITIAL: Duration = Duration::from_millis(250);

/// Growth factor between attempts.
pub const BACKOFF_MULTIPLIER: f64 = 1.7;

/// Hard cap on any computed delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Uniform jitter band around the exponential value (±20%).
pub const BACKOFF_JITTER: f64 = 0.2;

/// A run at least this long resets the attempt series.
pub const SUSTAINED_RUN: Duration = Duration::from_secs(30);

/// Per-client restart delay generator.
#[derive(Debug)]
pub struct Backoff {
    rng: StdRng,
    attempts: u32,
}

impl Backoff {
    pub fn new(client_id: u32, config_seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(client_id as u64 ^ config_seed),
            attempts: 0,
        }
    }

    fn delay_at(&mut self, attempt: u32) -> Duration {
        let exp = BACKOFF_INITIAL.as_secs_f64() * BACKOFF_MULTIPLIER.powi(attempt as i32);
        let capped = exp.min(BACKOFF_CAP.as_secs_f64());
        let jitter = self
            .rng
            .random_range(1.0 - BACKOFF_JITTER..1.0 + BACKOFF_JITTER);
        Duration::from_secs_f64((capped * jitter).min(BACKOFF_CAP.as_secs_f64()))
    }

    /// Next delay: `initial × multiplier^attempts`, capped, with ±20%
    /// jitter, never exceeding the cap. Advances the attempt count.
    pub fn next(&mut self) -> Duration {
        let delay = self.delay_at(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Delay at the current attempt count without advancing the series; used
    /// for restarts that do not count as failures (clean exits, signals).
    pub fn current(&mut self) -> Duration {
        let attempt = self.attempts;
        self.delay_at(attempt)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Apply the reset rule after a run: a sustained run or a clean exit
    /// clears the series; only an error exit keeps it advancing.
    pub fn observe_run(&mut self, run: Duration, category: ExitCategory) {
        if run >= SUSTAINED_RUN || category == ExitCategory::Success {
            self.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Expected midpoints of the first five delays (ms).
    const EXPECTED_MS: [f64; 5] = [250.0, 425.0, 722.5, 1228.25, 2088.02];

    #[test]
    fn first_delays_stay_inside_the_jitter_band() {
        let mut backoff = Backoff::new(42, 0);
        for expected in EXPECTED_MS {
            let delay = backoff.next().as_secs_f64() * 1000.0;
            assert!(
                delay >= expected * 0.8 - 1e-6 && delay <= expected * 1.2 + 1e-6,
                "delay {delay}ms outside ±20% of {expected}ms"
            );
        }
    }

    #[test]
    fn identical_seeds_reproduce_the_schedule() {
        let mut a = Backoff::new(42, 0);
        let mut b = Backoff::new(42, 0);
        for _ in 0..5 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn sibling_clients_do_not_share_a_schedule() {
        let mut a = Backoff::new(1, 7);
        let mut b = Backoff::new(2, 7);
        let a_delays: Vec<Duration> = (0..5).map(|_| a.next()).collect();
        let b_delays: Vec<Duration> = (0..5).map(|_| b.next()).collect();
        assert_ne!(a_delays, b_delays);
    }

    #[test]
    fn delays_never_exceed_the_cap() {
        let mut backoff = Backoff::new(3, 99);
        for _ in 0..50 {
            assert!(backoff.next() <= BACKOFF_CAP);
        }
    }

    #[test]
    fn reset_restarts_the_series() {
        let mut backoff = Backoff::new(5, 0);
        for _ in 0..6 {
            backoff.next();
        }
        assert_eq!(backoff.attempts(), 6);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        let delay = backoff.next().as_secs_f64() * 1000.0;
        assert!((200.0..=300.0).contains(&delay));
    }

    #[test]
    fn sustained_run_or_clean_exit_resets() {
        let mut backoff = Backoff::new(0, 0);
        backoff.next();
        backoff.next();

        backoff.observe_run(Duration::from_secs(31), ExitCategory::Error);
        assert_eq!(backoff.attempts(), 0);

        backoff.next();
        backoff.observe_run(Duration::from_secs(1), ExitCategory::Success);
        assert_eq!(backoff.attempts(), 0);

        backoff.next();
        backoff.observe_run(Duration::from_secs(1), ExitCategory::Error);
        assert_eq!(backoff.attempts(), 1, "short error runs keep the series");
    }
}

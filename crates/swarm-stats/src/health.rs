//! Playback-health scoring.
//!
//! The health score is the ratio of playback-clock advance to wall-clock
//! elapsed since the current child started. A client keeping up scores ~1.0;
//! one starving for segments falls below it.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

/// Default number of score samples in the trend window.
pub const DEFAULT_TREND_WINDOW: usize = 10;

/// Classification thresholds over the playback-to-realtime score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlaybackHealth {
    /// score ≥ 0.98
    Perfect,
    /// score ≥ 0.95
    Healthy,
    /// score ≥ 0.90
    Marginal,
    /// score < 0.90
    Stalling,
}

impl PlaybackHealth {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.98 {
            PlaybackHealth::Perfect
        } else if score >= 0.95 {
            PlaybackHealth::Healthy
        } else if score >= 0.90 {
            PlaybackHealth::Marginal
        } else {
            PlaybackHealth::Stalling
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackHealth::Perfect => "perfect",
            PlaybackHealth::Healthy => "healthy",
            PlaybackHealth::Marginal => "marginal",
            PlaybackHealth::Stalling => "stalling",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlaybackHealth::Perfect => 0,
            PlaybackHealth::Healthy => 1,
            PlaybackHealth::Marginal => 2,
            PlaybackHealth::Stalling => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => PlaybackHealth::Perfect,
            1 => PlaybackHealth::Healthy,
            2 => PlaybackHealth::Marginal,
            _ => PlaybackHealth::Stalling,
        }
    }
}

/// Rolling health state for one client.
///
/// Tracks the current classification, stall transitions with their
/// durations, and a least-squares slope over the recent score window (the
/// "trend": negative means the client is sliding toward a stall).
#[derive(Debug)]
pub(crate) struct HealthTracker {
    window: VecDeque<f64>,
    window_size: usize,
    current: PlaybackHealth,
    stall_events: u64,
    stall_started: Option<Instant>,
    last_stall_secs: f64,
    total_stall_secs: f64,
}

impl HealthTracker {
    pub(crate) fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(2),
            current: PlaybackHealth::Perfect,
            stall_events: 0,
            stall_started: None,
            last_stall_secs: 0.0,
            total_stall_secs: 0.0,
        }
    }

    /// Feed one score observation; returns the new classification.
    pub(crate) fn observe(&mut self, score: f64, now: Instant) -> PlaybackHealth {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(score);

        let next = PlaybackHealth::from_score(score);
        let was_stalling = self.current == PlaybackHealth::Stalling;
        let is_stalling = next == PlaybackHealth::Stalling;

        if is_stalling && !was_stalling {
            self.stall_events += 1;
            self.stall_started = Some(now);
        } else if !is_stalling && was_stalling {
            if let Some(started) = self.stall_started.take() {
                let secs = now.duration_since(started).as_secs_f64();
                self.last_stall_secs = secs;
                self.total_stall_secs += secs;
            }
        }

        self.current = next;
        next
    }

    pub(crate) fn current(&self) -> PlaybackHealth {
        self.current
    }

    pub(crate) fn stall_events(&self) -> u64 {
        self.stall_events
    }

    pub(crate) fn last_stall_secs(&self) -> f64 {
        self.last_stall_secs
    }

    pub(crate) fn total_stall_secs(&self) -> f64 {
        self.total_stall_secs
    }

    /// Least-squares slope of the score window, per sample.
    pub(crate) fn trend(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let nf = n as f64;
        let mean_x = (nf - 1.0) / 2.0;
        let mean_y: f64 = self.window.iter().sum::<f64>() / nf;

        let mut num = 0.0;
        let mut den = 0.0;
        for (i, &y) in self.window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            num += dx * (y - mean_y);
            den += dx * dx;
        }
        if den == 0.0 { 0.0 } else { num / den }
    }

    /// Reset the window on child restart; the stall counters are lifetime.
    pub(crate) fn reset_window(&mut self, now: Instant) {
        self.window.clear();
        // A stall that spans a restart ends at the restart.
        if self.current == PlaybackHealth::Stalling
            && let Some(started) = self.stall_started.take()
        {
            let secs = now.duration_since(started).as_secs_f64();
            self.last_stall_secs = secs;
            self.total_stall_secs += secs;
        }
        self.current = PlaybackHealth::Perfect;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn thresholds() {
        assert_eq!(PlaybackHealth::from_score(1.02), PlaybackHealth::Perfect);
        assert_eq!(PlaybackHealth::from_score(0.98), PlaybackHealth::Perfect);
        assert_eq!(PlaybackHealth::from_score(0.96), PlaybackHealth::Healthy);
        assert_eq!(PlaybackHealth::from_score(0.92), PlaybackHealth::Marginal);
        assert_eq!(PlaybackHealth::from_score(0.50), PlaybackHealth::Stalling);
    }

    #[test]
    fn stall_transition_counts_once_and_records_duration() {
        let mut tracker = HealthTracker::new(10);
        let t0 = Instant::now();

        tracker.observe(1.0, t0);
        tracker.observe(0.5, t0 + Duration::from_secs(1));
        tracker.observe(0.5, t0 + Duration::from_secs(2)); // still the same stall
        assert_eq!(tracker.stall_events(), 1);

        tracker.observe(1.0, t0 + Duration::from_secs(4));
        assert_eq!(tracker.current(), PlaybackHealth::Perfect);
        assert!((tracker.last_stall_secs() - 3.0).abs() < 0.1);
        assert_eq!(tracker.stall_events(), 1);
    }

    #[test]
    fn trend_is_negative_for_degrading_scores() {
        let mut tracker = HealthTracker::new(10);
        let now = Instant::now();
        for i in 0..10 {
            tracker.observe(1.0 - i as f64 * 0.02, now);
        }
        assert!(tracker.trend() < 0.0);
    }

    #[test]
    fn trend_is_flat_for_steady_scores() {
        let mut tracker = HealthTracker::new(10);
        let now = Instant::now();
        for _ in 0..10 {
            tracker.observe(1.0, now);
        }
        assert!(tracker.trend().abs() < 1e-9);
    }

    #[test]
    fn window_reset_closes_open_stall() {
        let mut tracker = HealthTracker::new(10);
        let t0 = Instant::now();
        tracker.observe(0.1, t0);
        assert_eq!(tracker.stall_events(), 1);

        tracker.reset_window(t0 + Duration::from_secs(5));
        assert!((tracker.total_stall_secs() - 5.0).abs() < 0.1);
        assert_eq!(tracker.current(), PlaybackHealth::Perfect);
    }
}

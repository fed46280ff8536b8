//! Inflight segment-request tracking.
//!
//! HLS clients prefetch: several segment downloads can be in flight at once.
//! The map holds at most one entry per URL (a re-request replaces the stale
//! start time) and has exactly one reaper, the progress path, so expiry
//! accounting is not racy.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Requests older than this are reaped as timeouts.
pub const INFLIGHT_TTL_SECS: i64 = 60;

/// Concurrent URL → request-start map.
#[derive(Debug, Default)]
pub struct InflightMap {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InflightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request start. A URL already present is replaced, keeping
    /// the at-most-one-per-URL invariant.
    pub fn insert(&self, url: &str, at: DateTime<Utc>) {
        self.entries.lock().insert(url.to_string(), at);
    }

    /// Complete a specific URL, returning its latency relative to `at`.
    pub fn complete(&self, url: &str, at: DateTime<Utc>) -> Option<Duration> {
        let start = self.entries.lock().remove(url)?;
        Some(at - start)
    }

    /// Complete the oldest entry, returning `(url, latency)`.
    pub fn complete_oldest(&self, at: DateTime<Utc>) -> Option<(String, Duration)> {
        let mut entries = self.entries.lock();
        let oldest = entries
            .iter()
            .min_by_key(|&(_, &start)| start)
            .map(|(url, &start)| (url.clone(), start))?;
        entries.remove(&oldest.0);
        Some((oldest.0, at - oldest.1))
    }

    /// Remove entries older than `ttl`, returning how many were reaped.
    pub fn reap_expired(&self, now: DateTime<Utc>, ttl: Duration) -> u64 {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, &mut start| now - start <= ttl);
        (before - entries.len()) as u64
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop everything (process restart).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

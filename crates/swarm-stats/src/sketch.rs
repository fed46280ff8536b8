//! Memory-bounded latency sketches.
//!
//! Raw latency samples from a long run do not fit in memory (a 5000-client
//! hour produces tens of millions of them), so distributions are kept in a
//! T-Digest with a fixed centroid count: a few kilobytes per sketch no
//! matter how many samples arrive. Samples are staged in a small buffer and
//! folded into the digest in batches; the buffer is part of the constant
//! footprint.
//!
//! The digest is not safe for concurrent mutation, so all sketch state sits
//! behind one mutex. Quantiles are read under the same lock.
//!
//! Fixed-boundary bucket counters ride along so the metrics endpoint can
//! emit histogram `_bucket` lines without keeping samples.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tdigest::TDigest;

/// Centroid cap for each digest (~10 KB of state).
pub const DEFAULT_COMPRESSION: usize = 100;

/// Staged samples are folded into the digest at this size.
const BUFFER_FLUSH_LEN: usize = 256;

/// Upper bounds (milliseconds) for the exported histogram buckets; an
/// implicit +Inf bucket follows.
pub const LATENCY_BUCKETS_MS: [f64; 10] = [
    10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

struct SketchInner {
    digest: TDigest,
    buffer: Vec<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl SketchInner {
    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let staged = std::mem::take(&mut self.buffer);
        let digest = std::mem::replace(&mut self.digest, TDigest::new_with_size(DEFAULT_COMPRESSION));
        self.digest = digest.merge_unsorted(staged);
    }
}

/// One latency distribution: T-Digest + running min/max/sum/count + buckets.
pub struct LatencySketch {
    inner: Mutex<SketchInner>,
    buckets: [AtomicU64; LATENCY_BUCKETS_MS.len() + 1],
}

impl LatencySketch {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SketchInner {
                digest: TDigest::new_with_size(DEFAULT_COMPRESSION),
                buffer: Vec::with_capacity(BUFFER_FLUSH_LEN),
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: 0.0,
            }),
            buckets: Default::default(),
        }
    }

    /// Record one sample in milliseconds. Negative and non-finite samples
    /// are discarded.
    pub fn record(&self, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            return;
        }

        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.count += 1;
        inner.sum += ms;
        inner.min = inner.min.min(ms);
        inner.max = inner.max.max(ms);
        inner.buffer.push(ms);
        if inner.buffer.len() >= BUFFER_FLUSH_LEN {
            inner.flush();
        }
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    /// Estimated quantile, `None` before the first sample.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            return None;
        }
        inner.flush();
        Some(inner.digest.estimate_quantile(q))
    }

    /// Point-in-time summary of the distribution.
    pub fn summary(&self) -> LatencySummary {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            return LatencySummary::default();
        }
        inner.flush();
        let q = |p: f64| inner.digest.estimate_quantile(p);
        LatencySummary {
            count: inner.count,
            sum_ms: inner.sum,
            avg_ms: inner.sum / inner.count as f64,
            min_ms: inner.min,
            max_ms: inner.max,
            p25_ms: q(0.25),
            p50_ms: q(0.50),
            p75_ms: q(0.75),
            p95_ms: q(0.95),
            p99_ms: q(0.99),
        }
    }

    /// Per-bucket (non-cumulative) sample counts, in [`LATENCY_BUCKETS_MS`]
    /// order with the +Inf bucket last.
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.inner.lock().buffer.len()
    }
}

impl Default for LatencySketch {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics of one latency sketch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub sum_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p25_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Running min/max/sum/count without a digest, for sparse latencies that do
/// not earn a sketch (TCP connects, request completions).
#[derive(Debug, Default)]
pub struct RunningLatency {
    inner: Mutex<Running>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Running {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl RunningLatency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            inner.min = ms;
        } else {
            inner.min = inner.min.min(ms);
        }
        inner.count += 1;
        inner.sum += ms;
        inner.max = inner.max.max(ms);
    }

    pub fn summary(&self) -> RunningSummary {
        let inner = self.inner.lock();
        RunningSummary {
            count: inner.count,
            avg_ms: if inner.count == 0 {
                0.0
            } else {
                inner.sum / inner.count as f64
            },
            min_ms: if inner.count == 0 { 0.0 } else { inner.min },
            max_ms: inner.max,
        }
    }
}

/// Summary of a [`RunningLatency`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningSummary {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl RunningSummary {
    /// Merge two summaries (fleet fold).
    pub fn merge(&self, other: &RunningSummary) -> RunningSummary {
        let count = self.count + other.count;
        if count == 0 {
            return RunningSummary::default();
        }
        RunningSummary {
            count,
            avg_ms: (self.avg_ms * self.count as f64 + other.avg_ms * other.count as f64)
                / count as f64,
            min_ms: match (self.count, other.count) {
                (0, _) => other.min_ms,
                (_, 0) => self.min_ms,
                _ => self.min_ms.min(other.min_ms),
            },
            max_ms: self.max_ms.max(other.max_ms),
        }
    }
}

//! Fleet-level snapshot fold.
//!
//! Every tick the aggregator copies each client's summary and folds them
//! into one immutable [`AggregateSnapshot`]. Latency percentiles aggregate
//! as the max across clients per quantile: the worst customer's tail, not a
//! mean of medians. Rates come from deltas against the previous fold over
//! the measured interval.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::{ClientState, ClientStats, ClientSummary};
use crate::health::PlaybackHealth;
use crate::sketch::{LatencySummary, RunningSummary};

/// Fleet sizes at or above this stop shipping per-client rows in snapshots.
pub const PER_CLIENT_ROW_LIMIT: usize = 200;

/// Default aggregate drop-rate threshold for the degraded signal.
pub const DEFAULT_DEGRADED_THRESHOLD: f64 = 0.01;

/// Worst-tail latency aggregate: count/sum across the fleet, max per
/// quantile across clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyAggregate {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p25_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyAggregate {
    fn absorb(&mut self, s: &LatencySummary) {
        if s.count == 0 {
            return;
        }
        if self.count == 0 {
            self.min_ms = s.min_ms;
        } else {
            self.min_ms = self.min_ms.min(s.min_ms);
        }
        let total = self.count + s.count;
        self.avg_ms = (self.avg_ms * self.count as f64 + s.sum_ms) / total as f64;
        self.count = total;
        self.max_ms = self.max_ms.max(s.max_ms);
        self.p25_ms = self.p25_ms.max(s.p25_ms);
        self.p50_ms = self.p50_ms.max(s.p50_ms);
        self.p75_ms = self.p75_ms.max(s.p75_ms);
        self.p95_ms = self.p95_ms.max(s.p95_ms);
        self.p99_ms = self.p99_ms.max(s.p99_ms);
    }
}

/// Fleet-wide pipeline health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineAggregate {
    pub progress_lines_read: u64,
    pub progress_lines_dropped: u64,
    pub stderr_lines_read: u64,
    pub stderr_lines_dropped: u64,
    pub drop_rate: f64,
    pub peak_drop_rate: f64,
    pub metrics_degraded: bool,
}

/// Playback-health bucket counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthBuckets {
    pub perfect: usize,
    pub healthy: usize,
    pub marginal: usize,
    pub stalling: usize,
}

/// Immutable point-in-time fold of every client's stats.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateSnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub interval_secs: f64,

    pub target_clients: usize,
    pub active_clients: usize,
    pub backoff_clients: usize,
    pub stopped_clients: usize,
    pub unhealthy_clients: usize,

    pub manifest_requests: u64,
    pub segment_requests: u64,
    pub unknown_requests: u64,
    pub total_bytes: u64,

    pub manifest_rate: f64,
    pub segment_rate: f64,
    pub throughput_bytes_per_sec: f64,

    pub http_errors: BTreeMap<u16, u64>,
    pub reconnections: u64,
    pub timeouts: u64,
    pub sequence_skips: u64,
    pub late_refreshes: u64,
    pub failed_refreshes: u64,
    pub stall_events: u64,

    pub restarts: u64,
    pub exits_success: u64,
    pub exits_error: u64,
    pub exits_signal: u64,

    pub tcp_attempts: u64,
    pub tcp_success: u64,
    pub tcp_refused: u64,
    pub tcp_timeout: u64,
    pub tcp_error: u64,
    pub tcp_health_ratio: f64,
    pub tcp_connect: RunningSummary,
    pub request_completion: RunningSummary,

    pub manifest_latency: LatencyAggregate,
    pub segment_latency: LatencyAggregate,
    pub jitter_avg_ms: f64,
    pub jitter_max_ms: f64,

    pub avg_speed: f64,
    pub avg_drift_ms: f64,
    pub max_drift_ms: i64,
    pub clients_above_realtime: usize,
    pub clients_below_realtime: usize,
    pub clients_stalled: usize,
    pub clients_high_drift: usize,
    pub health_buckets: HealthBuckets,

    pub pipeline: PipelineAggregate,

    /// Per-client rows, present only while the fleet is small enough for
    /// the dashboard to render them.
    pub per_client: Vec<ClientSummary>,
}

struct PrevSample {
    at: Instant,
    manifest_requests: u64,
    segment_requests: u64,
    total_bytes: u64,
}

/// Stateful folder: remembers the previous totals for rate computation.
pub struct Aggregator {
    degraded_threshold: f64,
    per_client_limit: usize,
    prev: Option<PrevSample>,
}

impl Aggregator {
    pub fn new(degraded_threshold: f64) -> Self {
        Self {
            degraded_threshold,
            per_client_limit: PER_CLIENT_ROW_LIMIT,
            prev: None,
        }
    }

    pub fn with_per_client_limit(mut self, limit: usize) -> Self {
        self.per_client_limit = limit;
        self
    }

    /// Fold all clients into a snapshot. Reads each client through its
    /// summary; no client lock is held across another client's fold.
    pub fn fold(&mut self, clients: &[Arc<ClientStats>], target_clients: usize) -> AggregateSnapshot {
        let now = Instant::now();
        let summaries: Vec<ClientSummary> = clients.iter().map(|c| c.summary()).collect();

        let mut snap = AggregateSnapshot {
            taken_at: Some(Utc::now()),
            target_clients,
            ..Default::default()
        };

        let mut speed_sum = 0.0;
        let mut drift_sum = 0.0;
        let mut active_with_progress = 0usize;
        let mut jitter_weighted = 0.0;
        let mut jitter_clients = 0usize;

        for s in &summaries {
            match s.state {
                ClientState::Running => snap.active_clients += 1,
                ClientState::Backoff => snap.backoff_clients += 1,
                ClientState::Stopped => snap.stopped_clients += 1,
                ClientState::Created | ClientState::Starting => {}
            }
            if s.unhealthy {
                snap.unhealthy_clients += 1;
            }

            snap.manifest_requests += s.manifest_requests;
            snap.segment_requests += s.segment_requests;
            snap.unknown_requests += s.unknown_requests;
            snap.total_bytes += s.total_bytes;
            for (&code, &count) in &s.http_errors {
                *snap.http_errors.entry(code).or_insert(0) += count;
            }
            snap.reconnections += s.reconnections;
            snap.timeouts += s.timeouts;
            snap.sequence_skips += s.sequence_skips;
            snap.late_refreshes += s.late_refreshes;
            snap.failed_refreshes += s.failed_refreshes;
            snap.stall_events += s.stall_events;
            snap.restarts += s.restarts;
            snap.exits_success += s.exits_success;
            snap.exits_error += s.exits_error;
            snap.exits_signal += s.exits_signal;

            snap.tcp_attempts += s.tcp.attempts;
            snap.tcp_success += s.tcp.success;
            snap.tcp_refused += s.tcp.refused;
            snap.tcp_timeout += s.tcp.timeout;
            snap.tcp_error += s.tcp.error;
            snap.tcp_connect = snap.tcp_connect.merge(&s.tcp.connect);
            snap.request_completion = snap.request_completion.merge(&s.request_completion);

            snap.manifest_latency.absorb(&s.manifest_latency);
            snap.segment_latency.absorb(&s.segment_latency);
            if s.jitter_avg_ms > 0.0 || s.jitter_max_ms > 0.0 {
                jitter_weighted += s.jitter_avg_ms;
                jitter_clients += 1;
                snap.jitter_max_ms = snap.jitter_max_ms.max(s.jitter_max_ms);
            }

            if s.state == ClientState::Running {
                let effective_speed = if s.speed > 0.0 { s.speed } else { s.score };
                speed_sum += effective_speed;
                drift_sum += s.drift_ms as f64;
                active_with_progress += 1;

                if effective_speed >= 1.0 {
                    snap.clients_above_realtime += 1;
                } else if effective_speed > 0.0 {
                    snap.clients_below_realtime += 1;
                }
            }
            snap.max_drift_ms = snap.max_drift_ms.max(s.max_drift_ms);
            if s.high_drift {
                snap.clients_high_drift += 1;
            }
            match s.health {
                PlaybackHealth::Perfect => snap.health_buckets.perfect += 1,
                PlaybackHealth::Healthy => snap.health_buckets.healthy += 1,
                PlaybackHealth::Marginal => snap.health_buckets.marginal += 1,
                PlaybackHealth::Stalling => {
                    snap.health_buckets.stalling += 1;
                    snap.clients_stalled += 1;
                }
            }

            snap.pipeline.progress_lines_read += s.progress_pipeline.lines_read;
            snap.pipeline.progress_lines_dropped += s.progress_pipeline.lines_dropped;
            snap.pipeline.stderr_lines_read += s.stderr_pipeline.lines_read;
            snap.pipeline.stderr_lines_dropped += s.stderr_pipeline.lines_dropped;
            snap.pipeline.peak_drop_rate = snap
                .pipeline
                .peak_drop_rate
                .max(s.progress_pipeline.peak_drop_rate)
                .max(s.stderr_pipeline.peak_drop_rate);
        }

        if active_with_progress > 0 {
            snap.avg_speed = speed_sum / active_with_progress as f64;
            snap.avg_drift_ms = drift_sum / active_with_progress as f64;
        }
        if jitter_clients > 0 {
            snap.jitter_avg_ms = jitter_weighted / jitter_clients as f64;
        }

        let tcp_denominator = snap.tcp_success + snap.tcp_refused + snap.tcp_timeout;
        snap.tcp_health_ratio = if tcp_denominator == 0 {
            1.0
        } else {
            snap.tcp_success as f64 / tcp_denominator as f64
        };

        let lines_read = snap.pipeline.progress_lines_read + snap.pipeline.stderr_lines_read;
        let lines_dropped =
            snap.pipeline.progress_lines_dropped + snap.pipeline.stderr_lines_dropped;
        snap.pipeline.drop_rate = if lines_read == 0 {
            0.0
        } else {
            lines_dropped as f64 / lines_read as f64
        };
        snap.pipeline.peak_drop_rate = snap.pipeline.peak_drop_rate.max(snap.pipeline.drop_rate);
        snap.pipeline.metrics_degraded = snap.pipeline.drop_rate > self.degraded_threshold;

        if let Some(prev) = &self.prev {
            let dt = now.duration_since(prev.at).as_secs_f64();
            if dt > 0.0 {
                snap.interval_secs = dt;
                snap.manifest_rate =
                    snap.manifest_requests.saturating_sub(prev.manifest_requests) as f64 / dt;
                snap.segment_rate =
                    snap.segment_requests.saturating_sub(prev.segment_requests) as f64 / dt;
                snap.throughput_bytes_per_sec =
                    snap.total_bytes.saturating_sub(prev.total_bytes) as f64 / dt;
            }
        }
        self.prev = Some(PrevSample {
            at: now,
            manifest_requests: snap.manifest_requests,
            segment_requests: snap.segment_requests,
            total_bytes: snap.total_bytes,
        });

        if summaries.len() < self.per_client_limit {
            snap.per_client = summaries;
        }

        snap
    }
}

//! # swarm-stats
//!
//! The stats engine of the load-generation swarm: per-client quality
//! metrics inferred from parsed player events, memory-bounded latency
//! sketches, and the fleet-level snapshot fold.
//!
//! Ownership is strictly forward: a supervisor owns its [`ClientStats`];
//! the client's parsers are the only writers; the [`Aggregator`] reads
//! through summaries and never holds a client lock while doing anything
//! else. `ClientStats` never references the supervisor back.

pub mod aggregate;
pub mod classify;
pub mod client;
pub mod health;
pub mod inflight;
pub mod sketch;

pub use aggregate::{
    AggregateSnapshot, Aggregator, DEFAULT_DEGRADED_THRESHOLD, HealthBuckets, LatencyAggregate,
    PER_CLIENT_ROW_LIMIT, PipelineAggregate,
};
pub use classify::{UrlKind, classify_url};
pub use client::{
    ClientConfig, ClientState, ClientStats, ClientSummary, ExitCategory, StreamHealth, StreamKind,
    TcpSummary,
};
pub use health::{DEFAULT_TREND_WINDOW, PlaybackHealth};
pub use inflight::{INFLIGHT_TTL_SECS, InflightMap};
pub use sketch::{
    DEFAULT_COMPRESSION, LATENCY_BUCKETS_MS, LatencySketch, LatencySummary, RunningLatency,
    RunningSummary,
};

//! Per-client statistics.
//!
//! One `ClientStats` per supervised child, owned by its supervisor. The
//! writer set is fixed: the client's two parsers and its supervisor. Every
//! other component reads through the aggregator. Counters that are read
//! without a lock are atomics; the only mutex-guarded regions are the
//! latency digests (not safe for concurrent mutation), the HTTP-error code
//! map (variable-width keys), and the two parser-private state blocks, each
//! of which has exactly one writing task.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ffmpeg_events::{DebugEvent, DebugEventKind, ProgressUpdate, TcpFailReason};
use linesource::PipelineStats;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::classify::{UrlKind, classify_url};
use crate::health::{DEFAULT_TREND_WINDOW, HealthTracker, PlaybackHealth};
use crate::inflight::{INFLIGHT_TTL_SECS, InflightMap};
use crate::sketch::{LatencySketch, LatencySummary, RunningLatency, RunningSummary};

/// Drift beyond this flags the client as "high drift".
pub const HIGH_DRIFT: Duration = Duration::from_secs(5);

/// Pending manifests older than this are reaped as failed refreshes.
pub const PENDING_MANIFEST_TTL_SECS: i64 = 60;

/// A refresh interval beyond `target × 1.5` counts as late.
pub const LATE_REFRESH_FACTOR: f64 = 1.5;

/// Supervisor lifecycle state, readable lock-free by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientState {
    Created,
    Starting,
    Running,
    Backoff,
    Stopped,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Created => "created",
            ClientState::Starting => "starting",
            ClientState::Running => "running",
            ClientState::Backoff => "backoff",
            ClientState::Stopped => "stopped",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ClientState::Created => 0,
            ClientState::Starting => 1,
            ClientState::Running => 2,
            ClientState::Backoff => 3,
            ClientState::Stopped => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ClientState::Created,
            1 => ClientState::Starting,
            2 => ClientState::Running,
            3 => ClientState::Backoff,
            _ => ClientState::Stopped,
        }
    }
}

/// How a child run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExitCategory {
    /// Exit status 0.
    Success,
    /// Terminated by SIGTERM/SIGINT.
    Signal,
    /// Any other exit.
    Error,
}

impl ExitCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitCategory::Success => "success",
            ExitCategory::Signal => "signal",
            ExitCategory::Error => "error",
        }
    }
}

/// Which child stream a pipeline carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Progress,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Progress => "progress",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Tunables for one client's stats engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Expected manifest refresh interval (defaults to the segment
    /// duration); the playlist-jitter baseline.
    pub target_refresh: Duration,
    /// Inflight request TTL before a reap counts a timeout.
    pub inflight_ttl: Duration,
    /// Pending-manifest TTL before a reap counts a failed refresh.
    pub pending_manifest_ttl: Duration,
    /// Drift threshold for the high-drift flag.
    pub high_drift: Duration,
    /// Samples in the playback-health trend window.
    pub trend_window: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target_refresh: Duration::from_secs(6),
            inflight_ttl: Duration::from_secs(INFLIGHT_TTL_SECS as u64),
            pending_manifest_ttl: Duration::from_secs(PENDING_MANIFEST_TTL_SECS as u64),
            high_drift: HIGH_DRIFT,
            trend_window: DEFAULT_TREND_WINDOW,
        }
    }
}

/// State private to the debug-event path (single writer: the stderr parser).
#[derive(Debug, Default)]
struct DebugState {
    /// Timestamp of the most recent segment PlaylistOpen; the next one
    /// closes the interval and yields a wall-time sample.
    current_segment: Option<(String, DateTime<Utc>)>,
    /// Manifests opened but not yet followed by a segment request,
    /// oldest first.
    pending_manifests: VecDeque<(String, DateTime<Utc>)>,
    /// Last PlaylistOpen per manifest URL, for refresh-jitter intervals.
    last_playlist_open: HashMap<String, DateTime<Utc>>,
    /// TCP connects started but not yet observed to finish.
    pending_tcp: HashMap<(String, u16), DateTime<Utc>>,
    /// Whether this run has connected at least once (reconnect detection).
    connected_once: bool,
    jitter_sum_ms: f64,
    jitter_count: u64,
    jitter_max_ms: f64,
}

/// State private to the progress path (single writer: the progress parser,
/// plus the supervisor at run boundaries).
#[derive(Debug)]
struct ProgressState {
    run_started: Option<Instant>,
    last_progress: Option<Instant>,
    health: HealthTracker,
}

#[derive(Debug, Default, Clone, Copy)]
struct StreamTotals {
    lines_read: u64,
    lines_parsed: u64,
    lines_dropped: u64,
    bytes_read: u64,
    peak_drop_rate: f64,
}

impl StreamTotals {
    fn absorb(&mut self, stats: &PipelineStats) {
        let snap = stats.snapshot();
        self.lines_read += snap.lines_read;
        self.lines_parsed += snap.lines_parsed;
        self.lines_dropped += snap.lines_dropped;
        self.bytes_read += snap.bytes_read;
        self.peak_drop_rate = self.peak_drop_rate.max(snap.peak_drop_rate);
    }
}

#[derive(Debug, Default)]
struct PipelineSlot {
    current: Option<Arc<PipelineStats>>,
    totals: StreamTotals,
}

impl PipelineSlot {
    fn attach(&mut self, stats: Arc<PipelineStats>) {
        self.fold();
        self.current = Some(stats);
    }

    fn fold(&mut self) {
        if let Some(stats) = self.current.take() {
            self.totals.absorb(&stats);
        }
    }

    fn health(&self) -> StreamHealth {
        let mut totals = self.totals;
        if let Some(stats) = &self.current {
            totals.absorb(stats);
        }
        let drop_rate = if totals.lines_read == 0 {
            0.0
        } else {
            totals.lines_dropped as f64 / totals.lines_read as f64
        };
        StreamHealth {
            lines_read: totals.lines_read,
            lines_parsed: totals.lines_parsed,
            lines_dropped: totals.lines_dropped,
            bytes_read: totals.bytes_read,
            drop_rate,
            peak_drop_rate: totals.peak_drop_rate.max(drop_rate),
        }
    }
}

/// Lifetime pipeline accounting for one stream, across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StreamHealth {
    pub lines_read: u64,
    pub lines_parsed: u64,
    pub lines_dropped: u64,
    pub bytes_read: u64,
    pub drop_rate: f64,
    pub peak_drop_rate: f64,
}

/// TCP health counters plus the sparse connect-latency summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TcpSummary {
    pub attempts: u64,
    pub success: u64,
    pub refused: u64,
    pub timeout: u64,
    pub error: u64,
    /// success / (success + refused + timeout); 1.0 with nothing observed.
    pub health_ratio: f64,
    pub connect: RunningSummary,
}

/// Point-in-time copy of one client, cheap to clone into snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    pub id: u32,
    pub state: ClientState,
    pub health: PlaybackHealth,
    pub health_trend: f64,
    pub speed: f64,
    pub score: f64,
    pub drift_ms: i64,
    pub max_drift_ms: i64,
    pub high_drift: bool,
    pub unhealthy: bool,
    pub total_bytes: u64,
    pub frames: u64,
    pub fps: f64,
    pub manifest_requests: u64,
    pub segment_requests: u64,
    pub unknown_requests: u64,
    pub http_errors: BTreeMap<u16, u64>,
    pub reconnections: u64,
    pub timeouts: u64,
    pub starts: u64,
    pub restarts: u64,
    pub exits_success: u64,
    pub exits_error: u64,
    pub exits_signal: u64,
    pub exit_codes: BTreeMap<i32, u64>,
    pub sequence_skips: u64,
    pub late_refreshes: u64,
    pub failed_refreshes: u64,
    pub stall_events: u64,
    pub total_stall_secs: f64,
    pub inflight: usize,
    pub segment_latency: LatencySummary,
    pub manifest_latency: LatencySummary,
    pub tcp: TcpSummary,
    pub request_completion: RunningSummary,
    pub jitter_avg_ms: f64,
    pub jitter_max_ms: f64,
    pub progress_pipeline: StreamHealth,
    pub stderr_pipeline: StreamHealth,
    pub socket_mode_failed: bool,
}

/// All quality metrics for one supervised child.
pub struct ClientStats {
    id: u32,
    cfg: ClientConfig,

    state: AtomicU8,
    unhealthy: AtomicBool,
    socket_mode_failed: AtomicBool,

    // Request counters by URL class.
    manifest_requests: AtomicU64,
    segment_requests: AtomicU64,
    unknown_requests: AtomicU64,

    // HTTP errors keyed by status code.
    http_errors: Mutex<BTreeMap<u16, u64>>,

    // Lifecycle.
    starts: AtomicU64,
    restarts: AtomicU64,
    exits_success: AtomicU64,
    exits_error: AtomicU64,
    exits_signal: AtomicU64,
    exit_codes: Mutex<BTreeMap<i32, u64>>,

    // Bytes. The child resets `total_size` every restart, so the lifetime
    // total is the previous-runs accumulator plus the live process value.
    bytes_previous_runs: AtomicU64,
    bytes_current: AtomicU64,

    // Progress gauges.
    frames: AtomicU64,
    fps_bits: AtomicU64,
    speed_bits: AtomicU64,
    score_bits: AtomicU64,
    out_time_us: AtomicI64,
    drift_ms: AtomicI64,
    max_drift_ms: AtomicI64,
    health: AtomicU8,
    stall_events: AtomicU64,

    // Reliability counters.
    timeouts: AtomicU64,
    reconnections: AtomicU64,
    sequence_skips: AtomicU64,
    late_refreshes: AtomicU64,
    failed_refreshes: AtomicU64,

    // TCP.
    tcp_attempts: AtomicU64,
    tcp_success: AtomicU64,
    tcp_refused: AtomicU64,
    tcp_timeout: AtomicU64,
    tcp_error: AtomicU64,
    tcp_connect: RunningLatency,

    // Latency distributions.
    segment_latency: LatencySketch,
    manifest_latency: LatencySketch,
    request_completion: RunningLatency,

    inflight: InflightMap,

    debug_state: Mutex<DebugState>,
    progress_state: Mutex<ProgressState>,
    pipelines: Mutex<(PipelineSlot, PipelineSlot)>,
}

impl ClientStats {
    pub fn new(id: u32, cfg: ClientConfig) -> Self {
        let trend_window = cfg.trend_window;
        Self {
            id,
            cfg,
            state: AtomicU8::new(ClientState::Created.to_u8()),
            unhealthy: AtomicBool::new(false),
            socket_mode_failed: AtomicBool::new(false),
            manifest_requests: AtomicU64::new(0),
            segment_requests: AtomicU64::new(0),
            unknown_requests: AtomicU64::new(0),
            http_errors: Mutex::new(BTreeMap::new()),
            starts: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            exits_success: AtomicU64::new(0),
            exits_error: AtomicU64::new(0),
            exits_signal: AtomicU64::new(0),
            exit_codes: Mutex::new(BTreeMap::new()),
            bytes_previous_runs: AtomicU64::new(0),
            bytes_current: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            fps_bits: AtomicU64::new(0),
            speed_bits: AtomicU64::new(0),
            score_bits: AtomicU64::new(0),
            out_time_us: AtomicI64::new(0),
            drift_ms: AtomicI64::new(0),
            max_drift_ms: AtomicI64::new(0),
            health: AtomicU8::new(PlaybackHealth::Perfect.to_u8()),
            stall_events: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            sequence_skips: AtomicU64::new(0),
            late_refreshes: AtomicU64::new(0),
            failed_refreshes: AtomicU64::new(0),
            tcp_attempts: AtomicU64::new(0),
            tcp_success: AtomicU64::new(0),
            tcp_refused: AtomicU64::new(0),
            tcp_timeout: AtomicU64::new(0),
            tcp_error: AtomicU64::new(0),
            tcp_connect: RunningLatency::new(),
            segment_latency: LatencySketch::new(),
            manifest_latency: LatencySketch::new(),
            request_completion: RunningLatency::new(),
            inflight: InflightMap::new(),
            debug_state: Mutex::new(DebugState::default()),
            progress_state: Mutex::new(ProgressState {
                run_started: None,
                last_progress: None,
                health: HealthTracker::new(trend_window),
            }),
            pipelines: Mutex::new((PipelineSlot::default(), PipelineSlot::default())),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    // --- lifecycle, called by the supervisor ---

    pub fn set_state(&self, state: ClientState) {
        self.state.store(state.to_u8(), Ordering::Relaxed);
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Must run before any byte of a new child is recorded: folds the dying
    /// process's byte count into the lifetime accumulator and resets all
    /// run-scoped inference state.
    pub fn on_process_start(&self) {
        let starts = self.starts.fetch_add(1, Ordering::Relaxed) + 1;
        if starts > 1 {
            self.restarts.fetch_add(1, Ordering::Relaxed);
        }

        let current = self.bytes_current.swap(0, Ordering::Relaxed);
        self.bytes_previous_runs.fetch_add(current, Ordering::Relaxed);

        let now = Instant::now();
        {
            let mut ps = self.progress_state.lock();
            ps.run_started = Some(now);
            ps.last_progress = None;
            ps.health.reset_window(now);
        }
        {
            let mut ds = self.debug_state.lock();
            ds.current_segment = None;
            ds.pending_manifests.clear();
            ds.last_playlist_open.clear();
            ds.pending_tcp.clear();
            ds.connected_once = false;
        }
        // Requests the dead process will never finish; the crash itself is
        // already accounted by the exit classification.
        self.inflight.clear();

        self.health
            .store(PlaybackHealth::Perfect.to_u8(), Ordering::Relaxed);
        self.drift_ms.store(0, Ordering::Relaxed);
        self.out_time_us.store(0, Ordering::Relaxed);
    }

    /// Register the freshly spawned run's pipelines so lifetime pipeline
    /// health spans restarts.
    pub fn attach_pipelines(&self, progress: Arc<PipelineStats>, stderr: Arc<PipelineStats>) {
        let mut slots = self.pipelines.lock();
        slots.0.attach(progress);
        slots.1.attach(stderr);
    }

    pub fn on_process_exit(&self, category: ExitCategory, code: Option<i32>, run: Duration) {
        match category {
            ExitCategory::Success => self.exits_success.fetch_add(1, Ordering::Relaxed),
            ExitCategory::Error => self.exits_error.fetch_add(1, Ordering::Relaxed),
            ExitCategory::Signal => self.exits_signal.fetch_add(1, Ordering::Relaxed),
        };
        if let Some(code) = code {
            *self.exit_codes.lock().entry(code).or_insert(0) += 1;
        }

        let mut slots = self.pipelines.lock();
        slots.0.fold();
        slots.1.fold();
        drop(slots);

        debug!(
            client = self.id,
            category = category.as_str(),
            run_secs = run.as_secs(),
            "child run ended"
        );
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::Relaxed);
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Relaxed)
    }

    pub fn mark_socket_mode_failed(&self) {
        self.socket_mode_failed.store(true, Ordering::Relaxed);
    }

    // --- progress path, called by the progress parser ---

    pub fn on_progress(&self, update: &ProgressUpdate) {
        self.frames.store(update.frame, Ordering::Relaxed);
        self.fps_bits
            .store(update.fps.to_bits(), Ordering::Relaxed);
        self.speed_bits
            .store(update.speed.to_bits(), Ordering::Relaxed);
        if update.total_size > 0 {
            self.bytes_current.store(update.total_size, Ordering::Relaxed);
        }
        self.out_time_us.store(update.out_time_us, Ordering::Relaxed);

        {
            let mut ps = self.progress_state.lock();
            let now = Instant::now();
            ps.last_progress = Some(now);

            if update.out_time_us > 0
                && let Some(started) = ps.run_started
            {
                let wall = now.duration_since(started);
                let playback = Duration::from_micros(update.out_time_us.max(0) as u64);

                let drift_ms = wall.as_millis() as i64 - playback.as_millis() as i64;
                self.drift_ms.store(drift_ms, Ordering::Relaxed);
                self.max_drift_ms.fetch_max(drift_ms, Ordering::Relaxed);

                let score = playback.as_secs_f64() / wall.as_secs_f64().max(1e-9);
                self.score_bits.store(score.to_bits(), Ordering::Relaxed);

                let health = ps.health.observe(score, now);
                self.health.store(health.to_u8(), Ordering::Relaxed);
                self.stall_events
                    .store(ps.health.stall_events(), Ordering::Relaxed);
            }
        }

        // Data flowed, so the oldest inflight fetch has finished; anything
        // past the TTL never will.
        let now_wall = Utc::now();
        if let Some((_url, latency)) = self.inflight.complete_oldest(now_wall) {
            self.request_completion
                .record(latency.num_milliseconds() as f64);
        }
        let ttl = chrono::Duration::seconds(self.cfg.inflight_ttl.as_secs() as i64);
        let reaped = self.inflight.reap_expired(now_wall, ttl);
        if reaped > 0 {
            self.timeouts.fetch_add(reaped, Ordering::Relaxed);
        }
    }

    /// Whether any progress block has arrived during the current run.
    pub fn progress_received(&self) -> bool {
        self.progress_state.lock().last_progress.is_some()
    }

    /// Time since the last progress block of the current run.
    pub fn progress_age(&self) -> Option<Duration> {
        self.progress_state.lock().last_progress.map(|t| t.elapsed())
    }

    // --- debug-event path, called by the stderr parser ---

    pub fn on_debug_event(&self, event: &DebugEvent) {
        match &event.kind {
            DebugEventKind::HlsRequest { url } => self.on_hls_request(url, event.at),
            DebugEventKind::PlaylistOpen { url } => self.on_playlist_open(url, event.at),
            DebugEventKind::TcpStart { ip, port } => {
                self.tcp_attempts.fetch_add(1, Ordering::Relaxed);
                self.debug_state
                    .lock()
                    .pending_tcp
                    .insert((ip.clone(), *port), event.at);
            }
            DebugEventKind::TcpConnected { ip, port } => {
                self.tcp_success.fetch_add(1, Ordering::Relaxed);
                let mut ds = self.debug_state.lock();
                if let Some(started) = ds.pending_tcp.remove(&(ip.clone(), *port)) {
                    let ms = (event.at - started).num_milliseconds() as f64;
                    self.tcp_connect.record(ms);
                }
                if ds.connected_once {
                    self.reconnections.fetch_add(1, Ordering::Relaxed);
                } else {
                    ds.connected_once = true;
                }
            }
            DebugEventKind::TcpFailed { reason } => {
                match reason {
                    TcpFailReason::Refused => self.tcp_refused.fetch_add(1, Ordering::Relaxed),
                    TcpFailReason::TimedOut => self.tcp_timeout.fetch_add(1, Ordering::Relaxed),
                    TcpFailReason::Error => self.tcp_error.fetch_add(1, Ordering::Relaxed),
                };
            }
            DebugEventKind::SequenceChange { old, new } => {
                let skipped = new.saturating_sub(*old).saturating_sub(1);
                if skipped > 0 {
                    self.sequence_skips.fetch_add(skipped, Ordering::Relaxed);
                }
            }
            DebugEventKind::HttpError { code } => {
                *self.http_errors.lock().entry(*code).or_insert(0) += 1;
            }
        }
    }

    fn on_hls_request(&self, url: &str, at: DateTime<Utc>) {
        match classify_url(url) {
            UrlKind::Manifest => {
                self.manifest_requests.fetch_add(1, Ordering::Relaxed);
            }
            UrlKind::Segment => {
                self.segment_requests.fetch_add(1, Ordering::Relaxed);
                self.inflight.insert(url, at);

                // The first segment request after a manifest open closes the
                // oldest pending manifest: the playlist has been fetched,
                // parsed, and acted on.
                let pending = self.debug_state.lock().pending_manifests.pop_front();
                if let Some((_murl, opened)) = pending {
                    let ms = (at - opened).num_milliseconds() as f64;
                    self.manifest_latency.record(ms);
                }
            }
            UrlKind::Unknown => {
                self.unknown_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_playlist_open(&self, url: &str, at: DateTime<Utc>) {
        match classify_url(url) {
            UrlKind::Segment => {
                let prev = {
                    let mut ds = self.debug_state.lock();
                    ds.current_segment.replace((url.to_string(), at))
                };
                if let Some((prev_url, prev_at)) = prev {
                    // Wall-time download of the previous segment. Robust
                    // under keep-alive: no TCP events involved.
                    let ms = (at - prev_at).num_milliseconds() as f64;
                    self.segment_latency.record(ms);

                    // Opening the next segment also means the previous
                    // request, if still tracked, has completed.
                    if let Some(latency) = self.inflight.complete(&prev_url, at) {
                        self.request_completion
                            .record(latency.num_milliseconds() as f64);
                    }
                }
            }
            UrlKind::Manifest => {
                let mut ds = self.debug_state.lock();

                if let Some(prev) = ds.last_playlist_open.insert(url.to_string(), at) {
                    let interval_ms = (at - prev).num_milliseconds() as f64;
                    let target_ms = self.cfg.target_refresh.as_secs_f64() * 1000.0;
                    let jitter = (interval_ms - target_ms).abs();
                    ds.jitter_sum_ms += jitter;
                    ds.jitter_count += 1;
                    ds.jitter_max_ms = ds.jitter_max_ms.max(jitter);
                    if interval_ms > target_ms * LATE_REFRESH_FACTOR {
                        self.late_refreshes.fetch_add(1, Ordering::Relaxed);
                    }
                }

                ds.pending_manifests.push_back((url.to_string(), at));

                // Refreshes that never led to a segment request.
                let ttl = chrono::Duration::seconds(self.cfg.pending_manifest_ttl.as_secs() as i64);
                while let Some((_, opened)) = ds.pending_manifests.front() {
                    if at - *opened > ttl {
                        ds.pending_manifests.pop_front();
                        self.failed_refreshes.fetch_add(1, Ordering::Relaxed);
                    } else {
                        break;
                    }
                }
            }
            UrlKind::Unknown => {}
        }
    }

    // --- read surface ---

    /// Lifetime bytes: previous runs plus the live process. Monotonic
    /// non-decreasing across restarts.
    pub fn total_bytes(&self) -> u64 {
        self.bytes_previous_runs.load(Ordering::Relaxed)
            + self.bytes_current.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> PlaybackHealth {
        PlaybackHealth::from_u8(self.health.load(Ordering::Relaxed))
    }

    pub fn unknown_requests(&self) -> u64 {
        self.unknown_requests.load(Ordering::Relaxed)
    }

    pub fn segment_latency(&self) -> &LatencySketch {
        &self.segment_latency
    }

    pub fn manifest_latency(&self) -> &LatencySketch {
        &self.manifest_latency
    }

    fn tcp_summary(&self) -> TcpSummary {
        let success = self.tcp_success.load(Ordering::Relaxed);
        let refused = self.tcp_refused.load(Ordering::Relaxed);
        let timeout = self.tcp_timeout.load(Ordering::Relaxed);
        let denominator = success + refused + timeout;
        TcpSummary {
            attempts: self.tcp_attempts.load(Ordering::Relaxed),
            success,
            refused,
            timeout,
            error: self.tcp_error.load(Ordering::Relaxed),
            health_ratio: if denominator == 0 {
                1.0
            } else {
                success as f64 / denominator as f64
            },
            connect: self.tcp_connect.summary(),
        }
    }

    /// Copy everything into an immutable summary. Locks are held only long
    /// enough to copy; no I/O happens under them.
    pub fn summary(&self) -> ClientSummary {
        let (progress_pipeline, stderr_pipeline) = {
            let slots = self.pipelines.lock();
            (slots.0.health(), slots.1.health())
        };

        let (health_trend, total_stall_secs) = {
            let ps = self.progress_state.lock();
            (ps.health.trend(), ps.health.total_stall_secs())
        };

        let (jitter_avg_ms, jitter_max_ms) = {
            let ds = self.debug_state.lock();
            let avg = if ds.jitter_count == 0 {
                0.0
            } else {
                ds.jitter_sum_ms / ds.jitter_count as f64
            };
            (avg, ds.jitter_max_ms)
        };

        let drift_ms = self.drift_ms.load(Ordering::Relaxed);

        ClientSummary {
            id: self.id,
            state: self.state(),
            health: self.health(),
            health_trend,
            speed: f64::from_bits(self.speed_bits.load(Ordering::Relaxed)),
            score: f64::from_bits(self.score_bits.load(Ordering::Relaxed)),
            drift_ms,
            max_drift_ms: self.max_drift_ms.load(Ordering::Relaxed),
            high_drift: drift_ms > self.cfg.high_drift.as_millis() as i64,
            unhealthy: self.is_unhealthy(),
            total_bytes: self.total_bytes(),
            frames: self.frames.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
            manifest_requests: self.manifest_requests.load(Ordering::Relaxed),
            segment_requests: self.segment_requests.load(Ordering::Relaxed),
            unknown_requests: self.unknown_requests.load(Ordering::Relaxed),
            http_errors: self.http_errors.lock().clone(),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            exits_success: self.exits_success.load(Ordering::Relaxed),
            exits_error: self.exits_error.load(Ordering::Relaxed),
            exits_signal: self.exits_signal.load(Ordering::Relaxed),
            exit_codes: self.exit_codes.lock().clone(),
            sequence_skips: self.sequence_skips.load(Ordering::Relaxed),
            late_refreshes: self.late_refreshes.load(Ordering::Relaxed),
            failed_refreshes: self.failed_refreshes.load(Ordering::Relaxed),
            stall_events: self.stall_events.load(Ordering::Relaxed),
            total_stall_secs,
            inflight: self.inflight.len(),
            segment_latency: self.segment_latency.summary(),
            manifest_latency: self.manifest_latency.summary(),
            tcp: self.tcp_summary(),
            request_completion: self.request_completion.summary(),
            jitter_avg_ms,
            jitter_max_ms,
            progress_pipeline,
            stderr_pipeline,
            socket_mode_failed: self.socket_mode_failed.load(Ordering::Relaxed),
        }
    }
}

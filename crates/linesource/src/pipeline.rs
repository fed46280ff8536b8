//! Lossy parsing pipeline: reader → bounded channel → parser.
//!
//! Three layers with one discipline: the reader side must never block on the
//! parser side. The reader pushes lines with a non-blocking send; when the
//! channel is full the line is dropped and counted. Only the reader closes
//! the channel (by dropping the sender), and the parser task exits when the
//! channel closes. That single mechanism is what keeps task counts bounded
//! across hundreds of supervised restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::source::LineSource;

/// Default bound for the reader → parser channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Default time a supervisor waits for buffered lines to be consumed.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumes lines at its own pace on the parser task.
pub trait LineParser: Send {
    fn parse_line(&mut self, line: &str);
}

impl<F> LineParser for F
where
    F: FnMut(&str) + Send,
{
    fn parse_line(&mut self, line: &str) {
        self(line)
    }
}

/// Shared counters for one pipeline.
///
/// `lines_read == lines_parsed + lines_dropped` holds once the pipeline has
/// drained; while lines are buffered in the channel the difference is exactly
/// the buffered count.
#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_read: AtomicU64,
    lines_parsed: AtomicU64,
    lines_dropped: AtomicU64,
    bytes_read: AtomicU64,
    /// Peak drop rate, stored as f64 bits.
    peak_drop_rate: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_parsed(&self) -> u64 {
        self.lines_parsed.load(Ordering::Relaxed)
    }

    pub fn lines_dropped(&self) -> u64 {
        self.lines_dropped.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Cumulative drop rate: dropped / read, 0.0 when nothing was read.
    pub fn drop_rate(&self) -> f64 {
        let read = self.lines_read();
        if read == 0 {
            return 0.0;
        }
        self.lines_dropped() as f64 / read as f64
    }

    /// Highest drop rate observed at any drop, remembered independently of
    /// the current rate.
    pub fn peak_drop_rate(&self) -> f64 {
        f64::from_bits(self.peak_drop_rate.load(Ordering::Relaxed))
    }

    /// True when the cumulative drop rate exceeds `threshold`.
    pub fn is_degraded(&self, threshold: f64) -> bool {
        self.drop_rate() > threshold
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            lines_read: self.lines_read(),
            lines_parsed: self.lines_parsed(),
            lines_dropped: self.lines_dropped(),
            bytes_read: self.bytes_read(),
            drop_rate: self.drop_rate(),
            peak_drop_rate: self.peak_drop_rate(),
        }
    }

    fn record_read(&self, bytes: u64) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_parsed(&self) {
        self.lines_parsed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.lines_dropped.fetch_add(1, Ordering::Relaxed);

        let rate = self.drop_rate();
        let mut current = self.peak_drop_rate.load(Ordering::Relaxed);
        while rate > f64::from_bits(current) {
            match self.peak_drop_rate.compare_exchange_weak(
                current,
                rate.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineSnapshot {
    pub lines_read: u64,
    pub lines_parsed: u64,
    pub lines_dropped: u64,
    pub bytes_read: u64,
    pub drop_rate: f64,
    pub peak_drop_rate: f64,
}

/// Non-blocking producer handle given to a [`LineSource`].
///
/// Dropping the sink closes the downstream channel; every exit path of a
/// source (normal return, error return, panic unwind, task abort) drops it,
/// which is the pipeline's termination contract.
pub struct LineSink {
    tx: mpsc::Sender<String>,
    stats: Arc<PipelineStats>,
}

impl LineSink {
    pub(crate) fn new(tx: mpsc::Sender<String>, stats: Arc<PipelineStats>) -> Self {
        Self { tx, stats }
    }

    /// Offer one line to the parser. Never waits: on a full channel the line
    /// is discarded and the drop counter advances.
    pub fn push(&self, line: String) {
        self.stats.record_read(line.len() as u64);
        match self.tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.stats.record_dropped(),
            // Parser gone; account the line as dropped rather than lose it
            // from the read/parsed/dropped balance.
            Err(TrySendError::Closed(_)) => self.stats.record_dropped(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

/// Outcome of draining a pipeline at supervisor shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Reader and parser both finished inside the drain window.
    Clean,
    /// The drain window elapsed and remaining tasks were aborted.
    TimedOut,
}

/// Builder for a reader → bounded channel → parser pipeline.
pub struct ParsePipeline {
    capacity: usize,
}

impl ParsePipeline {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Bound for the reader → parser channel. Sizing trades memory against
    /// drop rate under parser stalls.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Spawn the reader and parser tasks for `source` feeding `parser`.
    pub fn spawn<S, P>(self, mut source: S, mut parser: P) -> PipelineHandle
    where
        S: LineSource + 'static,
        P: LineParser + 'static,
    {
        let stats = Arc::new(PipelineStats::new());
        let (tx, mut rx) = mpsc::channel::<String>(self.capacity);

        let sink = LineSink {
            tx,
            stats: Arc::clone(&stats),
        };

        let reader = tokio::spawn(async move {
            source.run(sink).await;
        });

        let parser_stats = Arc::clone(&stats);
        let parser_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                parser.parse_line(&line);
                parser_stats.record_parsed();
            }
            debug!("parser exited on channel close");
        });

        PipelineHandle {
            stats,
            reader,
            parser: parser_task,
        }
    }
}

impl Default for ParsePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Running pipeline: one reader task, one parser task, shared stats.
pub struct PipelineHandle {
    stats: Arc<PipelineStats>,
    reader: JoinHandle<()>,
    parser: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Wait up to `timeout` for the reader to hit end-of-stream and the
    /// parser to consume whatever is buffered, then abort stragglers.
    pub async fn drain(mut self, timeout: Duration) -> DrainOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut outcome = DrainOutcome::Clean;

        if tokio::time::timeout_at(deadline, &mut self.reader)
            .await
            .is_err()
        {
            self.reader.abort();
            outcome = DrainOutcome::TimedOut;
        }

        if tokio::time::timeout_at(deadline, &mut self.parser)
            .await
            .is_err()
        {
            self.parser.abort();
            outcome = DrainOutcome::TimedOut;
        }

        outcome
    }

    /// Abort both tasks without waiting.
    pub fn abort(&self) {
        self.reader.abort();
        self.parser.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PipeLineSource;
    use std::sync::Mutex;

    fn feed(lines: &[&str]) -> PipeLineSource {
        let data = lines.join("\n").into_bytes();
        PipeLineSource::new(std::io::Cursor::new(data))
    }

    #[tokio::test]
    async fn parses_every_line_when_parser_keeps_up() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let handle = ParsePipeline::new().spawn(feed(&["a", "b", "c"]), move |line: &str| {
            seen_clone.lock().unwrap().push(line.to_string());
        });

        let outcome = handle.drain(Duration::from_secs(1)).await;
        assert_eq!(outcome, DrainOutcome::Clean);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drops_under_overload_and_keeps_accounting_exact() {
        let lines: Vec<String> = (0..1000).map(|i| format!("line-{i}")).collect();
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();

        let handle = ParsePipeline::new()
            .with_capacity(5)
            .spawn(feed(&refs), move |_line: &str| {
                std::thread::sleep(Duration::from_millis(10));
            });

        let stats = handle.stats();
        let _ = handle.drain(Duration::from_secs(10)).await;

        let snap = stats.snapshot();
        assert_eq!(snap.lines_read, 1000);
        assert_eq!(snap.lines_parsed + snap.lines_dropped, 1000);
        assert!(
            snap.lines_dropped >= 900,
            "expected heavy dropping, got {}",
            snap.lines_dropped
        );
        assert!(stats.is_degraded(0.01));
        assert!(snap.peak_drop_rate > 0.0);
    }

    #[tokio::test]
    async fn parser_terminates_after_reader_returns() {
        let handle = ParsePipeline::new().spawn(feed(&["only"]), |_line: &str| {});
        // Reader hits EOF immediately; the parser must exit inside the drain
        // window with no external signal.
        let outcome = handle.drain(Duration::from_secs(1)).await;
        assert_eq!(outcome, DrainOutcome::Clean);
    }

    #[tokio::test]
    async fn peak_drop_rate_is_remembered() {
        let stats = PipelineStats::new();
        stats.record_read(1);
        stats.record_dropped();
        let peak = stats.peak_drop_rate();
        assert!(peak >= 1.0);

        // Later reads lower the current rate but not the peak.
        for _ in 0..99 {
            stats.record_read(1);
        }
        assert!(stats.drop_rate() < peak);
        assert_eq!(stats.peak_drop_rate(), peak);
    }
}

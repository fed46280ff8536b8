//! Line-source contract and the pipe implementation.
//!
//! A supervisor drives every transport through the same four operations so
//! its run loop never branches on how lines arrive:
//!
//! - `run` reads until the source is exhausted and must release the
//!   downstream channel on every exit path (the [`LineSink`] is dropped on
//!   normal return, error return, and unwind alike);
//! - `ready` resolves once the source can accept data; the supervisor must
//!   observe it before starting the child, or a socket child may race the
//!   listener and see "connection refused";
//! - `close` is idempotent;
//! - `stats` reports bytes, lines and health.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tracing::warn;

use crate::Result;
use crate::pipeline::LineSink;
use crate::record::RecordReader;

/// Byte/line counters plus a health flag for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub bytes_read: u64,
    pub lines_read: u64,
    pub healthy: bool,
}

/// Shared counter cell behind [`SourceStats`].
#[derive(Debug, Default)]
pub(crate) struct SourceCounters {
    pub(crate) bytes: AtomicU64,
    pub(crate) lines: AtomicU64,
    pub(crate) healthy: AtomicBool,
}

impl SourceCounters {
    pub(crate) fn new() -> Arc<Self> {
        let counters = Self::default();
        counters.healthy.store(true, Ordering::Relaxed);
        Arc::new(counters)
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            bytes_read: self.bytes.load(Ordering::Relaxed),
            lines_read: self.lines.load(Ordering::Relaxed),
            healthy: self.healthy.load(Ordering::Relaxed),
        }
    }
}

/// Uniform contract over "things that emit lines".
#[async_trait]
pub trait LineSource: Send {
    /// Read lines until the source is exhausted, pushing each into `sink`.
    async fn run(&mut self, sink: LineSink);

    /// Resolves when the source can accept data from the child.
    async fn ready(&mut self) -> Result<()>;

    /// Release transport resources. Safe to call more than once.
    fn close(&mut self);

    fn stats(&self) -> SourceStats;
}

type DynRead = Box<dyn AsyncRead + Send + Unpin>;

/// Attach handle for a [`PipeLineSource`] created before its child exists.
///
/// The supervisor creates the source, spawns its pipeline, then spawns the
/// child and hands the captured stdout/stderr over through this handle.
/// Dropping the handle unattached makes `run` return immediately.
pub struct PipeAttach(oneshot::Sender<DynRead>);

impl PipeAttach {
    pub fn attach<R>(self, reader: R)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let _ = self.0.send(Box::new(reader));
    }
}

enum PipeState {
    /// Waiting for the child's pipe to be attached.
    Detached(oneshot::Receiver<DynRead>),
    Attached(DynRead),
    Done,
}

/// Line source over a child-process pipe (stdout or stderr).
///
/// A pipe is ready as soon as it exists: the OS buffers whatever the child
/// writes before the reader catches up, so `ready` never waits.
pub struct PipeLineSource {
    state: PipeState,
    counters: Arc<SourceCounters>,
    closed: bool,
}

impl PipeLineSource {
    /// Source over an already-open reader (tests, pre-spawned children).
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            state: PipeState::Attached(Box::new(reader)),
            counters: SourceCounters::new(),
            closed: false,
        }
    }

    /// Source whose reader arrives later, once the child has been spawned.
    pub fn detached() -> (Self, PipeAttach) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                state: PipeState::Detached(rx),
                counters: SourceCounters::new(),
                closed: false,
            },
            PipeAttach(tx),
        )
    }
}

#[async_trait]
impl LineSource for PipeLineSource {
    async fn run(&mut self, sink: LineSink) {
        let reader = match std::mem::replace(&mut self.state, PipeState::Done) {
            PipeState::Attached(reader) => reader,
            PipeState::Detached(rx) => match rx.await {
                Ok(reader) => reader,
                // Attach handle dropped: the child never materialized.
                // Returning drops the sink, which closes the channel.
                Err(_) => return,
            },
            PipeState::Done => return,
        };

        let mut records = RecordReader::new(reader);
        loop {
            if self.closed {
                break;
            }
            match records.next_record().await {
                Ok(Some(line)) => {
                    self.counters.lines.fetch_add(1, Ordering::Relaxed);
                    sink.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "pipe read failed; closing pipeline");
                    self.counters.healthy.store(false, Ordering::Relaxed);
                    break;
                }
            }
            self.counters
                .bytes
                .store(records.bytes_read(), Ordering::Relaxed);
        }
        self.counters
            .bytes
            .store(records.bytes_read(), Ordering::Relaxed);
    }

    async fn ready(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn stats(&self) -> SourceStats {
        self.counters.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ParsePipeline;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn pipe_is_immediately_ready() {
        let mut source = PipeLineSource::new(std::io::Cursor::new(Vec::<u8>::new()));
        assert!(source.ready().await.is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut source = PipeLineSource::new(std::io::Cursor::new(Vec::<u8>::new()));
        source.close();
        source.close();
        assert_eq!(source.stats().lines_read, 0);
    }

    #[tokio::test]
    async fn detached_source_reads_after_attach() {
        let (source, attach) = PipeLineSource::detached();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let handle = ParsePipeline::new().spawn(source, move |line: &str| {
            seen_clone.lock().unwrap().push(line.to_string());
        });

        attach.attach(std::io::Cursor::new(b"late\nlines\n".to_vec()));

        handle.drain(Duration::from_secs(1)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["late", "lines"]);
    }

    #[tokio::test]
    async fn dropped_attach_closes_pipeline() {
        let (source, attach) = PipeLineSource::detached();
        let handle = ParsePipeline::new().spawn(source, |_line: &str| {});
        drop(attach);

        let outcome = handle.drain(Duration::from_secs(1)).await;
        assert_eq!(outcome, crate::pipeline::DrainOutcome::Clean);
    }

    #[tokio::test]
    async fn source_counts_lines_and_bytes() {
        let mut source = PipeLineSource::new(std::io::Cursor::new(b"a\nbb\nccc\n".to_vec()));
        let stats = Arc::new(crate::pipeline::PipelineStats::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let sink = LineSink::new(tx, Arc::clone(&stats));

        source.run(sink).await;
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }

        assert_eq!(lines, vec!["a", "bb", "ccc"]);
        let s = source.stats();
        assert_eq!(s.lines_read, 3);
        assert_eq!(s.bytes_read, 9);
        assert!(s.healthy);
    }
}

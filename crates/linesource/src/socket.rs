//! Unix-domain-socket line source.
//!
//! Used for the child's structured progress channel (`-progress unix://…`).
//! The consumer listens; the child connects exactly once and writes
//! line-delimited progress until it exits. EOF on the child side ends the
//! reader.
//!
//! Socket files are cleaned up at three layers: a guard inside `run` (fires
//! on normal exit, error and task abort alike), the supervisor's own `close`
//! call after each run, and an orchestrator sweep of the socket directory at
//! shutdown. Removal is idempotent so the layers do not fight.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tracing::{debug, warn};

use crate::pipeline::LineSink;
use crate::record::RecordReader;
use crate::source::{LineSource, SourceCounters, SourceStats};
use crate::{Error, Result};

/// `sun_path` limit shared by the BSDs and small enough for Linux (108).
pub const MAX_SOCKET_PATH_LEN: usize = 104;

/// Remove a socket file, ignoring "already gone".
pub fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed socket file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove socket file"),
    }
}

/// Removes the socket file when dropped, including on task abort.
struct SocketCleanup(PathBuf);

impl Drop for SocketCleanup {
    fn drop(&mut self) {
        remove_socket_file(&self.0);
    }
}

/// Line source over a unix-domain stream socket.
#[derive(Debug)]
pub struct SocketLineSource {
    path: PathBuf,
    listener: Option<UnixListener>,
    counters: Arc<SourceCounters>,
    closed: bool,
}

impl SocketLineSource {
    /// Validate the path, clear any stale file left by a previous run, and
    /// bind the listener.
    ///
    /// Binding happens here, before the supervisor starts the child, so that
    /// `ready` can honestly report the listener is accepting.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let len = path.as_os_str().len();
        if len > MAX_SOCKET_PATH_LEN {
            return Err(Error::SocketPathTooLong {
                len,
                max: MAX_SOCKET_PATH_LEN,
            });
        }

        // A file already at the path means a previous process died without
        // cleanup; bind would fail with EADDRINUSE.
        if path.exists() {
            remove_socket_file(&path);
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            path,
            listener: Some(listener),
            counters: SourceCounters::new(),
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LineSource for SocketLineSource {
    async fn run(&mut self, sink: LineSink) {
        let _cleanup = SocketCleanup(self.path.clone());

        let Some(listener) = self.listener.take() else {
            return;
        };

        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "socket accept failed");
                self.counters.healthy.store(false, Ordering::Relaxed);
                return;
            }
        };

        let mut records = RecordReader::new(stream);
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
                    warn!(path = %self.path.display(), error = %e, "socket read failed");
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
        // Bound at construction; a queued connect from the child succeeds
        // from that point on.
        if self.listener.is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.listener = None;
        remove_socket_file(&self.path);
    }

    fn stats(&self) -> SourceStats {
        self.counters.stats()
    }
}

impl Drop for SocketLineSource {
    fn drop(&mut self) {
        remove_socket_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ParsePipeline;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    fn socket_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[tokio::test]
    async fn rejects_overlong_paths() {
        let long = "/tmp/".to_string() + &"x".repeat(MAX_SOCKET_PATH_LEN);
        let err = SocketLineSource::bind(long).unwrap_err();
        assert!(matches!(err, Error::SocketPathTooLong { .. }));
    }

    #[tokio::test]
    async fn removes_stale_file_before_bind() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir, "stale.sock");
        std::fs::write(&path, b"stale").unwrap();

        let source = SocketLineSource::bind(&path).unwrap();
        assert!(path.exists(), "bind should have replaced the stale file");
        drop(source);
        assert!(!path.exists(), "drop should remove the socket file");
    }

    #[tokio::test]
    async fn reads_lines_from_a_connecting_child() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir, "progress.sock");

        let mut source = SocketLineSource::bind(&path).unwrap();
        source.ready().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let handle = ParsePipeline::new().spawn(source, move |line: &str| {
            seen_clone.lock().unwrap().push(line.to_string());
        });

        // Child side: connect once, write, disconnect.
        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"frame=1\nprogress=continue\n").await.unwrap();
        drop(stream);

        let outcome = handle.drain(Duration::from_secs(2)).await;
        assert_eq!(outcome, crate::pipeline::DrainOutcome::Clean);
        assert_eq!(*seen.lock().unwrap(), vec!["frame=1", "progress=continue"]);
        assert!(!path.exists(), "run guard should remove the socket file");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir, "close.sock");

        let mut source = SocketLineSource::bind(&path).unwrap();
        source.close();
        assert!(!path.exists());
        source.close();
        assert!(!path.exists());
        assert!(source.ready().await.is_err());
    }

    #[tokio::test]
    async fn abort_during_accept_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(&dir, "abort.sock");

        let source = SocketLineSource::bind(&path).unwrap();
        let handle = ParsePipeline::new().spawn(source, |_line: &str| {});

        // Nobody ever connects; the drain window forces an abort and the
        // in-task guard must still remove the file.
        let outcome = handle.drain(Duration::from_millis(100)).await;
        assert_eq!(outcome, crate::pipeline::DrainOutcome::TimedOut);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!path.exists());
    }
}

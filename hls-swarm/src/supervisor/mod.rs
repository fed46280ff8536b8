//! Supervisor: lifecycle of one player child.
//!
//! `Created → Starting → Running → Backoff → (Starting | Stopped)`, terminal
//! on cancellation. Each run wires two lossy pipelines (progress + stderr),
//! observes source readiness before the child starts, waits for exit or
//! cancellation, drains the pipelines inside a bounded window, classifies
//! the exit, and sleeps out the backoff before looping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ffmpeg_events::{DebugEventParser, ProgressParser};
use linesource::{DrainOutcome, LineSource, ParsePipeline, PipeAttach, PipeLineSource, PipelineHandle};
use swarm_stats::{ClientState, ClientStats, ExitCategory};
use tokio::io::AsyncWriteExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use linesource::SocketLineSource;

pub mod backoff;
pub mod command;

pub use backoff::Backoff;
pub use command::{ProgressTarget, build_args, build_child_command};

use crate::config::SwarmConfig;

/// Bounded wait for parsers to consume buffered lines after child exit.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Time a cancelled child gets to honor the graceful `q` before a kill.
pub const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// First progress must arrive within this window, else the next run falls
/// back from socket to pipe transport.
pub const FIRST_PROGRESS_TIMEOUT: Duration = Duration::from_secs(10);

/// After the first progress, silence beyond this marks the client unhealthy.
pub const PROGRESS_STALE_TIMEOUT: Duration = Duration::from_secs(30);

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// What one child run produced.
#[derive(Debug, Clone, Copy)]
struct RunOutcome {
    category: ExitCategory,
    run: Duration,
}

/// Supervises one child: spawn, watch, restart with backoff.
pub struct Supervisor {
    id: u32,
    cfg: Arc<SwarmConfig>,
    stats: Arc<ClientStats>,
    token: CancellationToken,
    backoff: Backoff,
    /// Set when socket transport misbehaved; the next run uses the pipe.
    force_pipe: bool,
}

impl Supervisor {
    pub fn new(
        id: u32,
        cfg: Arc<SwarmConfig>,
        stats: Arc<ClientStats>,
        token: CancellationToken,
    ) -> Self {
        let backoff = Backoff::new(id, cfg.seed);
        Self {
            id,
            cfg,
            stats,
            token,
            backoff,
            force_pipe: false,
        }
    }

    /// Run until the token cancels. Consumes the supervisor; the manager
    /// holds only the `ClientStats` handle.
    pub async fn run(mut self) {
        debug!(client = self.id, "supervisor started");

        loop {
            if self.token.is_cancelled() {
                break;
            }

            self.stats.set_state(ClientState::Starting);
            let outcome = self.run_once().await;
            if self.token.is_cancelled() {
                break;
            }

            self.backoff.observe_run(outcome.run, outcome.category);
            // Only error exits advance the failure series; clean exits and
            // signals restart at the current level.
            let delay = if outcome.category == ExitCategory::Error {
                self.backoff.next()
            } else {
                self.backoff.current()
            };

            debug!(
                client = self.id,
                category = outcome.category.as_str(),
                attempts = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "restarting after backoff"
            );
            self.stats.set_state(ClientState::Backoff);
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.stats.set_state(ClientState::Stopped);
        debug!(client = self.id, "supervisor stopped");
    }

    /// One full child run: pipelines up, sources ready, child spawned,
    /// watched to exit, pipelines drained, exit classified.
    async fn run_once(&mut self) -> RunOutcome {
        self.stats.on_process_start();

        let (progress_handle, progress_attach, target) = self.setup_progress().await;

        let (stderr_src, stderr_attach) = PipeLineSource::detached();
        let stderr_handle = self.spawn_stderr_pipeline(stderr_src);

        self.stats
            .attach_pipelines(progress_handle.stats(), stderr_handle.stats());

        let mut cmd = build_child_command(&self.cfg, self.id, target);
        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(client = self.id, error = %e, "failed to spawn player child");
                drop(progress_attach);
                drop(stderr_attach);
                self.drain_pipelines(progress_handle, stderr_handle, target).await;
                self.stats
                    .on_process_exit(ExitCategory::Error, None, Duration::ZERO);
                return RunOutcome {
                    category: ExitCategory::Error,
                    run: Duration::ZERO,
                };
            }
        };
        self.stats.set_state(ClientState::Running);

        if let Some(attach) = progress_attach
            && let Some(stdout) = child.stdout.take()
        {
            attach.attach(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            stderr_attach.attach(stderr);
        }

        let status = self.watch_child(&mut child, started).await;

        let run = started.elapsed();
        let (category, code) = classify_exit(status);

        self.drain_pipelines(progress_handle, stderr_handle, target).await;
        self.stats.on_process_exit(category, code, run);

        RunOutcome { category, run }
    }

    /// Progress pipeline over the configured transport. Socket failures fall
    /// back to the pipe for this run and are marked on the stats.
    async fn setup_progress(&mut self) -> (PipelineHandle, Option<PipeAttach>, ProgressTarget) {
        #[cfg(unix)]
        if matches!(self.cfg.transport, crate::cli::TransportMode::Socket)
            && !self.force_pipe
            && self.cfg.stats_enabled
        {
            match SocketLineSource::bind(self.cfg.socket_path(self.id)) {
                Ok(mut source) => match source.ready().await {
                    // The listener accepts before the child exists, so the
                    // child cannot race it and see "connection refused".
                    Ok(()) => {
                        return (
                            self.spawn_progress_pipeline(source),
                            None,
                            ProgressTarget::Socket,
                        );
                    }
                    Err(e) => {
                        warn!(client = self.id, error = %e, "socket source not ready; using pipe for this run");
                        self.stats.mark_socket_mode_failed();
                    }
                },
                Err(e) => {
                    warn!(client = self.id, error = %e, "socket bind failed; using pipe for this run");
                    self.stats.mark_socket_mode_failed();
                }
            }
        }

        let (source, attach) = PipeLineSource::detached();
        (
            self.spawn_progress_pipeline(source),
            Some(attach),
            ProgressTarget::Stdout,
        )
    }

    fn spawn_progress_pipeline(&self, source: impl LineSource + 'static) -> PipelineHandle {
        let pipeline = ParsePipeline::new().with_capacity(self.cfg.buffer_lines);
        if self.cfg.stats_enabled {
            let stats = Arc::clone(&self.stats);
            pipeline.spawn(source, ProgressParser::new(move |update| {
                stats.on_progress(&update);
            }))
        } else {
            pipeline.spawn(source, |_line: &str| {})
        }
    }

    fn spawn_stderr_pipeline(&self, source: impl LineSource + 'static) -> PipelineHandle {
        let pipeline = ParsePipeline::new().with_capacity(self.cfg.buffer_lines);
        if self.cfg.stats_enabled {
            let stats = Arc::clone(&self.stats);
            pipeline.spawn(source, DebugEventParser::new(move |event| {
                stats.on_debug_event(&event);
            }))
        } else {
            pipeline.spawn(source, |_line: &str| {})
        }
    }

    /// Wait for the child to exit or the token to cancel, running the
    /// progress watchdog alongside. On cancellation the child gets a
    /// graceful `q`, then a bounded wait, then a kill.
    async fn watch_child(
        &mut self,
        child: &mut tokio::process::Child,
        started: Instant,
    ) -> Option<std::process::ExitStatus> {
        let mut stdin = child.stdin.take();
        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut no_progress_logged = false;

        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => return Some(status),
                        Err(e) => {
                            warn!(client = self.id, error = %e, "error waiting for child");
                            return None;
                        }
                    }
                }
                _ = self.token.cancelled() => {
                    debug!(client = self.id, "stop requested, sending 'q' for graceful exit");
                    if let Some(mut stdin) = stdin.take() {
                        let _ = stdin.write_all(b"q").await;
                        let _ = stdin.flush().await;
                        let _ = stdin.shutdown().await;
                    }
                    match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                        Ok(Ok(status)) => return Some(status),
                        Ok(Err(e)) => {
                            warn!(client = self.id, error = %e, "error waiting for child after stop request");
                            return None;
                        }
                        Err(_) => {
                            warn!(client = self.id, "child ignored graceful stop; killing");
                            let _ = child.kill().await;
                            return child.wait().await.ok();
                        }
                    }
                }
                _ = watchdog.tick(), if self.cfg.stats_enabled => {
                    self.watchdog_tick(started, &mut no_progress_logged);
                }
            }
        }
    }

    fn watchdog_tick(&mut self, started: Instant, no_progress_logged: &mut bool) {
        if !self.stats.progress_received() {
            if started.elapsed() > FIRST_PROGRESS_TIMEOUT && !*no_progress_logged {
                warn!(
                    client = self.id,
                    waited_secs = started.elapsed().as_secs(),
                    "no_progress_received; falling back to pipe transport on next restart"
                );
                self.force_pipe = true;
                *no_progress_logged = true;
            }
            return;
        }

        match self.stats.progress_age() {
            Some(age) if age > PROGRESS_STALE_TIMEOUT => {
                if !self.stats.is_unhealthy() {
                    warn!(
                        client = self.id,
                        stale_secs = age.as_secs(),
                        "progress stale; marking client unhealthy"
                    );
                    self.stats.set_unhealthy(true);
                }
            }
            Some(_) => {
                if self.stats.is_unhealthy() {
                    info!(client = self.id, "progress resumed; client healthy again");
                    self.stats.set_unhealthy(false);
                }
            }
            None => {}
        }
    }

    async fn drain_pipelines(
        &self,
        progress: PipelineHandle,
        stderr: PipelineHandle,
        target: ProgressTarget,
    ) {
        let (p, s) = tokio::join!(
            progress.drain(DRAIN_TIMEOUT),
            stderr.drain(DRAIN_TIMEOUT)
        );
        if p == DrainOutcome::TimedOut || s == DrainOutcome::TimedOut {
            warn!(client = self.id, "pipeline drain timed out; tasks aborted");
        }

        // Second cleanup layer: the reader's own guard normally removes the
        // socket file, but an aborted reader may have been parked before
        // creating it.
        #[cfg(unix)]
        if target == ProgressTarget::Socket {
            linesource::socket::remove_socket_file(&self.cfg.socket_path(self.id));
        }
        #[cfg(not(unix))]
        let _ = target;
    }
}

fn classify_exit(status: Option<std::process::ExitStatus>) -> (ExitCategory, Option<i32>) {
    let Some(status) = status else {
        return (ExitCategory::Error, None);
    };
    if status.success() {
        return (ExitCategory::Success, Some(0));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGTERM / SIGINT are deliberate stops, not failures.
        if let Some(sig) = status.signal()
            && (sig == 15 || sig == 2)
        {
            return (ExitCategory::Signal, None);
        }
    }

    (ExitCategory::Error, status.code())
}

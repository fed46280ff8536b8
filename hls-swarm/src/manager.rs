//! Client manager: owns the fleet of supervisors.
//!
//! Supervisors are spawned on the ramp schedule into a `JoinSet`; shutdown
//! cancels the shared token and waits for every supervisor to return inside
//! a bounded window. The manager exclusively owns its supervisors; everyone
//! else sees only the `ClientStats` handles.

use std::sync::Arc;
use std::time::Duration;

use swarm_stats::{ClientState, ClientStats};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SwarmConfig;
use crate::ramp::RampScheduler;
use crate::supervisor::Supervisor;

/// The fleet.
pub struct ClientManager {
    cfg: Arc<SwarmConfig>,
    token: CancellationToken,
    clients: Vec<Arc<ClientStats>>,
    tasks: JoinSet<()>,
    ramp: RampScheduler,
}

impl ClientManager {
    /// Create the manager and every client's stats block up front; the
    /// aggregator can hold the full list before any supervisor runs.
    pub fn new(cfg: Arc<SwarmConfig>, token: CancellationToken) -> Self {
        let clients = (0..cfg.clients)
            .map(|id| Arc::new(ClientStats::new(id, cfg.client_config())))
            .collect();
        let ramp = RampScheduler::new(cfg.rate, cfg.ramp_jitter, cfg.seed);
        Self {
            cfg,
            token,
            clients,
            tasks: JoinSet::new(),
            ramp,
        }
    }

    /// Stats handles for the aggregator and the metrics endpoint.
    pub fn client_stats(&self) -> Vec<Arc<ClientStats>> {
        self.clients.clone()
    }

    /// Clients whose supervisor has not yet stopped.
    pub fn active_ids(&self) -> Vec<u32> {
        self.clients
            .iter()
            .filter(|c| c.state() != ClientState::Stopped)
            .map(|c| c.id())
            .collect()
    }

    /// Spawn one supervisor.
    pub fn start(&mut self, id: u32) {
        let Some(stats) = self.clients.get(id as usize) else {
            warn!(client = id, "start requested for unknown client id");
            return;
        };
        let supervisor = Supervisor::new(
            id,
            Arc::clone(&self.cfg),
            Arc::clone(stats),
            self.token.child_token(),
        );
        self.tasks.spawn(supervisor.run());
    }

    /// Ramp the whole fleet up at the configured rate. Returns early when
    /// the token cancels mid-ramp.
    pub async fn start_all(&mut self) {
        info!(
            clients = self.cfg.clients,
            rate = self.cfg.rate,
            "ramping up fleet"
        );
        for id in 0..self.cfg.clients {
            let delay = self.ramp.delay_before(id);
            tokio::select! {
                _ = self.token.cancelled() => {
                    info!(started = id, "ramp interrupted by shutdown");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            debug!(client = id, delay_ms = delay.as_millis() as u64, "starting client");
            self.start(id);
        }
        info!(clients = self.cfg.clients, "fleet ramp complete");
    }

    /// Cancel everything and wait for supervisors to drain, up to `timeout`.
    pub async fn shutdown(&mut self, timeout: Duration) {
        self.token.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(result)) => {
                    if let Err(e) = result
                        && !e.is_cancelled()
                    {
                        warn!(error = %e, "supervisor task failed");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.tasks.len(),
                        "shutdown window elapsed; aborting remaining supervisors"
                    );
                    self.tasks.abort_all();
                    break;
                }
            }
        }

        // Orchestrator-level socket sweep, the third cleanup layer.
        #[cfg(unix)]
        if matches!(self.cfg.transport, crate::cli::TransportMode::Socket) {
            for id in 0..self.cfg.clients {
                linesource::socket::remove_socket_file(&self.cfg.socket_path(id));
            }
        }

        self.log_exit_summary();
    }

    /// One-line exit summary, with the unknown-URL diagnostic footnote when
    /// it applies.
    fn log_exit_summary(&self) {
        let total_bytes: u64 = self.clients.iter().map(|c| c.total_bytes()).sum();
        let unknown: u64 = self.clients.iter().map(|c| c.unknown_requests()).sum();
        info!(
            clients = self.clients.len(),
            total_bytes, "swarm shut down"
        );
        if unknown > 0 {
            warn!(
                unknown_url_requests = unknown,
                "requests matched neither manifest nor segment patterns; URL classification may need new rules"
            );
        }
    }
}

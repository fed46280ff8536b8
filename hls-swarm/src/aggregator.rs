//! Aggregator task: periodic fold of all client stats into a published
//! snapshot.
//!
//! The snapshot travels on a `watch` channel as an `Arc`, so the metrics
//! endpoint and the dashboard each read the latest fold without touching
//! client state or blocking the fold.

use std::sync::Arc;
use std::time::Duration;

use swarm_stats::{AggregateSnapshot, Aggregator, ClientStats};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default fold cadence.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Spawn the aggregator loop; the returned receiver always holds the most
/// recent snapshot.
pub fn spawn_aggregator(
    clients: Vec<Arc<ClientStats>>,
    target_clients: usize,
    tick: Duration,
    degraded_threshold: f64,
    token: CancellationToken,
) -> watch::Receiver<Arc<AggregateSnapshot>> {
    let (tx, rx) = watch::channel(Arc::new(AggregateSnapshot::default()));

    tokio::spawn(async move {
        let mut aggregator = Aggregator::new(degraded_threshold);
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = aggregator.fold(&clients, target_clients);
                    // Receivers may all be gone during shutdown; that's fine.
                    let _ = tx.send(Arc::new(snapshot));
                }
            }
        }
        debug!("aggregator stopped");
    });

    rx
}

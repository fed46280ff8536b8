//! hls-swarm - HLS load-generation swarm.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hls_swarm::aggregator::{DEFAULT_TICK, spawn_aggregator};
use hls_swarm::cli::CliArgs;
use hls_swarm::config::SwarmConfig;
use hls_swarm::dashboard::Dashboard;
use hls_swarm::logging::init_logging;
use hls_swarm::manager::ClientManager;
use hls_swarm::metrics::MetricsServer;
use hls_swarm::preflight::run_preflight;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Bound on the whole shutdown sequence.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let cfg = match SwarmConfig::from_args(args) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("hls-swarm: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cfg.log_level, cfg.dashboard, &cfg.log_dir)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %cfg.url,
        clients = cfg.clients,
        "starting hls-swarm"
    );

    // Structural problems stop us here; nothing has been spawned yet.
    if let Err(e) = run_preflight(&cfg) {
        error!("{e}");
        eprintln!("hls-swarm: {e}");
        std::process::exit(1);
    }

    let root = CancellationToken::new();

    let mut manager = ClientManager::new(Arc::clone(&cfg), root.child_token());
    let clients = manager.client_stats();

    let snapshot_rx = spawn_aggregator(
        clients.clone(),
        cfg.clients as usize,
        DEFAULT_TICK,
        cfg.drop_threshold,
        root.child_token(),
    );

    let metrics_server = MetricsServer::new(
        cfg.metrics_addr,
        cfg.url.clone(),
        cfg.per_client_metrics,
        clients,
        snapshot_rx.clone(),
        root.child_token(),
    );
    let metrics_task = tokio::spawn(metrics_server.run());

    let dashboard_task = cfg.dashboard.then(|| {
        Dashboard::new(
            snapshot_rx.clone(),
            root.clone(),
            cfg.url.clone(),
            cfg.drop_threshold,
        )
        .spawn()
    });

    // Ramp, then supervise until told to stop.
    let manager_root = root.clone();
    let manager_task = tokio::spawn(async move {
        manager.start_all().await;
        manager_root.cancelled().await;
        manager.shutdown(SHUTDOWN_TIMEOUT).await;
    });

    // Wait for a stop condition: signal, duration elapsed, or the dashboard
    // cancelling the root token on 'q'.
    let duration = cfg.duration;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = wait_for_sigterm() => info!("received SIGTERM, shutting down"),
        _ = async {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        } => info!(duration_secs = duration.map(|d| d.as_secs()), "run duration elapsed"),
        _ = root.cancelled() => info!("shutdown requested"),
    }

    root.cancel();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT + Duration::from_secs(2), manager_task)
        .await
        .is_err()
    {
        warn!("manager did not finish inside the shutdown window");
    }

    match tokio::time::timeout(Duration::from_secs(2), metrics_task).await {
        Ok(Ok(Err(e))) => warn!("metrics endpoint error: {e}"),
        Ok(_) => {}
        Err(_) => warn!("metrics endpoint did not stop in time"),
    }

    if let Some(task) = dashboard_task
        && let Ok(Err(e)) = task.await
    {
        warn!("dashboard error: {e}");
    }

    info!("hls-swarm shutdown complete");
    Ok(())
}

/// Wait for SIGTERM (unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

//! Metrics endpoint: text-format metrics, liveness probe, JSON snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use swarm_stats::{AggregateSnapshot, ClientStats};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod exporter;

pub use exporter::MetricsExporter;

use crate::error::{Error, Result};

#[derive(Clone)]
struct MetricsState {
    snapshot_rx: watch::Receiver<Arc<AggregateSnapshot>>,
    exporter: Arc<MetricsExporter>,
}

/// Small HTTP server over the latest published snapshot.
pub struct MetricsServer {
    addr: SocketAddr,
    state: MetricsState,
    token: CancellationToken,
}

impl MetricsServer {
    pub fn new(
        addr: SocketAddr,
        target_url: impl Into<String>,
        per_client: bool,
        clients: Vec<Arc<ClientStats>>,
        snapshot_rx: watch::Receiver<Arc<AggregateSnapshot>>,
        token: CancellationToken,
    ) -> Self {
        let exporter = Arc::new(MetricsExporter::new(target_url, per_client, clients));
        Self {
            addr,
            state: MetricsState {
                snapshot_rx,
                exporter,
            },
            token,
        }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .route("/api/snapshot", get(snapshot_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the token cancels. Binding failure is a
    /// structural startup error.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Metrics(format!("cannot bind {}: {e}", self.addr)))?;
        info!("metrics endpoint listening on http://{}", self.addr);

        let token = self.token.clone();
        let router = self.build_router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                token.cancelled().await;
                info!("metrics endpoint shutting down");
            })
            .await
            .map_err(|e| Error::Metrics(format!("server error: {e}")))
    }
}

async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let snapshot = state.snapshot_rx.borrow().clone();
    let body = state.exporter.export(&snapshot);
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn snapshot_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    let snapshot = state.snapshot_rx.borrow().clone();
    axum::Json(snapshot.as_ref().clone())
}

//! Logging setup.
//!
//! Plain `tracing_subscriber::fmt` on stderr normally; when the dashboard
//! owns the terminal, log output moves to a non-blocking rolling file so the
//! TUI stays intact. `RUST_LOG` overrides the CLI level when set.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Default filter template; the configured level applies to our crates,
/// dependencies stay at warn.
fn default_filter(level: &str) -> String {
    format!(
        "warn,hls_swarm={level},linesource={level},ffmpeg_events={level},swarm_stats={level}"
    )
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::try_from_default_env()
            .map_err(|e| Error::config(format!("invalid RUST_LOG: {e}")));
    }
    EnvFilter::try_new(default_filter(level))
        .map_err(|e| Error::config(format!("invalid log level '{level}': {e}")))
}

/// Initialize logging. Returns a guard that must stay alive for the file
/// writer to flush; `None` in terminal mode.
pub fn init_logging(level: &str, dashboard: bool, log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(level)?;

    if dashboard {
        std::fs::create_dir_all(log_dir)?;
        let appender = tracing_appender::rolling::daily(log_dir, "hls-swarm.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(None)
    }
}

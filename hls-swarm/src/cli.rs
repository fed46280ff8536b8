//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// How the child's structured progress reaches the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// Progress on the child's stdout pipe.
    Pipe,
    /// Progress over a unix-domain socket (falls back to pipe on failure).
    Socket,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "hls-swarm",
    version,
    about = "HLS load-generation swarm: spawn N player clients against an origin and watch how they suffer",
    allow_negative_numbers = true
)]
pub struct CliArgs {
    /// HLS playlist URL to pull.
    #[arg(long, short = 'u', env = "SWARM_URL")]
    pub url: String,

    /// Number of concurrent player clients.
    #[arg(long, short = 'n', default_value_t = 10, env = "SWARM_CLIENTS")]
    pub clients: u32,

    /// Ramp-up rate in client starts per second.
    #[arg(long, default_value_t = 5.0)]
    pub rate: f64,

    /// Maximum per-client ramp jitter in milliseconds.
    #[arg(long, default_value_t = 200)]
    pub ramp_jitter_ms: u64,

    /// Run duration in seconds; 0 runs until interrupted.
    #[arg(long, short = 'd', default_value_t = 0)]
    pub duration_secs: u64,

    /// Seed for the deterministic per-client schedules (ramp and backoff).
    #[arg(long, default_value_t = 42, env = "SWARM_SEED")]
    pub seed: u64,

    /// Path to the player binary.
    #[arg(long, default_value = "ffmpeg", env = "SWARM_FFMPEG")]
    pub ffmpeg_path: String,

    /// Progress transport.
    #[arg(long, value_enum, default_value_t = TransportMode::Pipe)]
    pub transport: TransportMode,

    /// Directory for progress sockets (socket transport only).
    #[arg(long, default_value = "/tmp/hls-swarm")]
    pub socket_dir: PathBuf,

    /// Disable the stats pipelines entirely (pure load, no parsing).
    #[arg(long, default_value_t = false)]
    pub no_stats: bool,

    /// Pipeline drop rate above which metrics are flagged as degraded.
    #[arg(long, default_value_t = 0.01)]
    pub drop_threshold: f64,

    /// Bound of the reader → parser channel, in lines.
    #[arg(long, default_value_t = 1000)]
    pub buffer_lines: usize,

    /// Listen address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9920", env = "SWARM_METRICS_ADDR")]
    pub metrics_addr: String,

    /// Export the per-client metric tier (3·N series; keep N small).
    #[arg(long, default_value_t = false)]
    pub per_client_metrics: bool,

    /// Show the live terminal dashboard.
    #[arg(long, default_value_t = false)]
    pub dashboard: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SWARM_LOG")]
    pub log_level: String,

    /// Log directory, used when the dashboard owns the terminal.
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Expected manifest refresh interval (the segment duration), seconds.
    #[arg(long, default_value_t = 6.0)]
    pub target_refresh_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let args =
            CliArgs::try_parse_from(["hls-swarm", "--url", "http://origin/live.m3u8"]).unwrap();
        assert_eq!(args.clients, 10);
        assert_eq!(args.transport, TransportMode::Pipe);
        assert!(!args.dashboard);
    }

    #[test]
    fn url_is_required() {
        assert!(CliArgs::try_parse_from(["hls-swarm"]).is_err());
    }

    #[test]
    fn full_invocation() {
        let args = CliArgs::try_parse_from([
            "hls-swarm",
            "--url",
            "http://origin/live.m3u8",
            "-n",
            "500",
            "--rate",
            "10",
            "--transport",
            "socket",
            "--per-client-metrics",
            "--dashboard",
            "--duration-secs",
            "3600",
        ])
        .unwrap();
        assert_eq!(args.clients, 500);
        assert_eq!(args.transport, TransportMode::Socket);
        assert!(args.per_client_metrics);
        assert!(args.dashboard);
        assert_eq!(args.duration_secs, 3600);
    }
}

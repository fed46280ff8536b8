//! Validated runtime configuration, derived from the CLI surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use swarm_stats::ClientConfig;

use crate::cli::{CliArgs, TransportMode};
use crate::error::{Error, Result};

/// Everything the swarm needs to run, validated once at startup.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub url: String,
    pub clients: u32,
    pub rate: f64,
    pub ramp_jitter: Duration,
    /// `None` runs until interrupted.
    pub duration: Option<Duration>,
    pub seed: u64,
    pub ffmpeg_path: String,
    pub transport: TransportMode,
    pub socket_dir: PathBuf,
    pub stats_enabled: bool,
    pub drop_threshold: f64,
    pub buffer_lines: usize,
    pub metrics_addr: SocketAddr,
    pub per_client_metrics: bool,
    pub dashboard: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub target_refresh: Duration,
}

impl SwarmConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        if args.clients == 0 {
            return Err(Error::config("client count must be at least 1"));
        }
        if !args.rate.is_finite() || args.rate <= 0.0 {
            return Err(Error::config(format!(
                "ramp rate must be a positive number, got {}",
                args.rate
            )));
        }
        if args.url.trim().is_empty() {
            return Err(Error::config("target URL must not be empty"));
        }
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Err(Error::config(format!(
                "target URL must be http(s), got '{}'",
                args.url
            )));
        }
        if !args.drop_threshold.is_finite() || args.drop_threshold <= 0.0 {
            return Err(Error::config("drop threshold must be positive"));
        }
        if args.buffer_lines == 0 {
            return Err(Error::config("buffer size must be at least 1 line"));
        }
        let metrics_addr: SocketAddr = args
            .metrics_addr
            .parse()
            .map_err(|e| Error::config(format!("invalid metrics address '{}': {e}", args.metrics_addr)))?;
        if args.target_refresh_secs <= 0.0 {
            return Err(Error::config("target refresh interval must be positive"));
        }

        Ok(Self {
            url: args.url,
            clients: args.clients,
            rate: args.rate,
            ramp_jitter: Duration::from_millis(args.ramp_jitter_ms),
            duration: (args.duration_secs > 0).then(|| Duration::from_secs(args.duration_secs)),
            seed: args.seed,
            ffmpeg_path: args.ffmpeg_path,
            transport: args.transport,
            socket_dir: args.socket_dir,
            stats_enabled: !args.no_stats,
            drop_threshold: args.drop_threshold,
            buffer_lines: args.buffer_lines,
            metrics_addr,
            per_client_metrics: args.per_client_metrics,
            dashboard: args.dashboard,
            log_level: args.log_level,
            log_dir: args.log_dir,
            target_refresh: Duration::from_secs_f64(args.target_refresh_secs),
        })
    }

    /// Stats tunables shared by every client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            target_refresh: self.target_refresh,
            ..ClientConfig::default()
        }
    }

    /// Progress socket path for one client.
    pub fn socket_path(&self, client_id: u32) -> PathBuf {
        self.socket_dir.join(format!("client-{client_id}.sock"))
    }

    /// Per-client user agent, so origin-side captures can tell the fleet
    /// apart: `hls-swarm/<version>/client-<id>`.
    pub fn user_agent(&self, client_id: u32) -> String {
        format!(
            "hls-swarm/{}/client-{client_id}",
            env!("CARGO_PKG_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["hls-swarm", "--url", "http://origin/live.m3u8"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn accepts_defaults() {
        let cfg = SwarmConfig::from_args(args(&[])).unwrap();
        assert_eq!(cfg.clients, 10);
        assert!(cfg.stats_enabled);
        assert!(cfg.duration.is_none());
    }

    #[test]
    fn rejects_zero_clients() {
        let err = SwarmConfig::from_args(args(&["-n", "0"])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_bad_rate() {
        assert!(SwarmConfig::from_args(args(&["--rate", "0"])).is_err());
        assert!(SwarmConfig::from_args(args(&["--rate", "-3"])).is_err());
    }

    #[test]
    fn rejects_non_http_url() {
        let argv = ["hls-swarm", "--url", "file:///etc/passwd"];
        let args = CliArgs::try_parse_from(argv).unwrap();
        assert!(SwarmConfig::from_args(args).is_err());
    }

    #[test]
    fn rejects_bad_metrics_addr() {
        assert!(SwarmConfig::from_args(args(&["--metrics-addr", "nonsense"])).is_err());
    }

    #[test]
    fn duration_zero_means_forever() {
        let cfg = SwarmConfig::from_args(args(&["--duration-secs", "0"])).unwrap();
        assert!(cfg.duration.is_none());
        let cfg = SwarmConfig::from_args(args(&["--duration-secs", "60"])).unwrap();
        assert_eq!(cfg.duration, Some(Duration::from_secs(60)));
    }

    #[test]
    fn user_agent_carries_the_client_id() {
        let cfg = SwarmConfig::from_args(args(&[])).unwrap();
        assert!(cfg.user_agent(17).ends_with("/client-17"));
    }

    #[test]
    fn socket_paths_are_per_client() {
        let cfg = SwarmConfig::from_args(args(&[])).unwrap();
        assert_ne!(cfg.socket_path(1), cfg.socket_path(2));
    }
}

//! Startup preflight checks.
//!
//! Structural problems fail fast here, before a single child spawns:
//! a missing player binary, an unusable socket directory, or a fleet that
//! obviously does not fit in memory. Everything that can go wrong later is
//! recoverable and handled by the supervisors instead.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

use crate::cli::TransportMode;
use crate::config::SwarmConfig;
use crate::error::{Error, Result};

#[cfg(unix)]
use linesource::MAX_SOCKET_PATH_LEN;

/// Rough per-client memory cost: two sketches, two channel buffers, parser
/// state, child bookkeeping.
const PER_CLIENT_MEMORY_BYTES: u64 = 512 * 1024;

/// What preflight verified.
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub player_version: String,
    pub available_memory: u64,
    pub estimated_memory: u64,
}

/// Run every check; the first failure aborts startup.
pub fn run_preflight(cfg: &SwarmConfig) -> Result<PreflightReport> {
    let player_version = probe_player(&cfg.ffmpeg_path)?;
    check_socket_dir(cfg)?;
    let (available_memory, estimated_memory) = check_memory(cfg)?;

    info!(
        player = %player_version,
        clients = cfg.clients,
        estimated_memory,
        available_memory,
        "preflight passed"
    );
    Ok(PreflightReport {
        player_version,
        available_memory,
        estimated_memory,
    })
}

/// The player must exist and answer `-version`.
fn probe_player(path: &str) -> Result<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .map_err(|e| Error::preflight(format!("cannot run player binary '{path}': {e}")))?;

    if !output.status.success() {
        return Err(Error::preflight(format!(
            "player binary '{path}' exited with {:?} on -version",
            output.status.code()
        )));
    }

    String::from_utf8(output.stdout)
        .ok()
        .and_then(|s| s.lines().next().map(str::to_string))
        .ok_or_else(|| Error::preflight(format!("player binary '{path}' produced no version line")))
}

/// Socket transport needs a writable directory and paths that fit in
/// `sun_path` for the whole fleet.
fn check_socket_dir(cfg: &SwarmConfig) -> Result<()> {
    if !matches!(cfg.transport, TransportMode::Socket) {
        return Ok(());
    }

    #[cfg(not(unix))]
    return Err(Error::preflight(
        "socket transport requires a unix platform",
    ));

    #[cfg(unix)]
    {
        std::fs::create_dir_all(&cfg.socket_dir).map_err(|e| {
            Error::preflight(format!(
                "cannot create socket directory '{}': {e}",
                cfg.socket_dir.display()
            ))
        })?;

        let probe = cfg.socket_dir.join(".preflight");
        std::fs::write(&probe, b"ok").map_err(|e| {
            Error::preflight(format!(
                "socket directory '{}' is not writable: {e}",
                cfg.socket_dir.display()
            ))
        })?;
        let _ = std::fs::remove_file(&probe);

        // The longest path in the fleet is the highest client id.
        let longest = cfg.socket_path(cfg.clients.saturating_sub(1));
        let len = longest.as_os_str().len();
        if len > MAX_SOCKET_PATH_LEN {
            return Err(Error::preflight(format!(
                "socket path '{}' is {len} bytes, over the {MAX_SOCKET_PATH_LEN}-byte limit",
                longest.display()
            )));
        }
        Ok(())
    }
}

/// The stats engine should fit comfortably in available memory.
fn check_memory(cfg: &SwarmConfig) -> Result<(u64, u64)> {
    let system = System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
    );
    let available = system.available_memory();
    let estimated = cfg.clients as u64 * PER_CLIENT_MEMORY_BYTES;

    if available == 0 {
        // Some containers hide memory info; do not block on that.
        warn!("available memory unknown; skipping the memory check");
        return Ok((0, estimated));
    }
    if estimated > available {
        return Err(Error::preflight(format!(
            "{} clients need ≈{estimated} bytes but only {available} are available",
            cfg.clients
        )));
    }
    Ok((available, estimated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliArgs;
    use clap::Parser;

    fn config(extra: &[&str]) -> SwarmConfig {
        let mut argv = vec!["hls-swarm", "--url", "http://origin/live.m3u8"];
        argv.extend_from_slice(extra);
        SwarmConfig::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn missing_player_fails_preflight() {
        let cfg = config(&["--ffmpeg-path", "/nonexistent/definitely-not-ffmpeg"]);
        let err = run_preflight(&cfg).unwrap_err();
        assert!(matches!(err, Error::Preflight(_)));
    }

    #[cfg(unix)]
    #[test]
    fn overlong_socket_paths_fail_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("x".repeat(110));
        let cfg = config(&[
            "--transport",
            "socket",
            "--socket-dir",
            deep.to_str().unwrap(),
        ]);
        let err = check_socket_dir(&cfg).unwrap_err();
        assert!(err.to_string().contains("byte"));
    }

    #[cfg(unix)]
    #[test]
    fn pipe_transport_skips_the_socket_check() {
        let cfg = config(&["--socket-dir", "/root/definitely/not/writable"]);
        assert!(check_socket_dir(&cfg).is_ok());
    }

    #[test]
    fn memory_estimate_scales_with_fleet_size() {
        let small = check_memory(&config(&["-n", "1"])).unwrap();
        let large = check_memory(&config(&["-n", "100"])).unwrap();
        assert_eq!(large.1, small.1 * 100);
    }
}

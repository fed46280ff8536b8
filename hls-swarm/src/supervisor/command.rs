//! Child command construction.
//!
//! The argument template enables the two streams the stats engine consumes:
//! structured progress (`-progress pipe:1` or a unix socket) and a debug log
//! level on stderr for the event parser. The per-client identity rides in
//! the user agent so origin-side captures can correlate connections back to
//! a swarm member.

use std::process::Stdio;

use tokio::process::Command;

use crate::cli::TransportMode;
use crate::config::SwarmConfig;

/// Where the spawned child's progress stream lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressTarget {
    Stdout,
    Socket,
}

/// Argument vector for one client, exposed separately for logging and tests.
pub fn build_args(cfg: &SwarmConfig, client_id: u32, target: ProgressTarget) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-nostats".to_string()];

    if cfg.stats_enabled {
        args.extend(["-loglevel".to_string(), "debug".to_string()]);
        match target {
            ProgressTarget::Stdout => {
                args.extend(["-progress".to_string(), "pipe:1".to_string()]);
            }
            ProgressTarget::Socket => {
                let path = cfg.socket_path(client_id);
                args.extend([
                    "-progress".to_string(),
                    format!("unix://{}", path.display()),
                ]);
            }
        }
    } else {
        args.extend(["-loglevel".to_string(), "warning".to_string()]);
    }

    args.extend(["-user_agent".to_string(), cfg.user_agent(client_id)]);
    args.extend(["-i".to_string(), cfg.url.clone()]);

    // Pull and discard: copy the streams into the null muxer so the client
    // exercises the origin without paying for a decode.
    args.extend([
        "-c".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]);

    args
}

/// Build the ready-to-spawn command for one client.
pub fn build_child_command(cfg: &SwarmConfig, client_id: u32, target: ProgressTarget) -> Command {
    let args = build_args(cfg, client_id, target);

    let mut cmd = Command::new(&cfg.ffmpeg_path);
    cmd.args(&args)
        .env("LC_ALL", "C") // stable output format
        .stdin(Stdio::piped()) // graceful stop via 'q'
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match target {
        ProgressTarget::Stdout => cmd.stdout(Stdio::piped()),
        ProgressTarget::Socket => cmd.stdout(Stdio::null()),
    };

    cmd
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
    fn pipe_mode_routes_progress_to_stdout() {
        let args = build_args(&config(&[]), 3, ProgressTarget::Stdout);
        let joined = args.join(" ");
        assert!(joined.contains("-progress pipe:1"));
        assert!(joined.contains("-loglevel debug"));
        assert!(joined.contains("/client-3"));
        assert!(joined.ends_with("-c copy -f null -"));
    }

    #[test]
    fn socket_mode_routes_progress_to_the_socket() {
        let cfg = config(&["--transport", "socket"]);
        let args = build_args(&cfg, 7, ProgressTarget::Socket);
        let joined = args.join(" ");
        assert!(joined.contains("-progress unix://"));
        assert!(joined.contains("client-7.sock"));
    }

    #[test]
    fn stats_disabled_drops_the_debug_firehose() {
        let cfg = config(&["--no-stats"]);
        let args = build_args(&cfg, 0, ProgressTarget::Stdout);
        let joined = args.join(" ");
        assert!(!joined.contains("-progress"));
        assert!(joined.contains("-loglevel warning"));
    }

    #[test]
    fn input_url_follows_the_user_agent() {
        let args = build_args(&config(&[]), 0, ProgressTarget::Stdout);
        let ua_pos = args.iter().position(|a| a == "-user_agent").unwrap();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(ua_pos < input_pos, "input options must precede -i");
        assert_eq!(args[input_pos + 1], "http://origin/live.m3u8");
    }
}

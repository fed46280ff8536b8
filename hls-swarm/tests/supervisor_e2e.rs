//! Supervisor end-to-end against a scripted fake player.
//!
//! The script emits one structured progress block on stdout and a few
//! hls-demuxer-shaped debug lines on stderr, then blocks on stdin until the
//! graceful `q` arrives. That exercises the whole chain: command build,
//! pipeline wiring, both parsers, the stats engine, graceful stop, drain,
//! and exit classification.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use hls_swarm::cli::CliArgs;
use hls_swarm::config::SwarmConfig;
use hls_swarm::manager::ClientManager;
use hls_swarm::supervisor::Supervisor;
use swarm_stats::{
    Aggregator, ClientConfig, ClientState, ClientStats, DEFAULT_DEGRADED_THRESHOLD,
};

const FAKE_PLAYER: &str = r#"#!/bin/sh
printf "frame=25\nfps=25.0\nbitrate=1000.0kbits/s\ntotal_size=1048576\nout_time_us=1000000\nspeed=1.00x\nprogress=continue\n"
printf "[tcp @ 0x55d2] Starting connection attempt to 127.0.0.1 port 8080\n" >&2
printf "[tcp @ 0x55d2] Successfully connected to 127.0.0.1 port 8080\n" >&2
printf "[hls @ 0x55d1] HLS request for url 'http://origin/live/seg1.ts', offset 0, playlist 0\n" >&2
printf "[hls @ 0x55d1] Opening 'http://origin/live/seg1.ts' for reading\n" >&2
printf "[hls @ 0x55d1] Opening 'http://origin/live/seg2.ts' for reading\n" >&2
head -c 1 > /dev/null
exit 0
"#;

fn write_fake_player(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-player.sh");
    std::fs::write(&path, FAKE_PLAYER).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn config(player: &Path, extra: &[&str]) -> Arc<SwarmConfig> {
    let player = player.to_str().unwrap();
    let mut argv = vec![
        "hls-swarm",
        "--url",
        "http://origin/live/stream.m3u8",
        "--ffmpeg-path",
        player,
    ];
    argv.extend_from_slice(extra);
    Arc::new(SwarmConfig::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_supervised_run_captures_both_streams() {
    let dir = tempfile::tempdir().unwrap();
    let player = write_fake_player(dir.path());
    let cfg = config(&player, &[]);

    let stats = Arc::new(ClientStats::new(0, ClientConfig::default()));
    let token = CancellationToken::new();
    let task = tokio::spawn(
        Supervisor::new(0, cfg, Arc::clone(&stats), token.clone()).run(),
    );

    // Give the child time to emit and the parsers time to consume.
    tokio::time::sleep(Duration::from_millis(700)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("supervisor should stop after cancel")
        .unwrap();

    let summary = stats.summary();

    // Progress stream landed.
    assert_eq!(summary.frames, 25);
    assert_eq!(summary.total_bytes, 1_048_576);
    assert_eq!(summary.speed, 1.0);

    // Debug stream landed: one request, two opens, one TCP connect.
    assert_eq!(summary.segment_requests, 1);
    assert_eq!(summary.segment_latency.count, 1);
    assert_eq!(summary.tcp.success, 1);
    assert_eq!(summary.tcp.connect.count, 1);

    // The graceful 'q' produced a clean exit.
    assert_eq!(summary.exits_success, 1);
    assert_eq!(summary.state, ClientState::Stopped);

    // Pipeline accounting balances on both streams.
    let p = summary.progress_pipeline;
    assert!(p.lines_read >= 7);
    assert_eq!(p.lines_read, p.lines_parsed + p.lines_dropped);
    let s = summary.stderr_pipeline;
    assert!(s.lines_read >= 5);
    assert_eq!(s.lines_read, s.lines_parsed + s.lines_dropped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_small_fleet_ramps_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let player = write_fake_player(dir.path());
    let cfg = config(&player, &["-n", "3", "--rate", "50"]);

    let token = CancellationToken::new();
    let mut manager = ClientManager::new(cfg, token.clone());
    let clients = manager.client_stats();
    manager.start_all().await;

    tokio::time::sleep(Duration::from_millis(700)).await;

    let mut aggregator = Aggregator::new(DEFAULT_DEGRADED_THRESHOLD);
    let snap = aggregator.fold(&clients, 3);
    assert_eq!(snap.active_clients, 3);
    assert!(snap.total_bytes >= 3 * 1_048_576);
    assert_eq!(snap.clients_above_realtime, 3);

    manager.shutdown(Duration::from_secs(10)).await;

    let snap = aggregator.fold(&clients, 3);
    assert_eq!(snap.active_clients, 0);
    assert_eq!(snap.stopped_clients, 3);
    assert_eq!(snap.exits_success, 3);
}

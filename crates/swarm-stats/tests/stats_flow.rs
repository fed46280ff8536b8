//! From raw player output to inferred metrics, through the real parsers.

use std::sync::Arc;

use ffmpeg_events::{DebugEventParser, ProgressParser};
use linesource::LineParser;
use swarm_stats::{
    Aggregator, ClientConfig, ClientState, ClientStats, DEFAULT_DEGRADED_THRESHOLD,
};

fn drive_stderr(stats: &Arc<ClientStats>, lines: &[&str]) {
    let sink = {
        let stats = Arc::clone(stats);
        move |event| stats.on_debug_event(&event)
    };
    let mut parser = DebugEventParser::new(sink);
    for line in lines {
        parser.parse_line(line);
    }
}

fn drive_progress(stats: &Arc<ClientStats>, lines: &[&str]) {
    let sink = {
        let stats = Arc::clone(stats);
        move |update| stats.on_progress(&update)
    };
    let mut parser = ProgressParser::new(sink);
    for line in lines {
        parser.parse_line(line);
    }
}

#[test]
fn a_realistic_session_infers_every_metric_family() {
    let stats = Arc::new(ClientStats::new(0, ClientConfig::default()));
    stats.on_process_start();

    drive_stderr(
        &stats,
        &[
            // Connection setup.
            "12:00:00.000 [tcp @ 0x1] Starting connection attempt to 203.0.113.7 port 8080",
            "12:00:00.035 [tcp @ 0x1] Successfully connected to 203.0.113.7 port 8080",
            // First manifest fetch, answered by a segment request 80ms later.
            "12:00:00.100 [hls @ 0x2] Opening 'http://origin/live/stream.m3u8' for reading",
            "12:00:00.180 [hls @ 0x2] HLS request for url 'http://origin/live/seg100.ts', offset 0, playlist 0",
            // Segment fetch cadence: one open per second.
            "12:00:00.200 [hls @ 0x2] Opening 'http://origin/live/seg100.ts' for reading",
            "12:00:01.200 [hls @ 0x2] Opening 'http://origin/live/seg101.ts' for reading",
            "12:00:02.200 [hls @ 0x2] Opening 'http://origin/live/seg102.ts' for reading",
            // A manifest refresh on schedule.
            "12:00:06.100 [hls @ 0x2] Opening 'http://origin/live/stream.m3u8' for reading",
            "12:00:06.180 [hls @ 0x2] HLS request for url 'http://origin/live/seg103.ts', offset 0, playlist 0",
            // Origin trouble.
            "12:00:07.000 [hls @ 0x2] Media sequence change (103 -> 106)",
            "12:00:07.100 [https @ 0x3] HTTP error 404 Not Found",
            // Something the classifier has never seen.
            "12:00:07.200 [hls @ 0x2] HLS request for url 'http://origin/live/key', offset 0, playlist 0",
        ],
    );

    drive_progress(
        &stats,
        &[
            "frame=150",
            "fps=25.0",
            "bitrate=2000.0kbits/s",
            "total_size=2097152",
            "out_time_us=6000000",
            "speed=1.00x",
            "progress=continue",
        ],
    );

    let summary = stats.summary();

    // Request classification.
    assert_eq!(summary.segment_requests, 2);
    assert_eq!(summary.unknown_requests, 1);

    // Segment wall time: 3 opens, 2 one-second intervals.
    assert_eq!(summary.segment_latency.count, 2);
    assert!((summary.segment_latency.max_ms - 1000.0).abs() <= 1.0);

    // Manifest latency: both refreshes completed in 80ms.
    assert_eq!(summary.manifest_latency.count, 2);
    assert!((summary.manifest_latency.max_ms - 80.0).abs() <= 1.0);

    // TCP: one attempt, one success, 35ms connect.
    assert_eq!(summary.tcp.attempts, 1);
    assert_eq!(summary.tcp.health_ratio, 1.0);
    assert_eq!(summary.tcp.connect.count, 1);
    assert!((summary.tcp.connect.avg_ms - 35.0).abs() <= 1.0);

    // Playlist jitter: the 6s refresh interval matches the 6s target.
    assert!(summary.jitter_avg_ms < 150.0);

    // Origin-side damage.
    assert_eq!(summary.sequence_skips, 2);
    assert_eq!(summary.http_errors.get(&404), Some(&1));

    // Progress side.
    assert_eq!(summary.frames, 150);
    assert_eq!(summary.total_bytes, 2_097_152);
    assert_eq!(summary.speed, 1.0);
}

#[test]
fn restarts_preserve_lifetime_accounting() {
    let stats = Arc::new(ClientStats::new(1, ClientConfig::default()));

    stats.on_process_start();
    drive_progress(
        &stats,
        &["total_size=1000000000", "progress=continue"],
    );
    stats.on_process_exit(
        swarm_stats::ExitCategory::Error,
        Some(1),
        std::time::Duration::from_secs(3),
    );

    stats.on_process_start();
    drive_progress(&stats, &["total_size=500000000", "progress=continue"]);

    let summary = stats.summary();
    assert_eq!(summary.total_bytes, 1_500_000_000);
    assert_eq!(summary.starts, 2);
    assert_eq!(summary.restarts, 1);
    assert_eq!(summary.exits_error, 1);
}

#[test]
fn fleet_fold_counts_every_client_once() {
    let clients: Vec<Arc<ClientStats>> = (0..5)
        .map(|id| {
            let stats = Arc::new(ClientStats::new(id, ClientConfig::default()));
            stats.on_process_start();
            stats.set_state(ClientState::Running);
            let size_line = format!("total_size={}", (id as u64 + 1) * 1000);
            drive_progress(
                &stats,
                &[size_line.as_str(), "speed=1.10x", "progress=continue"],
            );
            stats
        })
        .collect();

    let mut aggregator = Aggregator::new(DEFAULT_DEGRADED_THRESHOLD);
    let snap = aggregator.fold(&clients, 5);

    assert_eq!(snap.active_clients, 5);
    assert_eq!(snap.total_bytes, 1000 + 2000 + 3000 + 4000 + 5000);
    assert_eq!(snap.clients_above_realtime, 5);
    let buckets = snap.health_buckets;
    assert_eq!(
        buckets.perfect + buckets.healthy + buckets.marginal + buckets.stalling,
        5
    );
    assert_eq!(snap.per_client.len(), 5);
    assert!(!snap.pipeline.metrics_degraded);
}

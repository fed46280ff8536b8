//! Prometheus text-format rendering.
//!
//! Two tiers keep cardinality sane: the aggregate tier is O(1) in fleet size
//! and always on; the per-client tier (3·N series) is opt-in for debugging
//! small fleets. Label value spaces are bounded by construction: HTTP status
//! codes, stream ∈ {progress, stderr}, exit ∈ {success, error, signal}.

use std::sync::Arc;

use swarm_stats::{
    AggregateSnapshot, ClientStats, LATENCY_BUCKETS_MS, LatencyAggregate, StreamKind,
};

/// Renders snapshots into the text exposition format.
pub struct MetricsExporter {
    namespace: String,
    target_url: String,
    per_client: bool,
    clients: Vec<Arc<ClientStats>>,
}

impl MetricsExporter {
    pub fn new(target_url: impl Into<String>, per_client: bool, clients: Vec<Arc<ClientStats>>) -> Self {
        Self {
            namespace: "hls_swarm".to_string(),
            target_url: target_url.into(),
            per_client,
            clients,
        }
    }

    /// Export the snapshot in Prometheus text format.
    pub fn export(&self, snap: &AggregateSnapshot) -> String {
        let mut out = String::with_capacity(8 * 1024);

        // Self-description.
        self.write_gauge_with_labels(
            &mut out,
            "info",
            "Build and run information",
            1.0,
            &[
                ("version", env!("CARGO_PKG_VERSION")),
                ("target_url", &self.target_url),
            ],
        );

        // Fleet.
        self.write_gauge(&mut out, "clients_target", "Configured fleet size", snap.target_clients as f64);
        self.write_gauge(&mut out, "clients_active", "Supervisors with a running child", snap.active_clients as f64);
        self.write_gauge(&mut out, "clients_backoff", "Supervisors waiting out a backoff", snap.backoff_clients as f64);
        self.write_gauge(&mut out, "clients_stopped", "Supervisors that have stopped", snap.stopped_clients as f64);
        self.write_gauge(&mut out, "clients_unhealthy", "Clients with stale progress", snap.unhealthy_clients as f64);

        // Requests and bytes.
        self.write_counter(&mut out, "manifest_requests_total", "Manifest requests observed", snap.manifest_requests as f64);
        self.write_counter(&mut out, "segment_requests_total", "Segment requests observed", snap.segment_requests as f64);
        self.write_counter(&mut out, "unknown_url_requests_total", "Requests matching neither manifest nor segment patterns", snap.unknown_requests as f64);
        self.write_counter(&mut out, "download_bytes_total", "Lifetime bytes downloaded across the fleet", snap.total_bytes as f64);

        self.write_gauge(&mut out, "manifest_rate", "Manifest requests per second", snap.manifest_rate);
        self.write_gauge(&mut out, "segment_rate", "Segment requests per second", snap.segment_rate);
        self.write_gauge(&mut out, "throughput_bytes_per_sec", "Download throughput", snap.throughput_bytes_per_sec);

        // Errors and reliability.
        for (code, count) in &snap.http_errors {
            self.write_counter_with_labels(
                &mut out,
                "http_errors_total",
                "HTTP errors by status code",
                *count as f64,
                &[("code", &code.to_string())],
            );
        }
        self.write_counter(&mut out, "reconnections_total", "TCP reconnections", snap.reconnections as f64);
        self.write_counter(&mut out, "timeouts_total", "Inflight requests reaped as timeouts", snap.timeouts as f64);
        self.write_counter(&mut out, "sequence_skips_total", "Media sequence numbers skipped by the origin", snap.sequence_skips as f64);
        self.write_counter(&mut out, "late_refreshes_total", "Playlist refreshes beyond 150% of target", snap.late_refreshes as f64);
        self.write_counter(&mut out, "failed_refreshes_total", "Playlist refreshes that never produced a segment request", snap.failed_refreshes as f64);
        self.write_counter(&mut out, "stall_events_total", "Transitions into the stalling bucket", snap.stall_events as f64);
        self.write_counter(&mut out, "restarts_total", "Child restarts", snap.restarts as f64);

        for (category, count) in [
            ("success", snap.exits_success),
            ("error", snap.exits_error),
            ("signal", snap.exits_signal),
        ] {
            self.write_counter_with_labels(
                &mut out,
                "child_exits_total",
                "Child exits by category",
                count as f64,
                &[("category", category)],
            );
        }

        // TCP health.
        self.write_counter(&mut out, "tcp_attempts_total", "TCP connection attempts", snap.tcp_attempts as f64);
        self.write_counter(&mut out, "tcp_success_total", "Successful TCP connections", snap.tcp_success as f64);
        for (reason, count) in [
            ("refused", snap.tcp_refused),
            ("timeout", snap.tcp_timeout),
            ("error", snap.tcp_error),
        ] {
            self.write_counter_with_labels(
                &mut out,
                "tcp_failures_total",
                "TCP connection failures by reason",
                count as f64,
                &[("reason", reason)],
            );
        }
        self.write_gauge(&mut out, "tcp_health_ratio", "TCP success ratio (1.0 with no attempts)", snap.tcp_health_ratio);
        self.write_gauge(&mut out, "tcp_connect_avg_ms", "Average TCP connect latency (sparse; keep-alive skips it)", snap.tcp_connect.avg_ms);

        // Playback.
        self.write_gauge(&mut out, "avg_speed", "Average playback-to-realtime ratio over active clients", snap.avg_speed);
        self.write_gauge(&mut out, "avg_drift_ms", "Average wall-clock drift", snap.avg_drift_ms);
        self.write_gauge(&mut out, "max_drift_ms", "Worst wall-clock drift", snap.max_drift_ms as f64);
        self.write_gauge(&mut out, "clients_above_realtime", "Clients at or above realtime", snap.clients_above_realtime as f64);
        self.write_gauge(&mut out, "clients_below_realtime", "Clients below realtime", snap.clients_below_realtime as f64);
        self.write_gauge(&mut out, "clients_stalled", "Clients in the stalling bucket", snap.clients_stalled as f64);
        self.write_gauge(&mut out, "clients_high_drift", "Clients beyond the drift threshold", snap.clients_high_drift as f64);
        for (bucket, count) in [
            ("perfect", snap.health_buckets.perfect),
            ("healthy", snap.health_buckets.healthy),
            ("marginal", snap.health_buckets.marginal),
            ("stalling", snap.health_buckets.stalling),
        ] {
            self.write_gauge_with_labels(
                &mut out,
                "clients_by_health",
                "Clients per playback-health bucket",
                count as f64,
                &[("health", bucket)],
            );
        }

        // Latency distributions.
        self.write_latency(&mut out, "manifest_download_ms", "Manifest download latency", &snap.manifest_latency, |c| c.manifest_latency().bucket_counts());
        self.write_latency(&mut out, "segment_download_ms", "Segment download wall time", &snap.segment_latency, |c| c.segment_latency().bucket_counts());
        self.write_gauge(&mut out, "playlist_jitter_avg_ms", "Average playlist refresh jitter", snap.jitter_avg_ms);
        self.write_gauge(&mut out, "playlist_jitter_max_ms", "Worst playlist refresh jitter", snap.jitter_max_ms);

        // Pipeline health.
        for (stream, read, dropped) in [
            (
                StreamKind::Progress,
                snap.pipeline.progress_lines_read,
                snap.pipeline.progress_lines_dropped,
            ),
            (
                StreamKind::Stderr,
                snap.pipeline.stderr_lines_read,
                snap.pipeline.stderr_lines_dropped,
            ),
        ] {
            self.write_counter_with_labels(&mut out, "pipeline_lines_read_total", "Lines read by the pipeline readers", read as f64, &[("stream", stream.as_str())]);
            self.write_counter_with_labels(&mut out, "pipeline_lines_dropped_total", "Lines dropped on full channels", dropped as f64, &[("stream", stream.as_str())]);
        }
        self.write_gauge(&mut out, "pipeline_drop_rate", "Aggregate drop rate", snap.pipeline.drop_rate);
        self.write_gauge(&mut out, "pipeline_peak_drop_rate", "Peak drop rate this run", snap.pipeline.peak_drop_rate);
        self.write_gauge(
            &mut out,
            "metrics_degraded",
            "1 when the drop rate exceeds the configured threshold",
            if snap.pipeline.metrics_degraded { 1.0 } else { 0.0 },
        );

        if self.per_client {
            self.write_per_client_tier(&mut out, snap);
        }

        out
    }

    /// Per-client tier: three series per client, opt-in.
    fn write_per_client_tier(&self, out: &mut String, snap: &AggregateSnapshot) {
        for row in &snap.per_client {
            let id = row.id.to_string();
            self.write_counter_with_labels(
                out,
                "client_bytes_total",
                "Lifetime bytes per client",
                row.total_bytes as f64,
                &[("client", &id)],
            );
            self.write_gauge_with_labels(
                out,
                "client_speed",
                "Playback-to-realtime ratio per client",
                row.speed,
                &[("client", &id)],
            );
            self.write_gauge_with_labels(
                out,
                "client_segment_p50_ms",
                "Median segment wall time per client",
                row.segment_latency.p50_ms,
                &[("client", &id)],
            );
        }
    }

    /// Histogram (`_bucket`/`_sum`/`_count`) plus pre-computed quantile
    /// gauges for dashboards without server-side quantile math.
    fn write_latency<F>(
        &self,
        out: &mut String,
        name: &str,
        help: &str,
        aggregate: &LatencyAggregate,
        buckets_of: F,
    ) where
        F: Fn(&ClientStats) -> Vec<u64>,
    {
        let full_name = format!("{}_{}", self.namespace, name);
        out.push_str(&format!("# HELP {} {}\n", full_name, help));
        out.push_str(&format!("# TYPE {} histogram\n", full_name));

        let mut totals = vec![0u64; LATENCY_BUCKETS_MS.len() + 1];
        for client in &self.clients {
            for (slot, count) in totals.iter_mut().zip(buckets_of(client)) {
                *slot += count;
            }
        }

        let mut cumulative = 0u64;
        for (bound, count) in LATENCY_BUCKETS_MS.iter().zip(&totals) {
            cumulative += count;
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                full_name, bound, cumulative
            ));
        }
        cumulative += totals.last().copied().unwrap_or(0);
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", full_name, cumulative));
        out.push_str(&format!(
            "{}_sum {}\n",
            full_name,
            aggregate.avg_ms * aggregate.count as f64
        ));
        out.push_str(&format!("{}_count {}\n", full_name, aggregate.count));

        let quantile_name = format!("{}_quantile", name);
        for (q, value) in [
            ("0.25", aggregate.p25_ms),
            ("0.5", aggregate.p50_ms),
            ("0.75", aggregate.p75_ms),
            ("0.95", aggregate.p95_ms),
            ("0.99", aggregate.p99_ms),
            ("1", aggregate.max_ms),
        ] {
            self.write_gauge_with_labels(
                out,
                &quantile_name,
                "Worst-tail quantiles across clients",
                value,
                &[("quantile", q)],
            );
        }
    }

    fn write_gauge(&self, out: &mut String, name: &str, help: &str, value: f64) {
        let full_name = format!("{}_{}", self.namespace, name);
        out.push_str(&format!("# HELP {} {}\n", full_name, help));
        out.push_str(&format!("# TYPE {} gauge\n", full_name));
        out.push_str(&format!("{} {}\n", full_name, value));
    }

    fn write_gauge_with_labels(
        &self,
        out: &mut String,
        name: &str,
        help: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        out.push_str(&format!("# HELP {} {}\n", full_name, help));
        out.push_str(&format!("# TYPE {} gauge\n", full_name));
        out.push_str(&format!(
            "{}{{{}}} {}\n",
            full_name,
            format_labels(labels),
            value
        ));
    }

    fn write_counter(&self, out: &mut String, name: &str, help: &str, value: f64) {
        let full_name = format!("{}_{}", self.namespace, name);
        out.push_str(&format!("# HELP {} {}\n", full_name, help));
        out.push_str(&format!("# TYPE {} counter\n", full_name));
        out.push_str(&format!("{} {}\n", full_name, value));
    }

    fn write_counter_with_labels(
        &self,
        out: &mut String,
        name: &str,
        help: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) {
        let full_name = format!("{}_{}", self.namespace, name);
        out.push_str(&format!("# HELP {} {}\n", full_name, help));
        out.push_str(&format!("# TYPE {} counter\n", full_name));
        out.push_str(&format!(
            "{}{{{}}} {}\n",
            full_name,
            format_labels(labels),
            value
        ));
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_stats::{Aggregator, ClientConfig, ClientState, DEFAULT_DEGRADED_THRESHOLD};

    fn exporter_with_one_client(per_client: bool) -> (MetricsExporter, AggregateSnapshot) {
        let client = Arc::new(ClientStats::new(0, ClientConfig::default()));
        client.on_process_start();
        client.set_state(ClientState::Running);
        client.segment_latency().record(120.0);
        client.segment_latency().record(480.0);

        let clients = vec![Arc::clone(&client)];
        let snap = Aggregator::new(DEFAULT_DEGRADED_THRESHOLD).fold(&clients, 1);
        (
            MetricsExporter::new("http://origin/live.m3u8", per_client, clients),
            snap,
        )
    }

    #[test]
    fn exports_info_and_core_series() {
        let (exporter, snap) = exporter_with_one_client(false);
        let out = exporter.export(&snap);

        assert!(out.contains("# HELP hls_swarm_info"));
        assert!(out.contains("target_url=\"http://origin/live.m3u8\""));
        assert!(out.contains("# TYPE hls_swarm_clients_active gauge"));
        assert!(out.contains("hls_swarm_clients_active 1"));
        assert!(out.contains("# TYPE hls_swarm_segment_requests_total counter"));
        assert!(out.contains("hls_swarm_metrics_degraded 0"));
    }

    #[test]
    fn histogram_has_buckets_sum_and_count() {
        let (exporter, snap) = exporter_with_one_client(false);
        let out = exporter.export(&snap);

        assert!(out.contains("# TYPE hls_swarm_segment_download_ms histogram"));
        // 120ms lands in le=250, 480ms in le=500; both cumulative at +Inf.
        assert!(out.contains("hls_swarm_segment_download_ms_bucket{le=\"250\"} 1"));
        assert!(out.contains("hls_swarm_segment_download_ms_bucket{le=\"500\"} 2"));
        assert!(out.contains("hls_swarm_segment_download_ms_bucket{le=\"+Inf\"} 2"));
        assert!(out.contains("hls_swarm_segment_download_ms_count 2"));
        assert!(out.contains("hls_swarm_segment_download_ms_quantile{quantile=\"0.5\"}"));
    }

    #[test]
    fn per_client_tier_is_opt_in() {
        let (exporter, snap) = exporter_with_one_client(false);
        assert!(!exporter.export(&snap).contains("client_bytes_total"));

        let (exporter, snap) = exporter_with_one_client(true);
        let out = exporter.export(&snap);
        assert!(out.contains("hls_swarm_client_bytes_total{client=\"0\"}"));
        assert!(out.contains("hls_swarm_client_speed{client=\"0\"}"));
        assert!(out.contains("hls_swarm_client_segment_p50_ms{client=\"0\"}"));
    }

    #[test]
    fn bounded_exit_category_labels() {
        let (exporter, snap) = exporter_with_one_client(false);
        let out = exporter.export(&snap);
        for category in ["success", "error", "signal"] {
            assert!(out.contains(&format!("hls_swarm_child_exits_total{{category=\"{category}\"}}")));
        }
    }
}

//! Live terminal dashboard.
//!
//! A single-threaded cooperative loop: one immutable snapshot per frame,
//! rendered with fixed panels. Reading is the only relationship with the
//! stats engine, so the dashboard can never block a supervisor. At fleet sizes
//! where the snapshot stops carrying per-client rows, the UI degrades to the
//! aggregates-only view on its own.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use ratatui::DefaultTerminal;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Cell, Paragraph, Row, Table};
use swarm_stats::{AggregateSnapshot, LatencyAggregate};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Frame interval; `r` forces an immediate refresh, `q`/Esc quits.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(250);

/// Terminal UI over the aggregator's snapshots.
pub struct Dashboard {
    rx: watch::Receiver<Arc<AggregateSnapshot>>,
    token: CancellationToken,
    target_url: String,
    degraded_threshold: f64,
}

impl Dashboard {
    pub fn new(
        rx: watch::Receiver<Arc<AggregateSnapshot>>,
        token: CancellationToken,
        target_url: impl Into<String>,
        degraded_threshold: f64,
    ) -> Self {
        Self {
            rx,
            token,
            target_url: target_url.into(),
            degraded_threshold,
        }
    }

    /// Run on a blocking thread; quitting the UI cancels the whole swarm.
    pub fn spawn(self) -> tokio::task::JoinHandle<io::Result<()>> {
        tokio::task::spawn_blocking(move || self.run())
    }

    fn run(mut self) -> io::Result<()> {
        let mut terminal = ratatui::init();
        let result = self.event_loop(&mut terminal);
        ratatui::restore();
        result
    }

    fn event_loop(&mut self, terminal: &mut DefaultTerminal) -> io::Result<()> {
        loop {
            if self.token.is_cancelled() {
                return Ok(());
            }

            let snapshot = self.rx.borrow().clone();
            terminal.draw(|frame| {
                render(
                    frame,
                    &snapshot,
                    &self.target_url,
                    self.degraded_threshold,
                );
            })?;

            // The poll timeout doubles as the frame timer.
            if event::poll(FRAME_INTERVAL)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            self.token.cancel();
                            return Ok(());
                        }
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            self.token.cancel();
                            return Ok(());
                        }
                        // User-triggered refresh: fall through to redraw.
                        KeyCode::Char('r') => {}
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }
}

/// Pipeline-health indicator for the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Indicator {
    Ok,
    /// Past trouble: peak drop rate crossed the threshold at some point.
    Degraded,
    /// Current trouble: metrics are degraded right now.
    Critical,
}

fn indicator(snapshot: &AggregateSnapshot, threshold: f64) -> Indicator {
    if snapshot.pipeline.metrics_degraded {
        Indicator::Critical
    } else if snapshot.pipeline.peak_drop_rate > threshold {
        Indicator::Degraded
    } else {
        Indicator::Ok
    }
}

fn render(frame: &mut ratatui::Frame, snap: &AggregateSnapshot, url: &str, threshold: f64) {
    let show_clients = !snap.per_client.is_empty();
    let constraints = if show_clients {
        vec![
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(9),
            Constraint::Length(5),
            Constraint::Min(4),
        ]
    } else {
        vec![
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(9),
            Constraint::Length(5),
            Constraint::Min(0),
        ]
    };
    let areas = Layout::vertical(constraints).split(frame.area());

    render_header(frame, areas[0], snap, url, threshold);
    render_traffic(frame, areas[1], snap);
    render_latency(frame, areas[2], snap);
    render_health(frame, areas[3], snap);
    if show_clients {
        render_clients(frame, areas[4], snap);
    }
}

fn render_header(
    frame: &mut ratatui::Frame,
    area: Rect,
    snap: &AggregateSnapshot,
    url: &str,
    threshold: f64,
) {
    let (label, color) = match indicator(snap, threshold) {
        Indicator::Ok => ("OK", Color::Green),
        Indicator::Degraded => ("DEGRADED (peak)", Color::Yellow),
        Indicator::Critical => ("METRICS DEGRADED", Color::Red),
    };

    let line = Line::from(vec![
        Span::styled("hls-swarm ", Style::new().add_modifier(Modifier::BOLD)),
        Span::raw(format!(
            "{}/{} active  ",
            snap.active_clients, snap.target_clients
        )),
        Span::raw(format!("{url}  ")),
        Span::styled(label, Style::new().fg(color).add_modifier(Modifier::BOLD)),
    ]);
    frame.render_widget(Paragraph::new(line).block(Block::bordered()), area);
}

fn render_traffic(frame: &mut ratatui::Frame, area: Rect, snap: &AggregateSnapshot) {
    let lines = vec![
        Line::raw(format!(
            "manifests {:>10}  ({:>6.1}/s)    segments {:>10}  ({:>6.1}/s)",
            snap.manifest_requests, snap.manifest_rate, snap.segment_requests, snap.segment_rate
        )),
        Line::raw(format!(
            "downloaded {}  ({}/s)    restarts {}  timeouts {}",
            format_bytes(snap.total_bytes),
            format_bytes(snap.throughput_bytes_per_sec as u64),
            snap.restarts,
            snap.timeouts
        )),
    ];
    frame.render_widget(
        Paragraph::new(lines).block(Block::bordered().title(" traffic ")),
        area,
    );
}

fn latency_lines(aggregate: &LatencyAggregate) -> Vec<Line<'static>> {
    if aggregate.count == 0 {
        return vec![Line::raw("no samples yet")];
    }
    vec![
        Line::raw(format!("count {:>8}", aggregate.count)),
        Line::raw(format!("p25 {:>9.1} ms", aggregate.p25_ms)),
        Line::raw(format!("p50 {:>9.1} ms", aggregate.p50_ms)),
        Line::raw(format!("p75 {:>9.1} ms", aggregate.p75_ms)),
        Line::raw(format!("p95 {:>9.1} ms", aggregate.p95_ms)),
        Line::raw(format!("p99 {:>9.1} ms", aggregate.p99_ms)),
        Line::raw(format!("max {:>9.1} ms", aggregate.max_ms)),
    ]
}

fn render_latency(frame: &mut ratatui::Frame, area: Rect, snap: &AggregateSnapshot) {
    let columns = Layout::horizontal([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    frame.render_widget(
        Paragraph::new(latency_lines(&snap.manifest_latency))
            .block(Block::bordered().title(" manifest download ")),
        columns[0],
    );
    frame.render_widget(
        Paragraph::new(latency_lines(&snap.segment_latency))
            .block(Block::bordered().title(" segment download ")),
        columns[1],
    );
}

fn render_health(frame: &mut ratatui::Frame, area: Rect, snap: &AggregateSnapshot) {
    let buckets = &snap.health_buckets;
    let errors: u64 = snap.http_errors.values().sum();
    let lines = vec![
        Line::from(vec![
            Span::styled(
                format!("perfect {}  ", buckets.perfect),
                Style::new().fg(Color::Green),
            ),
            Span::styled(
                format!("healthy {}  ", buckets.healthy),
                Style::new().fg(Color::Green),
            ),
            Span::styled(
                format!("marginal {}  ", buckets.marginal),
                Style::new().fg(Color::Yellow),
            ),
            Span::styled(
                format!("stalling {}  ", buckets.stalling),
                Style::new().fg(Color::Red),
            ),
            Span::raw(format!(
                "high-drift {}  avg speed {:.2}x  avg drift {:.0} ms",
                snap.clients_high_drift, snap.avg_speed, snap.avg_drift_ms
            )),
        ]),
        Line::raw(format!(
            "http errors {}  tcp fail {}/{}/{}  seq skips {}  dropped lines {}",
            errors,
            snap.tcp_refused,
            snap.tcp_timeout,
            snap.tcp_error,
            snap.sequence_skips,
            snap.pipeline.progress_lines_dropped + snap.pipeline.stderr_lines_dropped,
        )),
    ];
    frame.render_widget(
        Paragraph::new(lines).block(Block::bordered().title(" playback health / errors ")),
        area,
    );
}

fn render_clients(frame: &mut ratatui::Frame, area: Rect, snap: &AggregateSnapshot) {
    let header = Row::new(vec![
        "id", "state", "health", "speed", "drift", "bytes", "segs", "p50 ms",
    ])
    .style(Style::new().add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = snap
        .per_client
        .iter()
        .map(|c| {
            let health_style = match c.health {
                swarm_stats::PlaybackHealth::Perfect | swarm_stats::PlaybackHealth::Healthy => {
                    Style::new().fg(Color::Green)
                }
                swarm_stats::PlaybackHealth::Marginal => Style::new().fg(Color::Yellow),
                swarm_stats::PlaybackHealth::Stalling => Style::new().fg(Color::Red),
            };
            Row::new(vec![
                Cell::from(c.id.to_string()),
                Cell::from(c.state.as_str()),
                Cell::from(c.health.as_str()).style(health_style),
                Cell::from(format!("{:.2}x", c.speed)),
                Cell::from(format!("{} ms", c.drift_ms)),
                Cell::from(format_bytes(c.total_bytes)),
                Cell::from(c.segment_requests.to_string()),
                Cell::from(format!("{:.0}", c.segment_latency.p50_ms)),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(6),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(12),
        Constraint::Length(8),
        Constraint::Length(8),
    ];
    frame.render_widget(
        Table::new(rows, widths)
            .header(header)
            .block(Block::bordered().title(" clients ")),
        area,
    );
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_stats::PipelineAggregate;

    fn snapshot(drop_rate: f64, peak: f64, degraded: bool) -> AggregateSnapshot {
        AggregateSnapshot {
            pipeline: PipelineAggregate {
                drop_rate,
                peak_drop_rate: peak,
                metrics_degraded: degraded,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn indicator_tracks_drop_state() {
        assert_eq!(indicator(&snapshot(0.0, 0.0, false), 0.01), Indicator::Ok);
        assert_eq!(
            indicator(&snapshot(0.001, 0.05, false), 0.01),
            Indicator::Degraded
        );
        assert_eq!(
            indicator(&snapshot(0.2, 0.2, true), 0.01),
            Indicator::Critical
        );
    }

    #[test]
    fn bytes_format_scales() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn empty_latency_panel_has_a_placeholder() {
        let lines = latency_lines(&LatencyAggregate::default());
        assert_eq!(lines.len(), 1);
    }
}

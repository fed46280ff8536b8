//! Debug-stderr event extraction.
//!
//! At a verbose/debug log level the player annotates every log line with the
//! emitting context (`[hls @ 0x5602…]`, `[tcp @ 0x5602…]`). That marker is
//! the fast-path filter: lines without ` @ 0x` are rejected before any regex
//! runs, which keeps the parser cheap against the firehose of unrelated
//! stderr output.
//!
//! Timestamps drive all downstream latency inference, so each event carries
//! the player's own emitted timestamp when the line has one (a leading
//! `HH:MM:SS.mmm` token) and the wall clock at parse otherwise.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveTime, Utc};
use linesource::LineParser;
use regex::Regex;

/// Substring that gates all regex work.
const CONTEXT_MARKER: &str = " @ 0x";

static TIMESTAMP_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2}:\d{2}:\d{2}\.\d{1,6})\s").unwrap());
static HLS_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HLS request for url '([^']+)'").unwrap());
static TCP_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Starting connection attempt to ([0-9A-Fa-f.:]+) port (\d{1,5})").unwrap()
});
static TCP_CONNECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Successfully connected to ([0-9A-Fa-f.:]+) port (\d{1,5})").unwrap()
});
static PLAYLIST_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Opening '([^']+)' for reading").unwrap());
static SEQUENCE_CHANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Media sequence change \((\d+) -> (\d+)\)").unwrap());
static HTTP_ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"HTTP error (\d{3})").unwrap());

/// Why a TCP connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpFailReason {
    Refused,
    TimedOut,
    Error,
}

impl TcpFailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcpFailReason::Refused => "refused",
            TcpFailReason::TimedOut => "timeout",
            TcpFailReason::Error => "error",
        }
    }
}

/// What a recognized stderr line said.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEventKind {
    /// The HLS demuxer asked its I/O layer for a URL.
    HlsRequest { url: String },
    /// A TCP connect was initiated.
    TcpStart { ip: String, port: u16 },
    /// A TCP connect completed.
    TcpConnected { ip: String, port: u16 },
    /// A TCP connect failed.
    TcpFailed { reason: TcpFailReason },
    /// The demuxer opened a URL for reading (manifest refresh or segment
    /// fetch start).
    PlaylistOpen { url: String },
    /// The origin's media sequence jumped.
    SequenceChange { old: u64, new: u64 },
    /// The HTTP layer reported an error status.
    HttpError { code: u16 },
}

/// One parsed stderr event with its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEvent {
    pub at: DateTime<Utc>,
    pub kind: DebugEventKind,
}

/// Stateless regex extractor over the child's debug stderr.
///
/// Parse state (current segment, pending manifests, inflight TCP attempts)
/// lives with the per-client stats, not here: this type only turns lines
/// into [`DebugEvent`]s and forwards them.
pub struct DebugEventParser<F>
where
    F: FnMut(DebugEvent) + Send,
{
    emit: F,
}

impl<F> DebugEventParser<F>
where
    F: FnMut(DebugEvent) + Send,
{
    pub fn new(emit: F) -> Self {
        Self { emit }
    }

    fn handle(&mut self, line: &str) {
        // Fast path: every interesting line carries a logging context.
        if !line.contains(CONTEXT_MARKER) {
            return;
        }

        let Some(kind) = extract_event(line) else {
            return;
        };
        let at = parse_timestamp_prefix(line).unwrap_or_else(Utc::now);
        (self.emit)(DebugEvent { at, kind });
    }
}

impl<F> LineParser for DebugEventParser<F>
where
    F: FnMut(DebugEvent) + Send,
{
    fn parse_line(&mut self, line: &str) {
        self.handle(line);
    }
}

/// The player's own emitted timestamp, when the line leads with one.
///
/// The time-of-day token is anchored to today's date; latency inference only
/// ever subtracts nearby timestamps, so the date component is immaterial.
pub fn parse_timestamp_prefix(line: &str) -> Option<DateTime<Utc>> {
    let caps = TIMESTAMP_PREFIX.captures(line)?;
    let time = NaiveTime::parse_from_str(&caps[1], "%H:%M:%S%.f").ok()?;
    Some(Utc::now().date_naive().and_time(time).and_utc())
}

fn extract_event(line: &str) -> Option<DebugEventKind> {
    if let Some(caps) = HLS_REQUEST.captures(line) {
        return Some(DebugEventKind::HlsRequest {
            url: caps[1].to_string(),
        });
    }

    if let Some(caps) = TCP_START.captures(line) {
        return Some(DebugEventKind::TcpStart {
            ip: caps[1].to_string(),
            port: caps[2].parse().ok()?,
        });
    }

    if let Some(caps) = TCP_CONNECTED.captures(line) {
        return Some(DebugEventKind::TcpConnected {
            ip: caps[1].to_string(),
            port: caps[2].parse().ok()?,
        });
    }

    if let Some(reason) = classify_tcp_failure(line) {
        return Some(DebugEventKind::TcpFailed { reason });
    }

    if let Some(caps) = PLAYLIST_OPEN.captures(line) {
        return Some(DebugEventKind::PlaylistOpen {
            url: caps[1].to_string(),
        });
    }

    if let Some(caps) = SEQUENCE_CHANGE.captures(line) {
        return Some(DebugEventKind::SequenceChange {
            old: caps[1].parse().ok()?,
            new: caps[2].parse().ok()?,
        });
    }

    if let Some(caps) = HTTP_ERROR.captures(line) {
        return Some(DebugEventKind::HttpError {
            code: caps[1].parse().ok()?,
        });
    }

    None
}

fn classify_tcp_failure(line: &str) -> Option<TcpFailReason> {
    if line.contains("Connection refused") {
        Some(TcpFailReason::Refused)
    } else if line.contains("timed out") {
        Some(TcpFailReason::TimedOut)
    } else if line.contains("Failed to connect") {
        Some(TcpFailReason::Error)
    } else {
        None
    }
}

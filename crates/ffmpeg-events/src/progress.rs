//! Structured progress-block parser.
//!
//! With `-progress pipe:1` (or `unix://…`) the player writes blocks of
//! `key=value` lines, one block per reporting interval, each terminated by a
//! `progress=continue` (or `progress=end`) line. The parser accumulates the
//! recognized keys into a working update and emits it on the sentinel.

use linesource::LineParser;

/// One atomic progress report, decoded from a complete `key=value` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Decoded frame count.
    pub frame: u64,
    /// Frames per second as reported by the player.
    pub fps: f64,
    /// Bitrate string verbatim (e.g. `"2097.2kbits/s"`, `"N/A"`).
    pub bitrate: String,
    /// Cumulative bytes downloaded by the current child process. Resets to
    /// zero whenever the child restarts.
    pub total_size: u64,
    /// Playback clock position in microseconds.
    pub out_time_us: i64,
    /// Playback-to-realtime ratio (`speed=1.00x`), 0.0 for `N/A`.
    pub speed: f64,
    /// True for the final block of a run (`progress=end`).
    pub end: bool,
}

/// Accumulates `key=value` lines and emits a [`ProgressUpdate`] per block.
///
/// The callback runs synchronously before the next block is read, so a
/// consumer observes updates in emission order.
pub struct ProgressParser<F>
where
    F: FnMut(ProgressUpdate) + Send,
{
    current: ProgressUpdate,
    emit: F,
}

impl<F> ProgressParser<F>
where
    F: FnMut(ProgressUpdate) + Send,
{
    pub fn new(emit: F) -> Self {
        Self {
            current: ProgressUpdate::default(),
            emit,
        }
    }

    fn handle(&mut self, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "frame" => self.current.frame = value.parse().unwrap_or(0),
            "fps" => self.current.fps = value.parse().unwrap_or(0.0),
            "bitrate" => self.current.bitrate = value.to_string(),
            "total_size" => self.current.total_size = value.parse().unwrap_or(0),
            "out_time_us" => self.current.out_time_us = value.parse().unwrap_or(0),
            "speed" => self.current.speed = parse_speed(value),
            "progress" => {
                self.current.end = value == "end";
                let update = std::mem::take(&mut self.current);
                (self.emit)(update);
            }
            // Players emit more keys than we track (out_time, dup_frames,
            // stream_0_0_q, …); unknown keys are ignored.
            _ => {}
        }
    }
}

impl<F> LineParser for ProgressParser<F>
where
    F: FnMut(ProgressUpdate) + Send,
{
    fn parse_line(&mut self, line: &str) {
        self.handle(line);
    }
}

/// `"1.00x"` → 1.0, `"N/A"` → 0.0.
fn parse_speed(value: &str) -> f64 {
    if value.eq_ignore_ascii_case("n/a") {
        return 0.0;
    }
    value
        .strip_suffix('x')
        .unwrap_or(value)
        .trim()
        .parse()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collect(lines: &[&str]) -> Vec<ProgressUpdate> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        {
            let mut parser = ProgressParser::new(move |u| seen_clone.lock().unwrap().push(u));
            for line in lines {
                parser.handle(line);
            }
        }
        Arc::try_unwrap(seen).unwrap().into_inner().unwrap()
    }

    #[test]
    fn emits_one_update_per_sentinel() {
        let updates = collect(&[
            "frame=100",
            "fps=25.0",
            "bitrate=2097.2kbits/s",
            "total_size=1048576",
            "out_time_us=4000000",
            "speed=1.00x",
            "progress=continue",
            "frame=200",
            "total_size=2097152",
            "progress=continue",
        ]);

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].frame, 100);
        assert_eq!(updates[0].fps, 25.0);
        assert_eq!(updates[0].bitrate, "2097.2kbits/s");
        assert_eq!(updates[0].total_size, 1_048_576);
        assert_eq!(updates[0].out_time_us, 4_000_000);
        assert_eq!(updates[0].speed, 1.0);
        assert!(!updates[0].end);

        assert_eq!(updates[1].frame, 200);
        assert_eq!(updates[1].total_size, 2_097_152);
    }

    #[test]
    fn end_sentinel_marks_the_final_block() {
        let updates = collect(&["frame=10", "progress=end"]);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].end);
    }

    #[test]
    fn emission_count_equals_terminator_count() {
        let mut lines = Vec::new();
        for i in 0..7 {
            lines.push(format!("frame={i}"));
            lines.push("progress=continue".to_string());
        }
        lines.push("frame=999".to_string()); // trailing partial block, no sentinel
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        assert_eq!(collect(&refs).len(), 7);
    }

    #[test]
    fn speed_forms() {
        assert_eq!(parse_speed("1.00x"), 1.0);
        assert_eq!(parse_speed("2.5x"), 2.5);
        assert_eq!(parse_speed("0.97"), 0.97);
        assert_eq!(parse_speed("N/A"), 0.0);
        assert_eq!(parse_speed("garbage"), 0.0);
    }

    #[test]
    fn unknown_keys_and_bare_lines_are_ignored() {
        let updates = collect(&[
            "out_time=00:00:04.000000",
            "stream_0_0_q=-1.0",
            "not a key value line",
            "frame=5",
            "progress=continue",
        ]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].frame, 5);
    }
}

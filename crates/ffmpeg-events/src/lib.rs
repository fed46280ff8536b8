//! # ffmpeg-events
//!
//! Decoders for the two streams a supervised player child emits:
//!
//! - structured progress on stdout (or a unix socket): `key=value` blocks
//!   terminated by a `progress=` sentinel, handled by
//!   [`progress::ProgressParser`];
//! - free-form debug logging on stderr, from which
//!   [`debug::DebugEventParser`] extracts HLS/HTTP/TCP events with regexes.
//!
//! Both parsers implement [`linesource::LineParser`] so they plug directly
//! into the lossy pipeline, and both hand decoded values to a callback
//! synchronously; the caller decides where the data lands.

pub mod debug;
pub mod progress;

pub use debug::{DebugEvent, DebugEventKind, DebugEventParser, TcpFailReason};
pub use progress::{ProgressParser, ProgressUpdate};

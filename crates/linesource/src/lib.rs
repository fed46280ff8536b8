//! # linesource
//!
//! Uniform "things that emit lines" abstractions and the lossy parsing
//! pipeline built on top of them.
//!
//! A [`LineSource`] reads from a transport (a child-process pipe or a
//! unix-domain socket) and pushes whole lines into a [`pipeline::LineSink`].
//! The pipeline is lossy by design: the reader side never blocks on the
//! parser side. When the bounded channel between them is full, lines are
//! dropped and counted instead of applying backpressure to the child
//! process that produced them.

use thiserror::Error;

pub mod pipeline;
pub mod record;
pub mod source;

#[cfg(unix)]
pub mod socket;

pub use pipeline::{
    DrainOutcome, LineParser, ParsePipeline, PipelineHandle, PipelineSnapshot, PipelineStats,
};
pub use record::RecordReader;
pub use source::{LineSource, PipeAttach, PipeLineSource, SourceStats};

#[cfg(unix)]
pub use socket::{MAX_SOCKET_PATH_LEN, SocketLineSource};

/// Common error type for line-source operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket path too long: {len} bytes (maximum {max})")]
    SocketPathTooLong { len: usize, max: usize },

    #[error("source is closed")]
    Closed,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

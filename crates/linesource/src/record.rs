//! Record framing for child output streams.
//!
//! The supervised player terminates records with either `\n` or `\r`: normal
//! log output uses newlines, while the status line is redrawn in place with
//! bare carriage returns. Framing treats both bytes as terminators, so
//! status rewrites surface as individual records instead of pooling behind a
//! newline that never arrives.

use std::collections::VecDeque;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 4096;

/// Splits an async byte stream into records on `\n` and `\r` boundaries.
///
/// Each read lands in an internal chunk buffer and is framed in a single
/// pass: completed records queue up, an unterminated tail carries over to
/// the next read. There is no `BufReader` underneath; the chunk buffer is
/// the only buffering layer, which keeps the byte counter equal to exactly
/// what was taken off the stream. Whitespace-only records are discarded.
pub struct RecordReader<R> {
    reader: R,
    chunk: Vec<u8>,
    partial: Vec<u8>,
    ready: VecDeque<String>,
    bytes_read: u64,
    eof: bool,
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            chunk: vec![0u8; CHUNK_SIZE],
            partial: Vec::new(),
            ready: VecDeque::new(),
            bytes_read: 0,
            eof: false,
        }
    }

    /// Total bytes consumed from the underlying stream so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Next record, or `None` once the stream is exhausted.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
                // The last record may end at EOF instead of a terminator.
                Self::seal(&mut self.partial, &mut self.ready);
                continue;
            }

            self.bytes_read += n as u64;
            for i in 0..n {
                match self.chunk[i] {
                    b'\n' | b'\r' => Self::seal(&mut self.partial, &mut self.ready),
                    byte => self.partial.push(byte),
                }
            }
        }
    }

    /// Close out the accumulated record; whitespace-only ones are dropped,
    /// so runs of consecutive terminators produce nothing.
    fn seal(partial: &mut Vec<u8>, ready: &mut VecDeque<String>) {
        if partial.is_empty() {
            return;
        }
        {
            let text = String::from_utf8_lossy(partial);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                ready.push_back(trimmed.to_string());
            }
        }
        partial.clear();
    }
}

//! Buffered line assembly shared by the splitter and the merger.
//!
//! A line is the maximal run of bytes ending in `\n`, or the unterminated
//! remainder at end of stream. Reads happen in fixed-size chunks; a line that
//! spans several chunks is accumulated in the caller's buffer and only
//! reported once its terminator (or EOF) has been seen.
//!
//! ```text
//!   read(chunk) ──▶ [buf: pos..filled] ──scan for '\n'──▶ line: Vec<u8>
//!                   ├── found: append through '\n', return Newline
//!                   ├── not found: append all, read next chunk
//!                   └── read() == 0: return Eof (partial line) or None
//! ```

use std::io::{self, Read};

/// Chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// How a line returned by [`LineReader::read_line`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// The line ends with a `\n`, which is included in the output.
    Newline,
    /// The stream ended before a `\n`; this was the last line.
    Eof,
}

/// Reads whole lines from a byte stream in fixed-size chunks.
pub struct LineReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    eof: bool,
}

impl<R: Read> LineReader<R> {
    /// Create a reader with the default chunk size.
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_CHUNK_SIZE)
    }

    /// Create a reader that requests at most `chunk_size` bytes per read.
    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: vec![0u8; chunk_size.max(1)].into_boxed_slice(),
            pos: 0,
            filled: 0,
            eof: false,
        }
    }

    /// Append the next line to `line`.
    ///
    /// Returns `Ok(None)` once the stream is exhausted with no pending bytes.
    /// `line` is only appended to, never cleared.
    pub fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<Option<LineEnding>> {
        let start = line.len();
        loop {
            let pending = &self.buf[self.pos..self.filled];
            if let Some(i) = pending.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&pending[..=i]);
                self.pos += i + 1;
                return Ok(Some(LineEnding::Newline));
            }
            line.extend_from_slice(pending);
            self.pos = self.filled;

            if !self.fill()? {
                return Ok((line.len() > start).then_some(LineEnding::Eof));
            }
        }
    }

    #[cfg(test)]
    fn is_exhausted(&self) -> bool {
        self.eof && self.pos == self.filled
    }

    #[cfg(test)]
    fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Refill the buffer. Returns false at EOF.
    fn fill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        loop {
            match self.inner.read(&mut self.buf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                }
                Ok(n) => {
                    self.pos = 0;
                    self.filled = n;
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R> std::fmt::Debug for LineReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("chunk_size", &self.buf.len())
            .field("buffered", &(self.filled - self.pos))
            .field("eof", &self.eof)
            .finish()
    }
}

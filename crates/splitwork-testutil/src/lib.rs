//! Test helpers for splitwork: misbehaving readers and writers, descriptor
//! fixtures backed by temp files, and deadline reads for catching hangs.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::os::fd::OwnedFd;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;

/// Deadline for anything that would hang forever on a descriptor leak.
pub const HANG_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Readers and writers
// ============================================================================

/// Reader that returns at most `max` bytes per call and counts its reads.
///
/// Implements `Read` for both `ChunkedReader` and `&ChunkedReader` so a test
/// can hand out a borrow and inspect `reads()` afterwards.
#[derive(Debug)]
pub struct ChunkedReader {
    data: Vec<u8>,
    pos: Cell<usize>,
    max: usize,
    reads: Cell<usize>,
}

impl ChunkedReader {
    pub fn new(data: Vec<u8>, max: usize) -> Self {
        Self {
            data,
            pos: Cell::new(0),
            max: max.max(1),
            reads: Cell::new(0),
        }
    }

    /// Number of `read` calls so far, including the one that returned 0.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl Read for &ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        let pos = self.pos.get();
        let n = buf.len().min(self.max).min(self.data.len() - pos);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.pos.set(pos + n);
        Ok(n)
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }
}

/// Reader that fails every other call with `ErrorKind::Interrupted`.
#[derive(Debug)]
pub struct InterruptingReader {
    inner: io::Cursor<Vec<u8>>,
    interrupt_next: bool,
}

impl InterruptingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: io::Cursor::new(data),
            interrupt_next: true,
        }
    }
}

impl Read for InterruptingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let next = !self.interrupt_next;
        if std::mem::replace(&mut self.interrupt_next, next) {
            return Err(io::Error::from(io::ErrorKind::Interrupted));
        }
        self.inner.read(buf)
    }
}

/// Writer that either records every `write` call or fails with `BrokenPipe`.
#[derive(Debug, Default)]
pub struct FailingWriter {
    writes: RefCell<Vec<Vec<u8>>>,
    broken: bool,
}

impl FailingWriter {
    /// Accepts everything, remembering each write separately.
    pub fn recording() -> Self {
        Self::default()
    }

    /// Fails every write, like a pipe whose reader has gone away.
    pub fn broken() -> Self {
        Self {
            writes: RefCell::default(),
            broken: true,
        }
    }

    /// The payload of each successful `write` call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.borrow().clone()
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.writes.borrow_mut().push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Descriptor fixtures
// ============================================================================

/// A temp file holding `content`, kept alive by the returned handle.
pub fn temp_file_with(content: &[u8]) -> io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

/// A read-only descriptor positioned at the start of `file`.
pub fn read_fd(file: &NamedTempFile) -> io::Result<OwnedFd> {
    Ok(File::open(file.path())?.into())
}

/// A write-only descriptor that truncates `file`.
pub fn write_fd(file: &NamedTempFile) -> io::Result<OwnedFd> {
    Ok(File::create(file.path())?.into())
}

/// `n` empty temp files.
pub fn temp_files(n: usize) -> io::Result<Vec<NamedTempFile>> {
    (0..n).map(|_| NamedTempFile::new()).collect()
}

/// The whole content of `file`, read through a fresh handle.
pub fn contents(file: &NamedTempFile) -> io::Result<Vec<u8>> {
    let mut handle = File::open(file.path())?;
    handle.rewind()?;
    let mut buf = Vec::new();
    handle.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Lossy UTF-8 view of `contents`, convenient for assertions.
pub fn contents_str(file: &NamedTempFile) -> io::Result<String> {
    Ok(String::from_utf8_lossy(&contents(file)?).into_owned())
}

// ============================================================================
// Deadlines and descriptor accounting
// ============================================================================

/// Read `reader` to EOF on a helper thread, giving up after `timeout`.
///
/// Returns `None` on timeout. The helper thread is left blocked in that case;
/// kill whatever holds the write end to release it.
pub fn read_to_end_within<R>(mut reader: R, timeout: Duration) -> Option<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = reader.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()
}

/// Number of descriptors currently open in this process (Linux `/proc`).
///
/// Returns `None` where `/proc/self/fd` is unavailable.
pub fn open_fd_count() -> Option<usize> {
    std::fs::read_dir("/proc/self/fd").ok().map(|dir| dir.count())
}

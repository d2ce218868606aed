//! OS pipe pairs whose ends survive `fork` (and `exec`).
//!
//! Unlike an in-process channel, both ends are plain descriptors: whichever
//! process ends up holding a copy of the write end keeps the reader from
//! seeing EOF. The topology code is responsible for closing every copy that
//! is not needed; this module only creates the pair.
//!
//! ```text
//!   PipePair.write ──▶ [kernel buffer, ~64KB] ──▶ PipePair.read
//!                      ├── writer blocks when full (backpressure)
//!                      ├── reader blocks when empty
//!                      ├── last write end closed → EOF (read returns 0)
//!                      └── last read end closed → EPIPE on write
//! ```

use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{FcntlArg, FdFlag, fcntl};

use crate::error::{Result, SplitworkError};

/// Both ends of one unidirectional pipe.
#[derive(Debug)]
pub struct PipePair {
    /// Read end.
    pub read: OwnedFd,
    /// Write end.
    pub write: OwnedFd,
}

/// Create a pipe with both ends marked inheritable.
pub fn pipe_pair() -> Result<PipePair> {
    let (read, write) = nix::unistd::pipe().map_err(SplitworkError::Pipe)?;
    set_inheritable(&read).map_err(SplitworkError::Pipe)?;
    set_inheritable(&write).map_err(SplitworkError::Pipe)?;
    Ok(PipePair { read, write })
}

/// Clear `FD_CLOEXEC` so the descriptor stays open across `exec`.
fn set_inheritable(fd: &OwnedFd) -> nix::Result<()> {
    let raw = fd.as_raw_fd();
    let mut flags = FdFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFD)?);
    if flags.contains(FdFlag::FD_CLOEXEC) {
        flags.remove(FdFlag::FD_CLOEXEC);
        fcntl(raw, FcntlArg::F_SETFD(flags))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{self, Read, Write};

    #[test]
    fn test_basic_write_read() {
        let PipePair { read, write } = pipe_pair().unwrap();
        let mut writer = File::from(write);
        writer.write_all(b"hello").unwrap();
        drop(writer); // Signal EOF

        let mut buf = Vec::new();
        File::from(read).read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn test_ends_are_inheritable() {
        let pair = pipe_pair().unwrap();
        for fd in [&pair.read, &pair.write] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap());
            assert!(!flags.contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[test]
    fn test_eof_when_write_end_dropped() {
        let PipePair { read, write } = pipe_pair().unwrap();
        drop(write);

        let mut buf = [0u8; 16];
        assert_eq!(File::from(read).read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_broken_pipe_when_read_end_dropped() {
        let PipePair { read, write } = pipe_pair().unwrap();
        drop(read);

        // The test harness ignores SIGPIPE, so the write reports EPIPE.
        let err = File::from(write).write_all(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}

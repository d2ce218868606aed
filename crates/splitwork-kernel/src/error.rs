//! Error type shared by every stage of a splitwork pipeline.
//!
//! Failures stay local to the process they happen in. Inside a process the
//! full `SplitworkError` is available for logging; across the process
//! boundary only the coarse code from [`SplitworkError::exit_code`] survives.

use std::io;

use thiserror::Error;

use crate::scheduler::{Endpoint, Role};

/// Exit code for a transform that reported failure.
pub const EXIT_TRANSFORM: i32 = 1;
/// Exit code for a precondition violation (sysexits `EX_USAGE`).
pub const EXIT_USAGE: i32 = 64;
/// Exit code for an OS resource failure: pipe, fork, wait (sysexits `EX_OSERR`).
pub const EXIT_OS: i32 = 71;
/// Exit code for a read or write failure (sysexits `EX_IOERR`).
pub const EXIT_IO: i32 = 74;
/// Exit code for a stage that panicked, matching Rust's own panic exit code.
pub const EXIT_PANIC: i32 = 101;

/// Result type for splitwork operations.
pub type Result<T> = std::result::Result<T, SplitworkError>;

/// Everything that can go wrong while building or running a topology.
#[derive(Debug, Error)]
pub enum SplitworkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("read error on input {index}: {source}")]
    Read {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("write error on output {index}: {source}")]
    Write {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("failed to create pipe: {0}")]
    Pipe(#[source] nix::Error),

    #[error("failed to fork {role}: {source}")]
    Fork {
        role: Role,
        #[source]
        source: nix::Error,
    },

    #[error("failed to wait for pid {pid}: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("transform failed: {0:#}")]
    Transform(anyhow::Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("descriptor table has no entry for {0:?}")]
    MissingEndpoint(Endpoint),
}

impl SplitworkError {
    /// Build an `InvalidArgument` error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for precondition violations detected before any I/O.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// The process exit code a stage reports when it fails with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => EXIT_USAGE,
            Self::Read { .. } | Self::Write { .. } => EXIT_IO,
            Self::Pipe(_) | Self::Fork { .. } | Self::Wait { .. } | Self::MissingEndpoint(_) => {
                EXIT_OS
            }
            Self::Transform(_) => EXIT_TRANSFORM,
            Self::Panicked(_) => EXIT_PANIC,
        }
    }
}

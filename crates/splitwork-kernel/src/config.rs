//! Pipeline configuration.
//!
//! Defaults come from the machine (worker count) and a 4 KiB block size
//! (chunk size). `from_env` overlays `SPLITWORK_WORKERS` and
//! `SPLITWORK_CHUNK_SIZE`; command-line flags override both.

use std::num::NonZeroUsize;

use crate::error::{Result, SplitworkError};
use crate::line_reader::DEFAULT_CHUNK_SIZE;

/// Environment variable overriding the worker count.
pub const WORKERS_ENV: &str = "SPLITWORK_WORKERS";
/// Environment variable overriding the read chunk size.
pub const CHUNK_SIZE_ENV: &str = "SPLITWORK_CHUNK_SIZE";

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of worker processes (N). Must be at least 1.
    pub workers: usize,

    /// Bytes requested per `read` by the splitter and merger.
    ///
    /// Only affects performance; line atomicity holds for any size.
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            workers,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Create a config with an explicit worker count.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Defaults overlaid with `SPLITWORK_WORKERS` / `SPLITWORK_CHUNK_SIZE`.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the read chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Check the preconditions every run relies on.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SplitworkError::invalid("worker count must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(SplitworkError::invalid("chunk size must be at least 1"));
        }
        Ok(())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(WORKERS_ENV) {
            self.workers = parse_count(WORKERS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(CHUNK_SIZE_ENV) {
            self.chunk_size = parse_count(CHUNK_SIZE_ENV, &raw)?;
        }
        Ok(self)
    }
}

/// Parse a positive count, naming `what` in the error.
pub fn parse_count(what: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(SplitworkError::invalid(format!("{what} must be at least 1"))),
        Ok(n) => Ok(n),
        Err(_) => Err(SplitworkError::invalid(format!(
            "{what} must be a positive integer, got {raw:?}"
        ))),
    }
}

//! splitwork-kernel: line-atomic fan-out/fan-in over forked worker processes.
//!
//! This crate provides:
//!
//! - **Splitter**: deals the lines of one stream round-robin across N outputs
//! - **Merger**: reassembles N streams line by line in the same turn order
//! - **Transform**: the opaque routine each worker runs on its share of lines
//! - **Scheduler**: forks workers, splitter and merger with exact pipe ownership
//! - **Config**: worker count and read chunk size, from defaults and environment
//!
//! ```no_run
//! use std::io::{self, Read};
//! use std::os::fd::AsFd;
//! use splitwork_kernel::{ExternalCommand, PipelineConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = io::stdin().as_fd().try_clone_to_owned()?;
//! let upper = ExternalCommand::new("tr").args(["a-z", "A-Z"]);
//!
//! let mut pipeline = splitwork_kernel::run(&upper, input, None, &PipelineConfig::new(4))?;
//! let mut merged = String::new();
//! if let Some(mut out) = pipeline.take_output() {
//!     out.read_to_string(&mut merged)?;
//! }
//! let report = pipeline.wait_blocking()?;
//! assert!(report.success());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod line_reader;
pub mod merge;
pub mod pipe;
pub mod scheduler;
pub mod split;
pub mod transform;

pub use config::PipelineConfig;
pub use error::{Result, SplitworkError};
pub use line_reader::{DEFAULT_CHUNK_SIZE, LineEnding, LineReader};
pub use merge::{merge, merge_lines, merge_with_chunk_size};
pub use pipe::{PipePair, pipe_pair};
pub use scheduler::{
    Endpoint, ExitState, OwnershipPlan, Pipeline, PipelineReport, ProcessRecord, Role, SinkMode,
    SpawnedProcess, WorkerHandle, launch_worker, run, run_workers,
};
pub use split::{LineTally, split, split_lines, split_with_chunk_size};
pub use transform::{ExternalCommand, FnTransform, Identity, Transform, transform_fn};

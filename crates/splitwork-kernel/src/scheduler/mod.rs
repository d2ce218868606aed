//! Scheduler for splitwork: forking the split/work/merge topology and reaping it.
//!
//! This module provides:
//! - **Ownership plan**: which process holds which pipe end, computed up front.
//! - **Stage spawning**: fork, close what the child must not hold, run, `_exit`.
//! - **Orchestration**: `run` forks N workers, the splitter and the merger.
//! - **Reaping**: blocking and async waits that turn pids into exit records.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────┐
//!                 ┌───▶│ worker 0 │────┐
//! ┌──────────┐    │    └──────────┘    │    ┌────────┐
//! │ splitter │────┤         ...        ├───▶│ merger │───▶ sink / merged pipe
//! └──────────┘    │    ┌──────────┐    │    └────────┘
//!   ▲ source      └───▶│ worker N │────┘
//!                      └──────────┘
//!   line i ─▶ worker i mod N          turn order: worker 0, 1, .., N-1, 0, ..
//! ```
//!
//! Every box is its own process. The orchestrator keeps nothing but the
//! merged read end (when no sink is supplied) and the pids.

mod fork;
mod plan;
mod process;
mod topology;
mod worker;

pub use plan::{Endpoint, Handoff, OwnershipPlan, SinkMode};
pub use process::{
    ExitState, PipelineReport, ProcessRecord, Role, SpawnedProcess, kill, reap, reap_async,
    try_reap,
};
pub use topology::{Pipeline, run, run_workers};
pub use worker::{WorkerHandle, launch_worker};

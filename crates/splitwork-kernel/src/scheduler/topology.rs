//! The orchestrator: builds and forks the whole split/work/merge topology.
//!
//! `run` walks an [`OwnershipPlan`] in fork order. Descriptors live in a table
//! keyed by [`Endpoint`]; each stage takes the ones it inherits out of the
//! table (they move into the child's body and are closed in the parent right
//! after the fork) and borrows the ones its child must close. What is left in
//! the table once the merger is forked is exactly what the plan retains.
//!
//! The caller gets back a [`Pipeline`] and decides when to reap it.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::unistd::Pid;

use crate::config::PipelineConfig;
use crate::error::{Result, SplitworkError};
use crate::merge::merge_with_chunk_size;
use crate::pipe::pipe_pair;
use crate::split::split_with_chunk_size;
use crate::transform::Transform;

use super::fork::spawn_stage;
use super::plan::{Endpoint, Handoff, OwnershipPlan, SinkMode};
use super::process::{
    ExitState, PipelineReport, ProcessRecord, Role, SpawnedProcess, kill, reap, reap_async,
};
use super::worker::launch_worker;

/// Live descriptors of a topology under construction.
#[derive(Debug, Default)]
struct FdTable {
    fds: BTreeMap<Endpoint, OwnedFd>,
}

impl FdTable {
    fn insert(&mut self, ep: Endpoint, fd: OwnedFd) {
        self.fds.insert(ep, fd);
    }

    fn take(&mut self, ep: Endpoint) -> Result<OwnedFd> {
        self.fds.remove(&ep).ok_or(SplitworkError::MissingEndpoint(ep))
    }

    fn take_all(&mut self, eps: impl IntoIterator<Item = Endpoint>) -> Result<Vec<OwnedFd>> {
        eps.into_iter().map(|ep| self.take(ep)).collect()
    }

    fn borrow_all(&self, eps: &[Endpoint]) -> Result<Vec<BorrowedFd<'_>>> {
        eps.iter()
            .map(|ep| {
                self.fds
                    .get(ep)
                    .map(AsFd::as_fd)
                    .ok_or(SplitworkError::MissingEndpoint(*ep))
            })
            .collect()
    }

    /// Close whichever of `eps` the table still holds.
    fn release(&mut self, eps: &[Endpoint]) {
        for ep in eps {
            self.fds.remove(ep);
        }
    }

    fn len(&self) -> usize {
        self.fds.len()
    }
}

/// A running topology: N workers, one splitter, one merger.
#[derive(Debug)]
pub struct Pipeline {
    processes: Vec<SpawnedProcess>,
    output: Option<File>,
}

impl Pipeline {
    /// Every process, workers first (by index), then the splitter, then the merger.
    pub fn processes(&self) -> &[SpawnedProcess] {
        &self.processes
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(|p| p.pid).collect()
    }

    /// The merged output stream, when no sink was supplied.
    ///
    /// Read it to EOF before waiting: the merger blocks once the pipe buffer
    /// is full, and dropping the stream makes the merger fail with a write error.
    pub fn take_output(&mut self) -> Option<File> {
        self.output.take()
    }

    /// SIGKILL every process. Call [`wait`](Self::wait) afterwards to reap them.
    pub fn kill(&self) {
        for p in &self.processes {
            kill(p.pid);
        }
    }

    /// Block until every process has terminated.
    ///
    /// Reaps all processes even if one `waitpid` fails; the first failure is
    /// returned.
    pub fn wait_blocking(mut self) -> Result<PipelineReport> {
        self.output = None;
        collect_report(self.processes.iter().map(|p| (p, reap(p.pid))))
    }

    /// Async variant of [`wait_blocking`](Self::wait_blocking).
    pub async fn wait(mut self) -> Result<PipelineReport> {
        self.output = None;
        let mut results = Vec::with_capacity(self.processes.len());
        for p in &self.processes {
            results.push(reap_async(p.pid).await);
        }
        collect_report(self.processes.iter().zip(results))
    }
}

fn collect_report<'a>(
    reaped: impl Iterator<Item = (&'a SpawnedProcess, Result<ExitState>)>,
) -> Result<PipelineReport> {
    let mut records = Vec::new();
    let mut first_err = None;
    for (p, res) in reaped {
        match res {
            Ok(exit) => {
                if !exit.success() {
                    tracing::warn!(role = %p.role, pid = p.pid.as_raw(), %exit, "stage failed");
                }
                records.push(ProcessRecord {
                    pid: p.pid,
                    role: p.role,
                    exit,
                });
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(PipelineReport { records }),
    }
}

/// Run `transform` across `config.workers` processes.
///
/// Lines of `input` are dealt round-robin to the workers and their outputs
/// are merged back in the same order. If `output` is `None`, the merged
/// stream is available from [`Pipeline::take_output`].
///
/// Returns once every process is forked; nothing is waited for. On error no
/// process is left behind: any already forked are killed and reaped first.
/// Invalid configuration is rejected before any pipe or fork.
#[tracing::instrument(level = "debug", skip_all, fields(workers = config.workers))]
pub fn run<T>(
    transform: &T,
    input: OwnedFd,
    output: Option<OwnedFd>,
    config: &PipelineConfig,
) -> Result<Pipeline>
where
    T: Transform + ?Sized,
{
    config.validate()?;
    let sink = if output.is_some() {
        SinkMode::Supplied
    } else {
        SinkMode::Pipe
    };
    let plan = OwnershipPlan::new(config.workers, sink)?;

    let mut table = FdTable::default();
    table.insert(Endpoint::Source, input);
    if let Some(fd) = output {
        table.insert(Endpoint::Sink, fd);
    }

    let mut spawned = Vec::with_capacity(plan.handoffs().len());
    let result = plan
        .handoffs()
        .iter()
        .try_for_each(|h| fork_stage(h, &plan, transform, config, &mut table, &mut spawned));
    if let Err(err) = result {
        drop(table);
        abort(&spawned);
        return Err(err);
    }

    let output = match plan.sink() {
        SinkMode::Pipe => Some(File::from(table.take(Endpoint::MergedRead)?)),
        SinkMode::Supplied => None,
    };
    debug_assert_eq!(table.len(), 0, "orchestrator kept descriptors the plan hands off");

    tracing::debug!(processes = spawned.len(), "topology running");
    Ok(Pipeline {
        processes: spawned,
        output,
    })
}

/// [`run`] with `workers` workers and otherwise default settings.
pub fn run_workers<T>(
    transform: &T,
    input: OwnedFd,
    output: Option<OwnedFd>,
    workers: usize,
) -> Result<Pipeline>
where
    T: Transform + ?Sized,
{
    run(transform, input, output, &PipelineConfig::new(workers))
}

fn fork_stage<T>(
    handoff: &Handoff,
    plan: &OwnershipPlan,
    transform: &T,
    config: &PipelineConfig,
    table: &mut FdTable,
    spawned: &mut Vec<SpawnedProcess>,
) -> Result<()>
where
    T: Transform + ?Sized,
{
    let role = handoff.role;
    let pid = match role {
        Role::Worker(i) => {
            // The worker's own pipes are created and closed by `launch_worker`.
            let close: Vec<Endpoint> = handoff
                .close_in_child
                .iter()
                .filter(|ep| !handoff.created.contains(ep))
                .copied()
                .collect();
            let handle = launch_worker(i, transform, &table.borrow_all(&close)?)?;
            table.insert(Endpoint::FeedWrite(i), handle.feed);
            table.insert(Endpoint::CollectRead(i), handle.collect);
            handle.pid
        }
        Role::Splitter => {
            let chunk_size = config.chunk_size;
            let source = table.take(Endpoint::Source)?;
            let feeds = table.take_all((0..plan.workers()).map(Endpoint::FeedWrite))?;
            spawn_stage(role, &table.borrow_all(&handoff.close_in_child)?, move || {
                let tally = split_with_chunk_size(source, feeds, chunk_size)?;
                tracing::debug!(lines = tally.total_lines(), "splitter done");
                Ok(())
            })?
        }
        Role::Merger => {
            let chunk_size = config.chunk_size;
            let sink = match plan.sink() {
                SinkMode::Supplied => table.take(Endpoint::Sink)?,
                SinkMode::Pipe => {
                    let merged = pipe_pair()?;
                    table.insert(Endpoint::MergedRead, merged.read);
                    merged.write
                }
            };
            let collected = table.take_all((0..plan.workers()).map(Endpoint::CollectRead))?;
            spawn_stage(role, &table.borrow_all(&handoff.close_in_child)?, move || {
                let tally = merge_with_chunk_size(sink, collected, chunk_size)?;
                tracing::debug!(lines = tally.total_lines(), "merger done");
                Ok(())
            })?
        }
    };
    spawned.push(SpawnedProcess { pid, role });
    table.release(&handoff.close_in_parent);
    Ok(())
}

fn abort(spawned: &[SpawnedProcess]) {
    tracing::warn!(processes = spawned.len(), "aborting partially built topology");
    for p in spawned {
        kill(p.pid);
    }
    for p in spawned {
        if let Err(e) = reap(p.pid) {
            tracing::warn!(role = %p.role, error = %e, "failed to reap aborted stage");
        }
    }
}

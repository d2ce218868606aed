//! Descriptor ownership plan for one topology, computed without forking.
//!
//! Every fork copies the parent's whole descriptor table. A stray copy of a
//! pipe's write end keeps its reader from ever seeing EOF; a stray read end
//! hides a dead consumer from its writer. The plan fixes, per forked stage,
//! which endpoints the child keeps, which it closes straight after the fork,
//! and which the orchestrator closes once the child owns them.
//!
//! ```text
//!   source ─▶ Splitter ─FeedWrite(i)──▶ FeedRead(i)─▶ Worker(i) ─CollectWrite(i)──▶ CollectRead(i)─▶ Merger ─▶ sink
//!                                                                                                         └─▶ MergedWrite ─▶ MergedRead (returned)
//! ```
//!
//! Stages fork in order: `Worker(0) .. Worker(N-1)`, `Splitter`, `Merger`.

use std::collections::BTreeSet;

use crate::error::{Result, SplitworkError};

use super::process::Role;

/// One end of one pipe (or the caller's source/sink) in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Endpoint {
    /// The caller's input stream.
    Source,
    /// The caller's output stream, when one is supplied.
    Sink,
    /// Read end of worker `i`'s feed pipe.
    FeedRead(usize),
    /// Write end of worker `i`'s feed pipe.
    FeedWrite(usize),
    /// Read end of worker `i`'s collector pipe.
    CollectRead(usize),
    /// Write end of worker `i`'s collector pipe.
    CollectWrite(usize),
    /// Read end of the merged-output pipe, handed back to the caller.
    MergedRead,
    /// Write end of the merged-output pipe.
    MergedWrite,
}

/// Where the merger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Into a descriptor the caller supplied.
    Supplied,
    /// Into a fresh pipe whose read end is returned to the caller.
    Pipe,
}

/// Descriptor moves around the fork of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub role: Role,
    /// Endpoints created just before this fork.
    pub created: Vec<Endpoint>,
    /// Endpoints the child keeps and uses.
    pub inherit: Vec<Endpoint>,
    /// Endpoints the child closes immediately: everything open at fork time
    /// that it does not inherit.
    pub close_in_child: Vec<Endpoint>,
    /// Endpoints the orchestrator closes right after the fork.
    pub close_in_parent: Vec<Endpoint>,
}

/// The full ownership plan for `workers` workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipPlan {
    workers: usize,
    sink: SinkMode,
    handoffs: Vec<Handoff>,
    retained: Vec<Endpoint>,
}

impl OwnershipPlan {
    /// Compute the plan. Fails if `workers` is zero.
    pub fn new(workers: usize, sink: SinkMode) -> Result<Self> {
        if workers == 0 {
            return Err(SplitworkError::invalid("worker count must be at least 1"));
        }

        let stages: Vec<Role> = (0..workers)
            .map(Role::Worker)
            .chain([Role::Splitter, Role::Merger])
            .collect();

        let mut open: BTreeSet<Endpoint> = BTreeSet::new();
        open.insert(Endpoint::Source);
        if sink == SinkMode::Supplied {
            open.insert(Endpoint::Sink);
        }

        let mut handoffs = Vec::with_capacity(stages.len());
        for (pos, &role) in stages.iter().enumerate() {
            let created = created_by(role, sink);
            open.extend(created.iter().copied());

            let inherit = used_by(role, workers, sink);
            let close_in_child: Vec<Endpoint> = open
                .iter()
                .filter(|ep| !inherit.contains(ep))
                .copied()
                .collect();

            let later = &stages[pos + 1..];
            let close_in_parent: Vec<Endpoint> = inherit
                .iter()
                .filter(|ep| !later.iter().any(|&r| used_by(r, workers, sink).contains(ep)))
                .copied()
                .collect();
            for ep in &close_in_parent {
                open.remove(ep);
            }

            handoffs.push(Handoff {
                role,
                created,
                inherit,
                close_in_child,
                close_in_parent,
            });
        }

        Ok(Self {
            workers,
            sink,
            handoffs,
            retained: open.into_iter().collect(),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn sink(&self) -> SinkMode {
        self.sink
    }

    /// Handoffs in fork order.
    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// The handoff for `role`.
    pub fn handoff(&self, role: Role) -> Option<&Handoff> {
        self.handoffs.iter().find(|h| h.role == role)
    }

    /// Endpoints the orchestrator still holds once every stage is forked.
    pub fn retained(&self) -> &[Endpoint] {
        &self.retained
    }
}

fn created_by(role: Role, sink: SinkMode) -> Vec<Endpoint> {
    match role {
        Role::Worker(i) => vec![
            Endpoint::FeedRead(i),
            Endpoint::FeedWrite(i),
            Endpoint::CollectRead(i),
            Endpoint::CollectWrite(i),
        ],
        Role::Splitter => Vec::new(),
        Role::Merger => match sink {
            SinkMode::Supplied => Vec::new(),
            SinkMode::Pipe => vec![Endpoint::MergedRead, Endpoint::MergedWrite],
        },
    }
}

fn used_by(role: Role, workers: usize, sink: SinkMode) -> Vec<Endpoint> {
    match role {
        Role::Worker(i) => vec![Endpoint::FeedRead(i), Endpoint::CollectWrite(i)],
        Role::Splitter => std::iter::once(Endpoint::Source)
            .chain((0..workers).map(Endpoint::FeedWrite))
            .collect(),
        Role::Merger => {
            let out = match sink {
                SinkMode::Supplied => Endpoint::Sink,
                SinkMode::Pipe => Endpoint::MergedWrite,
            };
            (0..workers)
                .map(Endpoint::CollectRead)
                .chain(std::iter::once(out))
                .collect()
        }
    }
}

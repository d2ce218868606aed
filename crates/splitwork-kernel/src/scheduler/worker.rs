//! Worker launcher: one forked process running the transform between two pipes.
//!
//! ```text
//!   feed.write ──▶ feed.read ─▶ [transform] ─▶ collect.write ──▶ collect.read
//!   (parent)        (child)                      (child)          (parent)
//! ```

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::unistd::Pid;

use crate::error::{Result, SplitworkError};
use crate::pipe::{PipePair, pipe_pair};
use crate::transform::Transform;

use super::fork::spawn_stage;
use super::process::Role;

/// The parent's view of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub index: usize,
    pub pid: Pid,
    /// Write end of the worker's input pipe.
    pub feed: OwnedFd,
    /// Read end of the worker's output pipe.
    pub collect: OwnedFd,
}

/// Fork worker `index` running `transform`.
///
/// The child closes every descriptor in `close_in_child` plus the parent's
/// ends of its own two pipes, so it holds nothing but its feed read end and
/// its collector write end. The parent keeps the opposite ends, returned in
/// the handle.
pub fn launch_worker<T>(
    index: usize,
    transform: &T,
    close_in_child: &[BorrowedFd<'_>],
) -> Result<WorkerHandle>
where
    T: Transform + ?Sized,
{
    let PipePair {
        read: feed_read,
        write: feed,
    } = pipe_pair()?;
    let PipePair {
        read: collect,
        write: collect_write,
    } = pipe_pair()?;

    let pid = {
        let mut close: Vec<BorrowedFd<'_>> = close_in_child.to_vec();
        close.push(feed.as_fd());
        close.push(collect.as_fd());

        spawn_stage(Role::Worker(index), &close, move || {
            let mut input = File::from(feed_read);
            let mut output = File::from(collect_write);
            transform
                .apply(&mut input, &mut output)
                .map_err(SplitworkError::Transform)
        })?
    };

    Ok(WorkerHandle {
        index,
        pid,
        feed,
        collect,
    })
}

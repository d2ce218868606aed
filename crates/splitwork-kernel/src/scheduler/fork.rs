//! Forking one stage of the topology.

use std::any::Any;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::panic::{self, AssertUnwindSafe};

use nix::unistd::{ForkResult, Pid, fork};

use crate::error::{Result, SplitworkError};

use super::process::Role;

/// Fork a process that closes `close_in_child`, runs `body`, and exits.
///
/// The child never returns from this call: it leaves through `_exit` with 0 on
/// success or the error's [`SplitworkError::exit_code`]. Descriptors owned by
/// the parent's stack are never dropped in the child, which is why the ones it
/// must not keep are listed and closed explicitly.
///
/// In the parent, `body` is dropped once the child exists, closing every
/// descriptor that was moved into it.
pub(crate) fn spawn_stage<F>(role: Role, close_in_child: &[BorrowedFd<'_>], body: F) -> Result<Pid>
where
    F: FnOnce() -> Result<()>,
{
    // SAFETY: the child only closes descriptors, runs `body` and calls `_exit`;
    // it never returns into the caller's frames or runs their destructors.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            drop(body);
            tracing::debug!(%role, pid = child.as_raw(), "spawned stage");
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            for fd in close_in_child {
                let _ = nix::unistd::close(fd.as_raw_fd());
            }
            let code = run_stage(role, body);
            // SAFETY: `_exit` skips atexit handlers and stdio flushes, which
            // belong to the parent's copy of the process state.
            unsafe { nix::libc::_exit(code) }
        }
        Err(source) => Err(SplitworkError::Fork { role, source }),
    }
}

fn run_stage<F>(role: Role, body: F) -> i32
where
    F: FnOnce() -> Result<()>,
{
    let err = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => return 0,
        Ok(Err(err)) => err,
        Err(payload) => SplitworkError::Panicked(panic_message(payload.as_ref())),
    };
    let code = err.exit_code();
    tracing::error!(%role, code, "{err}");
    code
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

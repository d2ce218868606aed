//! Process records for the stages of a topology, and reaping them.
//!
//! The kernel never waits on its own: it hands every pid back to the caller.
//! These helpers turn a pid into a [`ProcessRecord`] once the process has
//! terminated, either blocking or by polling from async code.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::error::{Result, SplitworkError};

/// What a forked process does in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Runs the transform on lines `i, i+N, i+2N, ...`.
    Worker(usize),
    /// Fans the source out to the worker feeds.
    Splitter,
    /// Fans the worker outputs back into the sink.
    Merger,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Worker(i) => write!(f, "worker {i}"),
            Role::Splitter => write!(f, "splitter"),
            Role::Merger => write!(f, "merger"),
        }
    }
}

/// How a process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Normal exit with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

impl ExitState {
    /// True for a zero exit code.
    pub fn success(&self) -> bool {
        matches!(self, ExitState::Exited(0))
    }

    /// Shell-style code: the exit status, or 128 + signal number.
    pub fn code(&self) -> i32 {
        match self {
            ExitState::Exited(code) => *code,
            ExitState::Signaled(sig) => 128 + *sig as i32,
        }
    }
}

impl std::fmt::Display for ExitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exit code {code}"),
            ExitState::Signaled(sig) => write!(f, "killed by {}", sig.as_str()),
        }
    }
}

/// A process created by the orchestrator that has not been reaped yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: Pid,
    pub role: Role,
}

/// A reaped process: who it was and how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub role: Role,
    pub exit: ExitState,
}

impl ProcessRecord {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

/// Exit states of every process in one pipeline run, in spawn order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub records: Vec<ProcessRecord>,
}

impl PipelineReport {
    /// True when every process exited with code 0.
    pub fn success(&self) -> bool {
        self.records.iter().all(ProcessRecord::success)
    }

    /// Records of the processes that did not exit cleanly.
    pub fn failures(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter().filter(|r| !r.success())
    }

    /// Code of the first failing process in spawn order, if any.
    pub fn first_failure_code(&self) -> Option<i32> {
        self.failures().next().map(|r| r.exit.code())
    }

    /// Record for `role`, if that role was part of the run.
    pub fn get(&self, role: Role) -> Option<&ProcessRecord> {
        self.records.iter().find(|r| r.role == role)
    }
}

/// Block until `pid` terminates.
pub fn reap(pid: Pid) -> Result<ExitState> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(state) = exit_state(status) {
                    return Ok(state);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(source) => {
                return Err(SplitworkError::Wait {
                    pid: pid.as_raw(),
                    source,
                });
            }
        }
    }
}

/// Reap `pid` if it has already terminated.
pub fn try_reap(pid: Pid) -> Result<Option<ExitState>> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => return Ok(exit_state(status)),
            Err(Errno::EINTR) => continue,
            Err(source) => {
                return Err(SplitworkError::Wait {
                    pid: pid.as_raw(),
                    source,
                });
            }
        }
    }
}

const POLL_MIN: Duration = Duration::from_millis(1);
const POLL_MAX: Duration = Duration::from_millis(50);

/// Wait for `pid` without blocking the runtime.
///
/// Polls with `WNOHANG` and backs off up to 50ms between polls, so the future
/// can be dropped at any point (e.g. by `tokio::time::timeout`).
pub async fn reap_async(pid: Pid) -> Result<ExitState> {
    let mut delay = POLL_MIN;
    loop {
        if let Some(state) = try_reap(pid)? {
            return Ok(state);
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(POLL_MAX);
    }
}

/// Send SIGKILL to `pid`. A process that is already gone is not an error.
pub fn kill(pid: Pid) {
    match signal::kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid = pid.as_raw(), error = %e, "failed to kill process"),
    }
}

fn exit_state(status: WaitStatus) -> Option<ExitState> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitState::Exited(code)),
        WaitStatus::Signaled(_, sig, _) => Some(ExitState::Signaled(sig)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(role: Role, exit: ExitState) -> ProcessRecord {
        ProcessRecord {
            pid: Pid::from_raw(1000),
            role,
            exit,
        }
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Worker(3).to_string(), "worker 3");
        assert_eq!(Role::Splitter.to_string(), "splitter");
        assert_eq!(Role::Merger.to_string(), "merger");
    }

    #[test]
    fn test_exit_state_codes() {
        assert!(ExitState::Exited(0).success());
        assert!(!ExitState::Exited(74).success());
        assert_eq!(ExitState::Exited(74).code(), 74);
        assert_eq!(ExitState::Signaled(Signal::SIGKILL).code(), 137);
        assert!(!ExitState::Signaled(Signal::SIGKILL).success());
        assert_eq!(ExitState::Signaled(Signal::SIGPIPE).to_string(), "killed by SIGPIPE");
    }

    #[test]
    fn test_report_verdict() {
        let ok = PipelineReport {
            records: vec![
                record(Role::Worker(0), ExitState::Exited(0)),
                record(Role::Splitter, ExitState::Exited(0)),
                record(Role::Merger, ExitState::Exited(0)),
            ],
        };
        assert!(ok.success());
        assert_eq!(ok.first_failure_code(), None);

        let failed = PipelineReport {
            records: vec![
                record(Role::Worker(0), ExitState::Exited(0)),
                record(Role::Worker(1), ExitState::Exited(1)),
                record(Role::Splitter, ExitState::Signaled(Signal::SIGPIPE)),
                record(Role::Merger, ExitState::Exited(0)),
            ],
        };
        assert!(!failed.success());
        assert_eq!(failed.failures().count(), 2);
        assert_eq!(failed.first_failure_code(), Some(1));
        assert_eq!(failed.get(Role::Worker(1)).map(|r| r.exit), Some(ExitState::Exited(1)));
        assert!(failed.get(Role::Worker(7)).is_none());
    }

    #[test]
    fn test_reap_unknown_pid_fails() {
        // Not our child: waitpid reports ECHILD.
        let err = reap(Pid::from_raw(1)).unwrap_err();
        assert!(matches!(err, SplitworkError::Wait { source: Errno::ECHILD, .. }), "{err:?}");
    }
}

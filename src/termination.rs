//! How a worker run ended.
//!
//! Every outcome, including a launch that never happened, is folded into a
//! [`Termination`] so the restart loop can treat them all the same way.

use nix::sys::signal::Signal;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Captured termination status of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The worker exited on its own with a status code.
    Exited { code: i32 },
    /// The worker was killed by a signal.
    Signaled { signal: i32 },
    /// The worker could not be started at all.
    SpawnFailed { reason: String },
    /// The worker started but waiting on it failed.
    WaitFailed { reason: String },
}

/// Coarse classification used for log levels and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationKind {
    Success,
    NonZeroExit,
    Signal,
    SpawnFailure,
    WaitFailure,
}

impl Termination {
    pub fn kind(&self) -> TerminationKind {
        match self {
            Termination::Exited { code: 0 } => TerminationKind::Success,
            Termination::Exited { .. } => TerminationKind::NonZeroExit,
            Termination::Signaled { .. } => TerminationKind::Signal,
            Termination::SpawnFailed { .. } => TerminationKind::SpawnFailure,
            Termination::WaitFailed { .. } => TerminationKind::WaitFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind() == TerminationKind::Success
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            Termination::Exited { code }
        } else if let Some(signal) = status.signal() {
            Termination::Signaled { signal }
        } else {
            // Stopped/continued statuses are never reported by wait().
            Termination::WaitFailed {
                reason: format!("unrecognised wait status {status}"),
            }
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited { code } => write!(f, "exit code {code}"),
            Termination::Signaled { signal } => match Signal::try_from(*signal) {
                Ok(sig) => write!(f, "signal {signal} ({})", sig.as_str()),
                Err(_) => write!(f, "signal {signal}"),
            },
            Termination::SpawnFailed { reason } => write!(f, "spawn failure: {reason}"),
            Termination::WaitFailed { reason } => write!(f, "wait failure: {reason}"),
        }
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker executable, relative to the startup working directory.
pub const WORKER_PROGRAM: &str = "worker";

/// Worker standard output lands here.
pub const STDOUT_LOG: &str = "out.log";

/// Worker standard error plus one restart notice per termination.
pub const STDERR_LOG: &str = "err.log";

/// Fixed delay between a termination and the next launch.
pub const RESTART_INTERVAL: Duration = Duration::from_secs(5);

/// How long a signalled worker group gets before SIGKILL.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Resolved supervisor settings.
///
/// Nothing here is read from the command line, a file or the environment:
/// the values are the compiled-in constants above, with paths anchored at
/// the directory the supervisor started in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub worker: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
    pub restart_interval: Duration,
    pub shutdown_grace: Duration,
}

impl SupervisorConfig {
    /// Anchor every path at `dir` so a later change of directory cannot
    /// redirect the worker or its logs.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            worker: dir.join(WORKER_PROGRAM),
            stdout_log: dir.join(STDOUT_LOG),
            stderr_log: dir.join(STDERR_LOG),
            restart_interval: RESTART_INTERVAL,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

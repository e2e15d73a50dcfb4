/// Single worker run: spawn the worker with its output appended to the log
/// streams, wait for it to terminate, report how it ended.
///
/// The worker is spawned in its own process group (via `process_group(0)`)
/// so a shutdown can signal the worker and anything it started in one go.
/// Being in its own group also shields it from kills aimed at the
/// supervisor's group, so on Linux the worker is tied to the supervisor with
/// a parent-death signal: if the supervisor dies without running its
/// shutdown path (SIGKILL, crash), the kernel SIGKILLs the worker.
use crate::config::SupervisorConfig;
use crate::log_stream::{LogStream, LogStreamError};
use crate::termination::Termination;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// Result of a worker run that reached termination.
#[derive(Debug)]
pub struct WorkerRun {
    /// 1-based launch ordinal.
    pub run: u64,
    /// Worker PID (None if the spawn failed).
    pub pid: Option<u32>,
    /// How the run ended.
    pub termination: Termination,
    /// Wall-clock time from launch attempt to termination.
    pub duration: Duration,
}

/// How a call to [`run_worker`] ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The worker terminated on its own (or never started).
    Finished(WorkerRun),
    /// A shutdown signal arrived while the worker was running. The worker's
    /// process group has been signalled and reaped.
    Interrupted(Signal),
}

/// Launch the worker once and wait for it, or for `shutdown`, whichever
/// comes first.
///
/// Only log-handle duplication errors are returned; every worker-side
/// failure becomes a [`Termination`].
pub async fn run_worker<S>(
    config: &SupervisorConfig,
    run: u64,
    stdout: &LogStream,
    stderr: &LogStream,
    shutdown: Pin<&mut S>,
) -> Result<SessionOutcome, LogStreamError>
where
    S: Future<Output = Signal>,
{
    tracing::info!(
        run,
        worker = %config.worker.display(),
        stdout = %stdout.path().display(),
        stderr = %stderr.path().display(),
        "spawning worker"
    );
    let stdout = stdout.stdio()?;
    let stderr = stderr.stdio()?;
    let start = Instant::now();

    let mut command = Command::new(&config.worker);
    command
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0);
    #[cfg(target_os = "linux")]
    die_with_supervisor(&mut command);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return Ok(SessionOutcome::Finished(WorkerRun {
                run,
                pid: None,
                termination: Termination::SpawnFailed {
                    reason: e.to_string(),
                },
                duration: start.elapsed(),
            }));
        }
    };

    let pid = child.id();
    tracing::info!(run, pid = ?pid, "worker started");

    let termination = tokio::select! {
        biased;
        signal = shutdown => {
            tracing::info!(run, signal = %signal, "shutdown requested, stopping worker");
            stop_worker(&mut child, pid, signal, config.shutdown_grace).await;
            return Ok(SessionOutcome::Interrupted(signal));
        }
        status = child.wait() => match status {
            Ok(status) => Termination::from(status),
            Err(e) => {
                tracing::warn!(run, error = %e, "failed to wait on worker, killing its group");
                signal_group(pid, Signal::SIGKILL);
                if let Err(e) = child.wait().await {
                    tracing::warn!(run, error = %e, "failed to reap killed worker");
                }
                Termination::WaitFailed { reason: e.to_string() }
            }
        },
    };

    Ok(SessionOutcome::Finished(WorkerRun {
        run,
        pid,
        termination,
        duration: start.elapsed(),
    }))
}

/// Ask the kernel to SIGKILL the worker when the supervisor goes away.
///
/// Linux tracks the spawning thread, not the process; the supervisor spawns
/// from its single runtime thread, which lives as long as the process.
#[cfg(target_os = "linux")]
fn die_with_supervisor(command: &mut Command) {
    use nix::errno::Errno;
    use nix::sys::prctl;
    use nix::unistd::{getpid, getppid};

    let supervisor = getpid();
    // SAFETY: the hook only issues prctl(2) and getppid(2), both
    // async-signal-safe, and builds errors without allocating.
    unsafe {
        command.pre_exec(move || {
            prctl::set_pdeathsig(Signal::SIGKILL)?;
            // The supervisor died between fork and prctl.
            if getppid() != supervisor {
                return Err(Errno::ESRCH.into());
            }
            Ok(())
        });
    }
}

/// Forward `signal` to the worker's group, then reap it. A group still
/// alive after `grace` gets SIGKILL.
async fn stop_worker(child: &mut Child, pid: Option<u32>, signal: Signal, grace: Duration) {
    signal_group(pid, signal);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(status = %Termination::from(status), "worker stopped");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed to reap stopped worker");
        }
        Err(_) => {
            tracing::warn!(
                grace_secs = grace.as_secs_f64(),
                "worker outlived shutdown grace, sending SIGKILL"
            );
            signal_group(pid, Signal::SIGKILL);
            if let Err(e) = child.wait().await {
                tracing::warn!(error = %e, "failed to reap killed worker");
            }
        }
    }
}

/// Send `signal` to the process group led by `pid`. ESRCH (group already
/// gone) is expected and only logged at debug.
fn signal_group(pid: Option<u32>, signal: Signal) {
    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), signal) {
        tracing::debug!(pgid = pid, signal = %signal, error = %e, "killpg failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::termination::TerminationKind;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_worker(dir: &Path, body: &str) {
        let path = dir.join("worker");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn open_streams(config: &SupervisorConfig) -> (LogStream, LogStream) {
        (
            LogStream::open(&config.stdout_log).unwrap(),
            LogStream::open(&config.stderr_log).unwrap(),
        )
    }

    async fn run_to_end(config: &SupervisorConfig) -> WorkerRun {
        let (stdout, stderr) = open_streams(config);
        let mut shutdown = std::pin::pin!(std::future::pending::<Signal>());
        match run_worker(config, 1, &stdout, &stderr, shutdown.as_mut())
            .await
            .unwrap()
        {
            SessionOutcome::Finished(run) => run,
            SessionOutcome::Interrupted(signal) => panic!("unexpected interrupt: {signal}"),
        }
    }

    #[tokio::test]
    async fn test_run_worker_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path(), "exit 0");
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = run_to_end(&config).await;
        assert_eq!(result.run, 1);
        assert_eq!(result.termination, Termination::Exited { code: 0 });
        assert!(result.pid.is_some_and(|pid| pid > 0));
    }

    #[tokio::test]
    async fn test_run_worker_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path(), "exit 42");
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = run_to_end(&config).await;
        assert_eq!(result.termination, Termination::Exited { code: 42 });
    }

    #[tokio::test]
    async fn test_run_worker_separates_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path(), "echo stdout-line\necho stderr-line >&2");
        let config = SupervisorConfig::rooted_at(dir.path());

        run_to_end(&config).await;

        let out = std::fs::read_to_string(&config.stdout_log).unwrap();
        let err = std::fs::read_to_string(&config.stderr_log).unwrap();
        assert_eq!(out, "stdout-line\n");
        assert_eq!(err, "stderr-line\n");
    }

    #[tokio::test]
    async fn test_run_worker_killed_by_signal() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path(), "kill -TERM $$");
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = run_to_end(&config).await;
        assert_eq!(
            result.termination,
            Termination::Signaled {
                signal: Signal::SIGTERM as i32
            }
        );
    }

    #[tokio::test]
    async fn test_run_worker_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = run_to_end(&config).await;
        assert_eq!(result.termination.kind(), TerminationKind::SpawnFailure);
        assert!(result.pid.is_none());
    }

    #[tokio::test]
    async fn test_run_worker_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = run_to_end(&config).await;
        assert_eq!(result.termination.kind(), TerminationKind::SpawnFailure);
    }

    #[tokio::test]
    async fn test_run_worker_stdin_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        // `cat` would block forever on an inherited terminal.
        write_worker(dir.path(), "cat");
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = tokio::time::timeout(Duration::from_secs(5), run_to_end(&config))
            .await
            .unwrap();
        assert!(result.termination.is_success());
    }

    #[tokio::test]
    async fn test_run_worker_duration_is_reasonable() {
        let dir = tempfile::tempdir().unwrap();
        write_worker(dir.path(), "sleep 0.1");
        let config = SupervisorConfig::rooted_at(dir.path());

        let result = run_to_end(&config).await;
        assert!(result.duration.as_millis() >= 80);
        assert!(result.duration.as_secs() < 5);
    }

    #[tokio::test]
    async fn test_shutdown_forwards_signal_to_worker_group() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        write_worker(
            dir.path(),
            &format!("echo up > {}\nexec sleep 30", ready.display()),
        );
        let config = SupervisorConfig::rooted_at(dir.path());
        let (stdout, stderr) = open_streams(&config);

        let ready_check = ready.clone();
        let mut shutdown = std::pin::pin!(async move {
            while !ready_check.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Signal::SIGTERM
        });

        let start = Instant::now();
        let outcome = run_worker(&config, 1, &stdout, &stderr, shutdown.as_mut())
            .await
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::Interrupted(Signal::SIGTERM)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_kills_worker_that_ignores_signal() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        write_worker(
            dir.path(),
            &format!(
                "trap '' TERM\necho up > {}\nwhile true; do sleep 0.1; done",
                ready.display()
            ),
        );
        let mut config = SupervisorConfig::rooted_at(dir.path());
        config.shutdown_grace = Duration::from_millis(300);
        let (stdout, stderr) = open_streams(&config);

        let ready_check = ready.clone();
        let mut shutdown = std::pin::pin!(async move {
            while !ready_check.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Signal::SIGTERM
        });

        let start = Instant::now();
        let outcome = run_worker(&config, 1, &stdout, &stderr, shutdown.as_mut())
            .await
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::Interrupted(Signal::SIGTERM)));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}

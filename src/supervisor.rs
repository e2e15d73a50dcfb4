/// The restart loop: launch, wait, append a restart notice, sleep, repeat.
///
/// One worker at a time, no restart ceiling, identical treatment for every
/// termination. Only a shutdown signal or a broken log stream ends the loop.
use crate::config::SupervisorConfig;
use crate::log_stream::{LogStream, LogStreamError};
use crate::session::{self, SessionOutcome, WorkerRun};
use chrono::{DateTime, SecondsFormat, Utc};
use nix::sys::signal::Signal;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopped {
    /// The shutdown signal that ended the loop.
    pub signal: Signal,
    /// Number of launch attempts made, including failed spawns.
    pub launches: u64,
}

/// Owns the two log streams for its whole lifetime and drives the loop.
pub struct Supervisor {
    config: SupervisorConfig,
    stdout: LogStream,
    stderr: LogStream,
    launches: u64,
}

impl Supervisor {
    /// Open both log streams. Failure here is fatal to the supervisor.
    pub fn open(config: SupervisorConfig) -> Result<Self, LogStreamError> {
        let stdout = LogStream::open(&config.stdout_log)?;
        let stderr = LogStream::open(&config.stderr_log)?;
        Ok(Self {
            config,
            stdout,
            stderr,
            launches: 0,
        })
    }

    /// Run until `shutdown` resolves.
    ///
    /// A shutdown observed while the worker runs stops the worker's group
    /// first; one observed during the restart delay prevents the next
    /// launch. Either way nothing more is appended to the logs.
    pub async fn run<F>(mut self, shutdown: F) -> Result<Stopped, LogStreamError>
    where
        F: Future<Output = Signal>,
    {
        tokio::pin!(shutdown);

        loop {
            self.launches += 1;
            let run = match session::run_worker(
                &self.config,
                self.launches,
                &self.stdout,
                &self.stderr,
                shutdown.as_mut(),
            )
            .await?
            {
                SessionOutcome::Finished(run) => run,
                SessionOutcome::Interrupted(signal) => return Ok(self.stopped(signal)),
            };

            self.record(&run)?;

            tokio::select! {
                biased;
                signal = shutdown.as_mut() => return Ok(self.stopped(signal)),
                _ = tokio::time::sleep(self.config.restart_interval) => {}
            }
        }
    }

    fn record(&mut self, run: &WorkerRun) -> Result<(), LogStreamError> {
        if run.termination.is_success() {
            tracing::info!(
                run = run.run,
                pid = ?run.pid,
                status = %run.termination,
                duration_secs = run.duration.as_secs_f64(),
                "worker exited"
            );
        } else {
            tracing::warn!(
                run = run.run,
                pid = ?run.pid,
                status = %run.termination,
                duration_secs = run.duration.as_secs_f64(),
                "worker exited"
            );
        }

        let notice = restart_notice(
            run,
            &self.config.worker,
            self.config.restart_interval,
            Utc::now(),
        );
        self.stderr.append_line(&notice)
    }

    fn stopped(&self, signal: Signal) -> Stopped {
        Stopped {
            signal,
            launches: self.launches,
        }
    }
}

/// The line appended to the stderr log after every termination.
pub fn restart_notice(
    run: &WorkerRun,
    program: &Path,
    interval: Duration,
    at: DateTime<Utc>,
) -> String {
    format!(
        "[{}] worker run {} ({}) exited with {}; ran {:.2}s, restarting in {:?}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        run.run,
        program.display(),
        run.termination,
        run.duration.as_secs_f64(),
        interval,
    )
}

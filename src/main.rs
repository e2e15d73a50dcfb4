mod config;
mod log_stream;
mod session;
mod signals;
mod supervisor;
mod termination;

use clap::Parser;
use config::SupervisorConfig;
use signals::ShutdownListener;
use supervisor::Supervisor;

/// A minimal process supervisor: run `./worker` forever, appending its
/// stdout to `out.log` and its stderr to `err.log`, and relaunch it five
/// seconds after every exit.
#[derive(Parser, Debug)]
#[command(name = "keepalive", version, about)]
pub struct Cli {}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("keepalive starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(error = %e, "cannot resolve working directory");
            std::process::exit(1);
        }
    };
    let config = SupervisorConfig::rooted_at(&cwd);
    tracing::info!(
        worker = %config.worker.display(),
        stdout_log = %config.stdout_log.display(),
        stderr_log = %config.stderr_log.display(),
        restart_interval_secs = config.restart_interval.as_secs(),
        "supervising worker"
    );

    let shutdown = match ShutdownListener::install() {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            std::process::exit(1);
        }
    };

    let supervisor = match Supervisor::open(config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            tracing::error!(error = %e, "cannot open log streams");
            std::process::exit(1);
        }
    };

    match supervisor.run(shutdown.recv()).await {
        Ok(stopped) => {
            tracing::info!(
                signal = %stopped.signal,
                launches = stopped.launches,
                "keepalive stopping"
            );
            signals::reraise(stopped.signal)
        }
        Err(e) => {
            tracing::error!(error = %e, "log stream failed, supervisor exiting");
            std::process::exit(1);
        }
    }
}

/// Signal handling for shutdown.
///
/// Handles SIGINT (Ctrl-C), SIGTERM, SIGQUIT and SIGHUP. Any of them stops
/// the restart loop; the running worker's group receives the same signal.
/// Once the worker is reaped the supervisor re-raises the signal with its
/// default disposition, so the host sees a signal death, not an exit code.
use nix::sys::signal::{self, SigHandler, Signal};
use tokio::signal::unix::{signal as listen, SignalKind};

/// Installed listeners for every signal that ends the supervisor.
pub struct ShutdownListener {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sigquit: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

impl ShutdownListener {
    /// Register the listeners. Must run inside a tokio runtime, and before
    /// the first worker is launched so no signal slips past.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigint: listen(SignalKind::interrupt())?,
            sigterm: listen(SignalKind::terminate())?,
            sigquit: listen(SignalKind::quit())?,
            sighup: listen(SignalKind::hangup())?,
        })
    }

    /// Wait for the first shutdown signal.
    pub async fn recv(mut self) -> Signal {
        tokio::select! {
            _ = self.sigint.recv() => Signal::SIGINT,
            _ = self.sigterm.recv() => Signal::SIGTERM,
            _ = self.sigquit.recv() => Signal::SIGQUIT,
            _ = self.sighup.recv() => Signal::SIGHUP,
        }
    }
}

/// Terminate the current process by `sig`, as if no handler had been
/// installed. Falls back to exit code `128 + sig`.
pub fn reraise(sig: Signal) -> ! {
    // SAFETY: SIG_DFL installs no Rust code as a handler.
    let restored = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    if let Err(e) = restored.and_then(|_| signal::raise(sig)) {
        tracing::warn!(signal = %sig, error = %e, "failed to re-raise signal");
    }
    std::process::exit(128 + sig as i32)
}

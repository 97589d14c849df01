//! Liveness monitor: periodic no-op probe on a session.
//!
//! The monitor probes immediately and then every
//! [`LivenessConfig::ping_interval`]. The first probe that fails, or that
//! gets no answer within [`LivenessConfig::ping_timeout`], marks the session
//! broken and ends the monitor. The monitor also ends, without marking
//! anything, once the owner closes the session. It never reconnects;
//! reacting to [`Session::broken`] is the owning task's job.
//!
//! The monitor is a [`Worker`] built on its own [`Kernel`], meant to be
//! registered as a sibling of the task that owns the session.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info_span, warn, Instrument};

use crate::api::session::Session;
use crate::supervisor::{Kernel, Worker};
use crate::Result;

/// Default time between probes.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Default time a probe may stay unanswered.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Probe timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Pause between successful probes.
    pub ping_interval: Duration,
    /// Maximum wait for a probe's answer.
    pub ping_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

/// Supervised liveness probe for one session.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    kernel: Kernel,
}

impl LivenessMonitor {
    /// Start probing `session`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(session: Session, config: LivenessConfig) -> Self {
        let name = format!("liveness:{}", session.name());
        let kernel = Kernel::invoke(name, move |kernel| {
            run(kernel, session, config).instrument(info_span!("liveness_monitor"))
        });
        Self { kernel }
    }
}

impl Worker for LivenessMonitor {
    fn kill(&self) {
        self.kernel.kill(None);
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.kernel.wait())
    }
}

async fn run(kernel: Kernel, session: Session, config: LivenessConfig) -> Result<()> {
    let dying = kernel.dying();
    let released = session.released();

    loop {
        let outcome = tokio::select! {
            biased;

            () = dying.closed() => return Err(Kernel::err_dying()),

            () = released.closed() => return Ok(()),

            outcome = tokio::time::timeout(config.ping_timeout, session.ping()) => outcome,
        };

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!("no reply within {:?}", config.ping_timeout)),
        };

        if let Some(reason) = failure {
            // The owner closing the session is not breakage.
            if released.is_closed() {
                debug!(session = session.name(), "session closed by owner");
                return Ok(());
            }
            if session.mark_broken() {
                warn!(session = session.name(), %reason, "control plane connection broken");
            } else {
                debug!(session = session.name(), %reason, "probe failed on broken session");
            }
            return Ok(());
        }

        tokio::select! {
            biased;

            () = dying.closed() => return Err(Kernel::err_dying()),

            () = released.closed() => return Ok(()),

            () = tokio::time::sleep(config.ping_interval) => {}
        }
    }
}

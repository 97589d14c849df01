//! Supervision kernel: one node of the structured-concurrency tree.
//!
//! A [`Kernel`] runs a single work function and any number of registered
//! child [`Worker`]s as one teardown and error-reporting group:
//!
//! - the first error recorded anywhere in the group wins and is what
//!   [`Kernel::wait`] returns,
//! - any child failing kills the whole group (fail-fast),
//! - killing the kernel closes its dying signal, which every child watcher
//!   turns into a [`Worker::kill`] on its child,
//! - the work function returning kills the group so that no child outlives
//!   its parent.
//!
//! Every tracked future (the work function and one watcher per child) runs
//! on a [`TaskTracker`]. The tracker is closed once the work function has
//! returned and the node is dying, so [`TaskTracker::wait`] resolving means
//! the node and its entire subtree are dead.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::signal::{Signal, SignalWatch};
use super::Worker;
use crate::{AppError, Result};

/// Lifecycle phase of a supervision node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Running and accepting new children.
    Alive,
    /// Told to stop; children are being torn down.
    Dying,
    /// Work function and every child have finished.
    Dead,
}

struct Inner {
    name: String,
    dying: Signal,
    /// First non-sentinel error seen in the subtree. Also serializes
    /// `kill` against `register` so no child slips in after the dying
    /// signal closes.
    error: Mutex<Option<AppError>>,
    tracker: TaskTracker,
}

/// Handle to a supervision node. Clones share the node.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<Inner>,
}

impl Kernel {
    /// Create a node and start `work` on it immediately.
    ///
    /// `work` receives a handle to its own kernel so it can register
    /// children and select on [`Kernel::dying`]. It should return
    /// [`Kernel::err_dying`] (or `Ok(())`) when it stops because it was told
    /// to; any other error becomes the node's failure.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn invoke<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(Kernel) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kernel = Self {
            inner: Arc::new(Inner {
                name: name.into(),
                dying: Signal::new(),
                error: Mutex::new(None),
                tracker: TaskTracker::new(),
            }),
        };

        let fut = work(kernel.clone());
        let this = kernel.clone();
        kernel.inner.tracker.spawn(async move {
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    warn!(kernel = this.name(), "work function panicked");
                    Err(AppError::Worker(format!("{} panicked", this.name())))
                }
            };
            this.finish(result);
        });

        debug!(kernel = kernel.name(), "kernel started");
        kernel
    }

    /// Node name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Sentinel a work function returns when it stops because it was killed.
    #[must_use]
    pub fn err_dying() -> AppError {
        AppError::Dying
    }

    /// Begin supervising `worker` as a child of this node.
    ///
    /// The child is killed when this node starts dying. If the child
    /// finishes with an error, this node is killed with that error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Dying`] if this node is already dying; the offered
    /// worker is killed in that case.
    pub fn register(&self, worker: Arc<dyn Worker>) -> Result<()> {
        let guard = self.lock_error();
        if self.inner.dying.is_closed() {
            drop(guard);
            worker.kill();
            debug!(kernel = self.name(), "rejected child registration while dying");
            return Err(AppError::Dying);
        }

        let parent = self.clone();
        self.inner.tracker.spawn(supervise(parent, worker));
        drop(guard);
        Ok(())
    }

    /// Invoke a child kernel running `work` and register it under this node.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Dying`] if this node is already dying; the child
    /// is started and immediately killed in that case.
    pub fn spawn_child<F, Fut>(&self, name: impl Into<String>, work: F) -> Result<Kernel>
    where
        F: FnOnce(Kernel) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let child = Kernel::invoke(name, work);
        self.register(Arc::new(child.clone()))?;
        Ok(child)
    }

    /// Mark the node dying and cascade cancellation to every child.
    ///
    /// `reason` is recorded only if no error has been recorded yet; the
    /// [`AppError::Dying`] sentinel is never recorded. Idempotent and safe to
    /// call concurrently. The dying signal is closed before this returns, but
    /// children may still be running; use [`Kernel::wait`] for teardown.
    pub fn kill(&self, reason: Option<AppError>) {
        let mut guard = self.lock_error();
        if let Some(err) = reason {
            if !err.is_dying() && guard.is_none() {
                debug!(kernel = self.name(), error = %err, "recording first error");
                *guard = Some(err);
            }
        }
        if self.inner.dying.close() {
            debug!(kernel = self.name(), "kernel dying");
        }
        drop(guard);
    }

    /// Cancellation signal for this node's work and children.
    #[must_use]
    pub fn dying(&self) -> SignalWatch {
        self.inner.dying.watch()
    }

    /// Wait until the node and its whole subtree are dead.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded anywhere in the subtree.
    pub async fn wait(&self) -> Result<()> {
        self.inner.tracker.wait().await;
        match self.lock_error().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        let tracker = &self.inner.tracker;
        if tracker.is_closed() && tracker.is_empty() {
            Phase::Dead
        } else if self.inner.dying.is_closed() {
            Phase::Dying
        } else {
            Phase::Alive
        }
    }

    /// Record the work function's outcome, tear the group down, and stop
    /// accepting tracked tasks.
    fn finish(&self, result: Result<()>) {
        match result {
            Ok(()) => debug!(kernel = self.name(), "work function returned"),
            Err(ref err) if err.is_dying() => {
                debug!(kernel = self.name(), "work function stopped on request");
            }
            Err(ref err) => debug!(kernel = self.name(), error = %err, "work function failed"),
        }
        self.kill(result.err());
        self.inner.tracker.close();
    }

    fn lock_error(&self) -> MutexGuard<'_, Option<AppError>> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Worker for Kernel {
    fn kill(&self) {
        Kernel::kill(self, None);
    }

    fn wait(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(Kernel::wait(self))
    }
}

/// Watch one child: kill it when the parent starts dying, and fail the
/// parent if the child fails.
async fn supervise(parent: Kernel, child: Arc<dyn Worker>) {
    let dying = parent.dying();
    let result = tokio::select! {
        biased;

        result = child.wait() => result,

        () = dying.closed() => {
            child.kill();
            child.wait().await
        }
    };

    if let Err(err) = result {
        if !err.is_dying() {
            debug!(kernel = parent.name(), error = %err, "child failed");
            parent.kill(Some(err));
        }
    }
}

//! Close-once broadcast signal.
//!
//! A [`Signal`] starts open and can be closed exactly once. Any number of
//! [`SignalWatch`] observers can poll it or await the transition from
//! `tokio::select!`. Both the kernel's dying signal and the session's broken
//! indicator are built on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Owning side of a close-once signal.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl Signal {
    /// Create a new, open signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the signal, waking every observer.
    ///
    /// Returns `true` only for the call that performed the transition; every
    /// later call is a no-op returning `false`.
    #[must_use]
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Whether the signal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Read-only observer handle.
    #[must_use]
    pub fn watch(&self) -> SignalWatch {
        SignalWatch {
            token: self.token.clone(),
        }
    }
}

/// Observer side of a [`Signal`]; cannot close it.
#[derive(Debug, Clone)]
pub struct SignalWatch {
    token: CancellationToken,
}

impl SignalWatch {
    /// Resolves once the signal is closed. Cancel-safe.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }

    /// Whether the signal has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

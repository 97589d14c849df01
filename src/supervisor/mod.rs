//! Structured-concurrency supervision.
//!
//! The [`Worker`] trait is the contract every long-lived task exposes to its
//! supervisor. [`Kernel`] implements it and also supervises other workers,
//! so workers nest into a tree with deterministic teardown.

pub mod kernel;
pub mod signal;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

pub use kernel::{Kernel, Phase};
pub use signal::{Signal, SignalWatch};

/// A supervised unit of concurrent work.
///
/// Concrete task types usually hold a [`Kernel`] and delegate both methods
/// to it, implementing only their own run function.
pub trait Worker: Send + Sync {
    /// Ask the worker to stop. Idempotent; does not wait.
    fn kill(&self);

    /// Wait for the worker to finish and return its outcome.
    ///
    /// Must be cancel-safe and callable more than once.
    ///
    /// # Errors
    ///
    /// Returns the error the worker failed with, if any.
    fn wait(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

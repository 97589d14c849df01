//! A live, optionally authenticated connection to the control plane.
//!
//! [`Session`] is a cheap handle: clones share one [`Dispatcher`] and one
//! broken indicator, so the owning task can hand it to child tasks that make
//! calls concurrently. The owner is still the one that closes it.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::api::dispatcher::Dispatcher;
use crate::api::facade::Facade;
use crate::supervisor::{Signal, SignalWatch};
use crate::{AppError, Result};

/// Facade answering liveness probes.
pub const PING_FACADE: &str = "Pinger";

/// Facade handling login.
pub const ADMIN_FACADE: &str = "Admin";

struct Inner {
    name: String,
    dispatcher: Dispatcher,
    broken: Signal,
    /// Closed by [`Session::close`]; tells monitors the owner hung up.
    released: Signal,
}

/// Handle to one control-plane session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Wrap an already-established duplex stream.
    ///
    /// `name` identifies the session in logs (usually the remote address).
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn from_stream<S>(name: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let dispatcher = Dispatcher::start(name.clone(), stream);
        Self {
            inner: Arc::new(Inner {
                name,
                dispatcher,
                broken: Signal::new(),
                released: Signal::new(),
            }),
        }
    }

    /// Session name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Invoke `request` on the object `object_type`/`id`.
    ///
    /// Blocks until the matching response arrives or the session closes.
    /// A failed call affects only this caller.
    ///
    /// # Errors
    ///
    /// - [`AppError::Call`] if the server answered with an error.
    /// - [`AppError::Closed`] if the session is or becomes closed.
    pub async fn call(
        &self,
        object_type: &str,
        id: &str,
        request: &str,
        params: Value,
    ) -> Result<Value> {
        self.inner
            .dispatcher
            .call(object_type, id, request, params)
            .await
    }

    /// Typed variant of [`Session::call`].
    ///
    /// # Errors
    ///
    /// As [`Session::call`], plus [`AppError::Codec`] if `params` cannot be
    /// serialized or the result does not deserialize into `R`.
    pub async fn call_as<P, R>(
        &self,
        object_type: &str,
        id: &str,
        request: &str,
        params: &P,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(object_type, id, request, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Bind `object_type` to this session.
    #[must_use]
    pub fn facade(&self, object_type: impl Into<String>) -> Facade {
        Facade::new(self.clone(), object_type)
    }

    /// Issue the no-op liveness probe.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying call failed with.
    pub async fn ping(&self) -> Result<()> {
        self.call(PING_FACADE, "", "Ping", Value::Null).await?;
        Ok(())
    }

    /// Authenticate as `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Auth`] if the server rejects the credentials, or
    /// [`AppError::Closed`] if the session closes first.
    pub async fn login(&self, tag: &str, password: &str) -> Result<()> {
        let params = json!({ "authTag": tag, "password": password });
        match self.call(ADMIN_FACADE, "", "Login", params).await {
            Ok(_) => {
                info!(session = self.name(), tag, "logged in");
                Ok(())
            }
            Err(AppError::Call { message, .. }) => Err(AppError::Auth(message)),
            Err(err) => Err(err),
        }
    }

    /// Release the connection. Idempotent.
    ///
    /// Calls still outstanding resolve with [`AppError::Closed`]. Closing
    /// never marks the session broken.
    pub async fn close(&self) {
        if self.inner.released.close() {
            debug!(session = self.name(), "closing session");
        }
        self.inner.dispatcher.close().await;
    }

    /// Closed once [`Session::close`] has been called.
    pub(crate) fn released(&self) -> SignalWatch {
        self.inner.released.watch()
    }

    /// Whether the connection has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.dispatcher.is_closed()
    }

    /// One-shot indicator closed when the session is declared broken.
    #[must_use]
    pub fn broken(&self) -> SignalWatch {
        self.inner.broken.watch()
    }

    /// Declare the session broken: close the indicator and fail every
    /// outstanding call.
    ///
    /// Returns `true` only for the call that closed the indicator. Intended
    /// for liveness monitors.
    #[must_use]
    pub fn mark_broken(&self) -> bool {
        let first = self.inner.broken.close();
        self.inner.dispatcher.shut_down();
        first
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.dispatcher.pending_calls()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .field("broken", &self.inner.broken.is_closed())
            .finish()
    }
}

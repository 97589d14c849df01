//! Facade caller: a session bound to one object type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::session::Session;
use crate::Result;

/// Calls requests on a single facade of a [`Session`].
#[derive(Debug, Clone)]
pub struct Facade {
    session: Session,
    object_type: String,
}

impl Facade {
    /// Bind `object_type` to `session`.
    #[must_use]
    pub fn new(session: Session, object_type: impl Into<String>) -> Self {
        Self {
            session,
            object_type: object_type.into(),
        }
    }

    /// Facade name requests are addressed to.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Call a facade-level `request` (empty object id).
    ///
    /// # Errors
    ///
    /// See [`Session::call`].
    pub async fn call(&self, request: &str, params: Value) -> Result<Value> {
        self.session
            .call(&self.object_type, "", request, params)
            .await
    }

    /// Call `request` on the object `id` of this facade.
    ///
    /// # Errors
    ///
    /// See [`Session::call`].
    pub async fn call_on(&self, id: &str, request: &str, params: Value) -> Result<Value> {
        self.session
            .call(&self.object_type, id, request, params)
            .await
    }

    /// Typed facade-level call.
    ///
    /// # Errors
    ///
    /// See [`Session::call_as`].
    pub async fn call_as<P, R>(&self, request: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.session
            .call_as(&self.object_type, "", request, params)
            .await
    }
}

//! Wire envelopes exchanged with the control plane.
//!
//! One JSON object per line in each direction:
//!
//! ```json
//! {"requestId":7,"type":"Pinger","id":"","request":"Ping","params":null}
//! {"requestId":7,"response":{}}
//! {"requestId":8,"error":"permission denied","errorCode":"unauthorized"}
//! ```
//!
//! Payloads are opaque [`serde_json::Value`]s; only `requestId` matters to
//! the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppError;

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Correlation id; unique per session.
    pub request_id: u64,
    /// Object type (facade) the request is addressed to.
    #[serde(rename = "type")]
    pub object_type: String,
    /// Object id within the facade; empty for facade-level requests.
    #[serde(default)]
    pub id: String,
    /// Request (method) name.
    pub request: String,
    /// Request arguments.
    #[serde(default)]
    pub params: Value,
}

/// Inbound response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Correlation id of the request being answered.
    pub request_id: u64,
    /// Result payload when the call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Error message when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional machine-readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl Response {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn success(request_id: u64, result: Value) -> Self {
        Self {
            request_id,
            response: Some(result),
            error: None,
            error_code: None,
        }
    }

    /// Failed response carrying `message` and an optional `code`.
    #[must_use]
    pub fn failure(request_id: u64, message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            request_id,
            response: None,
            error: Some(message.into()),
            error_code: code,
        }
    }

    /// Convert into the outcome delivered to the waiting caller.
    ///
    /// A missing result on a successful response is treated as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Call`] when the response carries an error.
    pub fn into_result(self) -> crate::Result<Value> {
        match self.error {
            Some(message) => Err(AppError::Call {
                message,
                code: self.error_code,
            }),
            None => Ok(self.response.unwrap_or(Value::Null)),
        }
    }
}

//! Control-plane session layer.
//!
//! - `endpoint`: [`EndpointSet`] and [`DialOptions`].
//! - `dial`: TLS connect with bounded retry, then login.
//! - `codec` / `message`: NDJSON framing and the request/response envelopes.
//! - `dispatcher`: correlation of concurrent calls over one stream.
//! - `session`: the [`Session`] handle tasks call through.
//! - `facade`: a session bound to one object type.
//! - `monitor`: the [`LivenessMonitor`] that detects a dead session.

pub mod codec;
pub mod dial;
pub mod dispatcher;
pub mod endpoint;
pub mod facade;
pub mod message;
pub mod monitor;
pub mod session;

pub use dial::dial;
pub use endpoint::{DialOptions, EndpointSet};
pub use facade::Facade;
pub use monitor::{LivenessConfig, LivenessMonitor};
pub use session::Session;

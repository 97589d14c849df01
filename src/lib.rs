#![forbid(unsafe_code)]

//! Runtime backbone for fleet agents: a structured-concurrency supervision
//! kernel and a control-plane session layer with call correlation and
//! liveness probing.

pub mod api;
pub mod config;
pub mod errors;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

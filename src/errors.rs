//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Crate error enumeration covering every failure mode of the kernel and
/// the session layer.
///
/// Cloneable so a kernel can hand its first recorded error to every caller
/// of [`Kernel::wait`](crate::supervisor::Kernel::wait).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket I/O failure.
    Io(String),
    /// Trust anchor, server name, or certificate verification failure.
    Tls(String),
    /// Connection could not be established within the dial budget.
    Dial(String),
    /// The control plane rejected the supplied identity.
    Auth(String),
    /// Wire framing or payload (de)serialization failure.
    Codec(String),
    /// The control plane answered a call with an error payload.
    Call {
        /// Human-readable error returned by the server.
        message: String,
        /// Optional machine-readable error code.
        code: Option<String>,
    },
    /// The session was closed before the call could complete.
    Closed,
    /// The liveness monitor declared the session broken.
    Broken,
    /// The supervising kernel is dying; not a failure by itself.
    Dying,
    /// A supervised worker faulted (for example, panicked).
    Worker(String),
}

impl AppError {
    /// Whether this error is the "told to stop" sentinel rather than a failure.
    #[must_use]
    pub fn is_dying(&self) -> bool {
        matches!(self, Self::Dying)
    }

    /// Server-side error code, if this is a [`AppError::Call`] carrying one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Call { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Tls(msg) => write!(f, "tls: {msg}"),
            Self::Dial(msg) => write!(f, "dial: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Call {
                message,
                code: Some(code),
            } => write!(f, "{message} ({code})"),
            Self::Call { message, code: None } => write!(f, "{message}"),
            Self::Closed => write!(f, "connection is shut down"),
            Self::Broken => write!(f, "connection to control plane is broken"),
            Self::Dying => write!(f, "worker is dying"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

//! Control-plane endpoint description and dial options.

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use crate::{AppError, Result};

/// Default overall dial budget.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default pause between dial attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Where and as whom to connect. Immutable once built.
///
/// If both tag and password are empty no login is attempted, which yields an
/// unauthenticated session suitable for diagnostics.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointSet {
    addrs: Vec<String>,
    ca_cert: Vec<u8>,
    tag: String,
    password: String,
    server_name: Option<String>,
}

impl EndpointSet {
    /// Endpoint set with no identity.
    ///
    /// `ca_cert` holds the PEM-encoded CA certificate(s) used to validate the
    /// server.
    #[must_use]
    pub fn new(addrs: Vec<String>, ca_cert: Vec<u8>) -> Self {
        Self {
            addrs,
            ca_cert,
            tag: String::new(),
            password: String::new(),
            server_name: None,
        }
    }

    /// Attach the entity tag and password used to log in.
    #[must_use]
    pub fn with_identity(mut self, tag: impl Into<String>, password: impl Into<String>) -> Self {
        self.tag = tag.into();
        self.password = password.into();
        self
    }

    /// Override the name the server certificate is validated against.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Configured control-plane addresses, in preference order.
    #[must_use]
    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    /// PEM-encoded trust anchor.
    #[must_use]
    pub fn ca_cert(&self) -> &[u8] {
        &self.ca_cert
    }

    /// Entity tag of the connecting agent.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Login password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether a login should be attempted after connecting.
    #[must_use]
    pub fn has_identity(&self) -> bool {
        !self.tag.is_empty() || !self.password.is_empty()
    }

    /// The address the dial loop contacts.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when no address is configured.
    pub fn primary_addr(&self) -> Result<&str> {
        self.addrs
            .first()
            .map(String::as_str)
            .ok_or_else(|| AppError::Config("endpoint set has no addresses".into()))
    }

    /// Name the server certificate must match: the override if set,
    /// otherwise the host part of the primary address.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when no address is configured.
    pub fn server_name(&self) -> Result<&str> {
        match self.server_name.as_deref() {
            Some(name) => Ok(name),
            None => Ok(host_of(self.primary_addr()?)),
        }
    }
}

impl Debug for EndpointSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSet")
            .field("addrs", &self.addrs)
            .field("ca_cert_bytes", &self.ca_cert.len())
            .field("tag", &self.tag)
            .field("password", &"<redacted>")
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Dial retry behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialOptions {
    /// Total time to keep trying before giving up.
    pub timeout: Duration,
    /// Pause between unsuccessful attempts.
    pub retry_delay: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Strip the port (and IPv6 brackets) from `host:port`.
fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }
    addr.rsplit_once(':').map_or(addr, |(host, _)| host)
}

//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::api::{DialOptions, EndpointSet, LivenessConfig};
use crate::{AppError, Result};

/// Keychain service name credentials are stored under.
pub const KEYRING_SERVICE: &str = "agent-backbone";

/// Environment variable consulted when the keychain has no password.
pub const PASSWORD_ENV: &str = "AGENT_BACKBONE_PASSWORD";

/// Upper bound for `dial.timeout_seconds` (one week).
pub const MAX_DIAL_TIMEOUT_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Upper bound for `dial.retry_delay_ms` (one hour).
pub const MAX_RETRY_DELAY_MS: u64 = 60 * 60 * 1000;

/// Upper bound for the `[liveness]` settings (one day).
pub const MAX_LIVENESS_SECONDS: u64 = 24 * 60 * 60;

/// Where the control plane lives and who we are.
///
/// The password is never read from the file; see
/// [`GlobalConfig::load_credentials`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ControlPlaneConfig {
    /// Control-plane addresses (`host:port`).
    pub addrs: Vec<String>,
    /// PEM file holding the CA certificate that signs the server's.
    pub ca_cert_path: PathBuf,
    /// Entity tag to log in as; empty for an unauthenticated session.
    #[serde(default)]
    pub tag: String,
    /// Override for the TLS server name.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Login password (populated at runtime).
    #[serde(skip)]
    pub password: String,
}

/// Dial retry settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DialConfig {
    /// Total dial budget.
    #[serde(default = "default_dial_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Pause between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_dial_timeout_seconds(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_dial_timeout_seconds() -> u64 {
    600
}

fn default_retry_delay_ms() -> u64 {
    2000
}

/// Liveness probe settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LivenessSettings {
    /// Seconds between probes.
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
    /// Seconds a probe may stay unanswered.
    #[serde(default = "default_ping_timeout_seconds")]
    pub ping_timeout_seconds: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            ping_interval_seconds: default_ping_interval_seconds(),
            ping_timeout_seconds: default_ping_timeout_seconds(),
        }
    }
}

fn default_ping_interval_seconds() -> u64 {
    5
}

fn default_ping_timeout_seconds() -> u64 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Control-plane endpoint and identity.
    pub control_plane: ControlPlaneConfig,
    /// Dial retry behaviour.
    #[serde(default)]
    pub dial: DialConfig,
    /// Liveness probing.
    #[serde(default)]
    pub liveness: LivenessSettings,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the login password from the OS keychain with env-var fallback.
    ///
    /// Does nothing when no tag is configured. Tries the
    /// [`KEYRING_SERVICE`] keychain entry named after the tag first, then
    /// [`PASSWORD_ENV`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a tag is configured but neither source
    /// provides a password.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if self.control_plane.tag.is_empty() {
            return Ok(());
        }
        self.control_plane.password =
            load_credential(&self.control_plane.tag, PASSWORD_ENV).await?;
        Ok(())
    }

    /// Read the trust anchor and build the endpoint set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the CA file cannot be read.
    pub fn endpoints(&self) -> Result<EndpointSet> {
        let cp = &self.control_plane;
        Ok(self
            .anonymous_endpoints()?
            .with_identity(cp.tag.clone(), cp.password.clone()))
    }

    /// Endpoint set without identity, for diagnostic read-only sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the CA file cannot be read.
    pub fn anonymous_endpoints(&self) -> Result<EndpointSet> {
        let cp = &self.control_plane;
        let ca_cert = fs::read(&cp.ca_cert_path).map_err(|err| {
            AppError::Config(format!(
                "cannot read ca_cert_path {}: {err}",
                cp.ca_cert_path.display()
            ))
        })?;

        let mut endpoints = EndpointSet::new(cp.addrs.clone(), ca_cert);
        if let Some(name) = &cp.server_name {
            endpoints = endpoints.with_server_name(name.clone());
        }
        Ok(endpoints)
    }

    /// Dial options derived from `[dial]`.
    #[must_use]
    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            timeout: Duration::from_secs(self.dial.timeout_seconds),
            retry_delay: Duration::from_millis(self.dial.retry_delay_ms),
        }
    }

    /// Liveness monitor settings derived from `[liveness]`.
    #[must_use]
    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            ping_interval: Duration::from_secs(self.liveness.ping_interval_seconds),
            ping_timeout: Duration::from_secs(self.liveness.ping_timeout_seconds),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.control_plane.addrs.is_empty() {
            return Err(AppError::Config(
                "control_plane.addrs must not be empty".into(),
            ));
        }

        if self.dial.timeout_seconds == 0 {
            return Err(AppError::Config(
                "dial.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.dial.timeout_seconds > MAX_DIAL_TIMEOUT_SECONDS {
            return Err(AppError::Config(format!(
                "dial.timeout_seconds must not exceed {MAX_DIAL_TIMEOUT_SECONDS}"
            )));
        }

        if self.dial.retry_delay_ms > MAX_RETRY_DELAY_MS {
            return Err(AppError::Config(format!(
                "dial.retry_delay_ms must not exceed {MAX_RETRY_DELAY_MS}"
            )));
        }

        if self.liveness.ping_interval_seconds == 0 || self.liveness.ping_timeout_seconds == 0 {
            return Err(AppError::Config(
                "liveness intervals must be greater than zero".into(),
            ));
        }

        if self.liveness.ping_interval_seconds > MAX_LIVENESS_SECONDS
            || self.liveness.ping_timeout_seconds > MAX_LIVENESS_SECONDS
        {
            return Err(AppError::Config(format!(
                "liveness intervals must not exceed {MAX_LIVENESS_SECONDS} seconds"
            )));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential for {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}

//! Dial loop: TLS connect with bounded retry, then optional login.
//!
//! 1. Build a TLS client config trusting only the endpoint set's CA. A bad
//!    trust anchor or server name aborts before any network attempt.
//! 2. Connect to the primary address. Refused, unreachable, and timed-out
//!    attempts are retried every `retry_delay` until `timeout` is spent.
//!    A server certificate the verifier rejects aborts immediately.
//! 3. Wrap the stream in a [`Session`] and log in when an identity is set.
//!    A rejected login closes the session and aborts.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use crate::api::endpoint::{DialOptions, EndpointSet};
use crate::api::session::Session;
use crate::{AppError, Result};

/// Connect and, if an identity is configured, log in.
///
/// Only the first configured address is contacted.
///
/// # Errors
///
/// - [`AppError::Config`] if the endpoint set has no address.
/// - [`AppError::Tls`] for an unusable trust anchor or server name, or a
///   server certificate that fails validation.
/// - [`AppError::Dial`] if no connection succeeded within `opts.timeout`.
/// - [`AppError::Auth`] if the server rejected the identity.
pub async fn dial(endpoints: &EndpointSet, opts: &DialOptions) -> Result<Session> {
    let connector = tls_connector(endpoints.ca_cert())?;
    let addr = endpoints.primary_addr()?;
    let server_name = ServerName::try_from(endpoints.server_name()?.to_owned())
        .map_err(|e| AppError::Tls(format!("invalid server name: {e}")))?;

    if endpoints.addrs().len() > 1 {
        warn!(
            addr,
            ignored = endpoints.addrs().len() - 1,
            "multiple control-plane addresses configured; dialing the first only"
        );
    }

    let stream = connect_with_retry(&connector, addr, &server_name, opts).await?;
    let session = Session::from_stream(addr, stream);

    if endpoints.has_identity() {
        if let Err(err) = session.login(endpoints.tag(), endpoints.password()).await {
            warn!(addr, tag = endpoints.tag(), error = %err, "login failed");
            session.close().await;
            return Err(err);
        }
    }

    Ok(session)
}

/// Build a connector that trusts exactly the PEM certificates in `ca_pem`.
///
/// # Errors
///
/// Returns [`AppError::Tls`] if `ca_pem` holds no usable certificate.
pub fn tls_connector(ca_pem: &[u8]) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(ca_pem) {
        let cert = cert.map_err(|e| AppError::Tls(format!("invalid CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| AppError::Tls(format!("invalid CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(AppError::Tls("no CA certificate found in trust anchor".into()));
    }

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| AppError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn connect_with_retry(
    connector: &TlsConnector,
    addr: &str,
    server_name: &ServerName<'static>,
    opts: &DialOptions,
) -> Result<TlsStream<TcpStream>> {
    // `None` means the budget is too large to represent: never give up.
    let deadline = Instant::now().checked_add(opts.timeout);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        info!(addr, attempt, "dialing control plane");

        let connect = connect_once(connector, addr, server_name.clone());
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, connect).await,
            None => Ok(connect.await),
        };
        let failure = match outcome {
            Ok(Ok(stream)) => {
                info!(addr, attempt, "connection established");
                return Ok(stream);
            }
            Ok(Err(err)) if is_certificate_error(&err) => {
                warn!(addr, error = %err, "server certificate rejected");
                return Err(AppError::Tls(format!("cannot verify {addr}: {err}")));
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => "attempt timed out".to_owned(),
        };

        warn!(addr, attempt, error = failure.as_str(), "dial attempt failed");

        if out_of_budget(deadline, opts.retry_delay) {
            return Err(AppError::Dial(format!(
                "cannot connect to {addr} after {attempt} attempt(s): {failure}"
            )));
        }
        tokio::time::sleep(opts.retry_delay).await;
    }
}

/// Whether sleeping `retry_delay` would reach or pass `deadline`.
fn out_of_budget(deadline: Option<Instant>, retry_delay: Duration) -> bool {
    deadline.is_some_and(|deadline| {
        Instant::now()
            .checked_add(retry_delay)
            .map_or(true, |next| next >= deadline)
    })
}

async fn connect_once(
    connector: &TlsConnector,
    addr: &str,
    server_name: ServerName<'static>,
) -> io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    tcp.set_nodelay(true)?;
    connector.connect(server_name, tcp).await
}

/// Whether a handshake error means the server's identity is unacceptable,
/// which no amount of retrying will fix.
fn is_certificate_error(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|tls| {
            matches!(
                tls,
                rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented
            )
        })
}

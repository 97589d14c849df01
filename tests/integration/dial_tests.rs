//! Integration tests for dialing the control plane over TLS.
//!
//! Exercises retry-until-timeout, terminal certificate failures, and the
//! optional login step against a loopback TLS stub.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_backbone::api::message::Request;
use agent_backbone::api::{self, DialOptions, EndpointSet};
use agent_backbone::AppError;
use tokio::net::TcpListener;

use super::test_helpers::{
    default_handler, default_reply, spawn_tls_server, start_tls_control_plane, unused_addr,
    Handler, TestCa, GOOD_PASSWORD,
};

fn opts(timeout_ms: u64, retry_delay_ms: u64) -> DialOptions {
    DialOptions {
        timeout: Duration::from_millis(timeout_ms),
        retry_delay: Duration::from_millis(retry_delay_ms),
    }
}

#[test]
fn default_dial_options_match_documented_values() {
    let defaults = DialOptions::default();
    assert_eq!(defaults.timeout, Duration::from_secs(600));
    assert_eq!(defaults.retry_delay, Duration::from_secs(2));
}

#[tokio::test]
async fn dial_retries_until_endpoint_starts_accepting() {
    let ca = TestCa::generate();
    let addr = unused_addr().await;
    let acceptor = ca.acceptor();

    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        let listener = TcpListener::bind(addr).await.expect("rebind reserved port");
        spawn_tls_server(listener, acceptor, default_handler())
    });

    let session = api::dial(&ca.endpoints(addr), &opts(200, 50))
        .await
        .expect("dial succeeds once the endpoint accepts");
    session.ping().await.unwrap();
    session.close().await;

    server.await.unwrap().abort();
}

#[tokio::test]
async fn dial_fails_terminally_when_endpoint_keeps_refusing() {
    let ca = TestCa::generate();
    let addr = unused_addr().await;

    let started = Instant::now();
    let err = api::dial(&ca.endpoints(addr), &opts(100, 20))
        .await
        .expect_err("nothing is listening");
    let elapsed = started.elapsed();

    assert!(matches!(err, AppError::Dial(_)), "got {err:?}");
    assert!(elapsed < Duration::from_millis(150), "took {elapsed:?}");
}

#[tokio::test]
async fn dial_does_not_sleep_past_its_deadline() {
    let ca = TestCa::generate();
    let addr = unused_addr().await;

    // The retry delay alone exceeds the budget, so only one attempt is made.
    let started = Instant::now();
    let err = api::dial(&ca.endpoints(addr), &opts(100, 2000))
        .await
        .expect_err("nothing is listening");

    assert!(matches!(err, AppError::Dial(ref msg) if msg.contains("1 attempt")), "got {err:?}");
    assert!(started.elapsed() < Duration::from_millis(150));
}

#[tokio::test]
async fn untrusted_certificate_fails_without_retrying() {
    let server_ca = TestCa::generate();
    let other_ca = TestCa::generate();
    let (addr, server) = start_tls_control_plane(&server_ca, default_handler()).await;

    let started = Instant::now();
    let err = api::dial(&other_ca.endpoints(addr), &opts(5_000, 50))
        .await
        .expect_err("certificate is not trusted");

    assert!(matches!(err, AppError::Tls(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(1), "certificate errors are not retried");
    server.abort();
}

#[tokio::test]
async fn server_name_mismatch_is_a_tls_error() {
    let ca = TestCa::generate();
    let (addr, server) = start_tls_control_plane(&ca, default_handler()).await;

    let endpoints = ca.endpoints(addr).with_server_name("controller.example");
    let err = api::dial(&endpoints, &opts(2_000, 50))
        .await
        .expect_err("name does not match the certificate");

    assert!(matches!(err, AppError::Tls(_)), "got {err:?}");
    server.abort();
}

#[tokio::test]
async fn garbage_trust_anchor_fails_before_connecting() {
    let addr = unused_addr().await;
    let endpoints = EndpointSet::new(vec![addr.to_string()], b"garbage".to_vec());

    let err = api::dial(&endpoints, &opts(1_000, 50)).await.expect_err("bad anchor");
    assert!(matches!(err, AppError::Tls(_)), "got {err:?}");
}

#[tokio::test]
async fn empty_address_list_is_a_config_error() {
    let ca = TestCa::generate();
    let endpoints = EndpointSet::new(Vec::new(), ca.cert_pem.as_bytes().to_vec());

    let err = api::dial(&endpoints, &opts(1_000, 50)).await.expect_err("no address");
    assert!(matches!(err, AppError::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn session_without_identity_skips_login() {
    let login_seen = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&login_seen);
    let handler: Handler = Arc::new(move |req: &Request| {
        if req.request == "Login" {
            seen.store(true, Ordering::SeqCst);
        }
        Some(default_reply(req))
    });

    let ca = TestCa::generate();
    let (addr, server) = start_tls_control_plane(&ca, handler).await;

    let session = api::dial(&ca.endpoints(addr), &opts(2_000, 50)).await.unwrap();
    session.ping().await.unwrap();
    assert!(!login_seen.load(Ordering::SeqCst));

    session.close().await;
    server.abort();
}

#[tokio::test]
async fn valid_identity_logs_in() {
    let ca = TestCa::generate();
    let (addr, server) = start_tls_control_plane(&ca, default_handler()).await;

    let endpoints = ca.endpoints(addr).with_identity("machine-0", GOOD_PASSWORD);
    let session = api::dial(&endpoints, &opts(2_000, 50)).await.unwrap();
    assert!(!session.is_closed());
    session.ping().await.unwrap();

    session.close().await;
    server.abort();
}

#[tokio::test]
async fn rejected_login_fails_dial_without_retrying() {
    let ca = TestCa::generate();
    let (addr, server) = start_tls_control_plane(&ca, default_handler()).await;

    let endpoints = ca.endpoints(addr).with_identity("machine-0", "wrong");
    let started = Instant::now();
    let err = api::dial(&endpoints, &opts(5_000, 50))
        .await
        .expect_err("bad password");

    assert!(
        matches!(err, AppError::Auth(ref msg) if msg.contains("invalid entity name or password")),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(1));
    server.abort();
}

/// Only the first configured address is dialed; the rest are ignored.
#[tokio::test]
async fn only_the_first_address_is_dialed() {
    let ca = TestCa::generate();
    let (live, server) = start_tls_control_plane(&ca, default_handler()).await;
    let dead = unused_addr().await;

    let live_first = EndpointSet::new(
        vec![live.to_string(), dead.to_string()],
        ca.cert_pem.as_bytes().to_vec(),
    )
    .with_server_name("localhost");
    let session = api::dial(&live_first, &opts(1_000, 50)).await.unwrap();
    session.close().await;

    let dead_first = EndpointSet::new(
        vec![dead.to_string(), live.to_string()],
        ca.cert_pem.as_bytes().to_vec(),
    )
    .with_server_name("localhost");
    let err = api::dial(&dead_first, &opts(100, 20)).await.expect_err("first address is dead");
    assert!(matches!(err, AppError::Dial(_)), "got {err:?}");

    server.abort();
}

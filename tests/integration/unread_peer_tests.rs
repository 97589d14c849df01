//! Integration tests for tearing down a session whose peer has stopped
//! reading: a wedged or half-open control plane.
//!
//! In-memory pipes never block on shutdown, so these run over real TLS
//! with a peer that leaves the socket buffers full.

use std::sync::Arc;
use std::time::Duration;

use agent_backbone::api::{self, DialOptions, LivenessConfig, LivenessMonitor, Session};
use agent_backbone::supervisor::Kernel;
use agent_backbone::{AppError, Result};
use serde_json::json;
use tokio::task::JoinHandle;

use super::test_helpers::{eventually, start_unread_tls_peer, TestCa};

const GUARD: Duration = Duration::from_secs(3);

/// Large enough to overflow the loopback socket buffers.
const PAYLOAD_BYTES: usize = 16 << 20;

async fn dial_unread_peer() -> (Session, JoinHandle<()>) {
    let ca = TestCa::generate();
    let (addr, peer) = start_unread_tls_peer(&ca).await;
    let opts = DialOptions {
        timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(50),
    };
    let session = api::dial(&ca.endpoints(addr), &opts).await.unwrap();
    (session, peer)
}

/// Start a call whose request cannot be fully written.
fn push_oversized(session: &Session) -> JoinHandle<Result<serde_json::Value>> {
    let session = session.clone();
    tokio::spawn(async move {
        let blob = "x".repeat(PAYLOAD_BYTES);
        session.call("Big", "", "Push", json!({ "blob": blob })).await
    })
}

#[tokio::test]
async fn close_returns_when_peer_stops_reading() {
    let (session, peer) = dial_unread_peer().await;
    let stuck = push_oversized(&session);
    assert!(eventually(GUARD, || session.pending_calls() == 1).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(GUARD, session.close())
        .await
        .expect("close finishes even though the peer is not draining");
    assert!(session.is_closed());

    let outcome = tokio::time::timeout(GUARD, stuck).await.unwrap().unwrap();
    assert_eq!(outcome, Err(AppError::Closed));

    // Closing again is immediate.
    tokio::time::timeout(Duration::from_millis(100), session.close())
        .await
        .expect("second close is a no-op");
    peer.abort();
}

async fn close_on_broken(kernel: Kernel, session: Session) -> Result<()> {
    let monitor = LivenessMonitor::start(
        session.clone(),
        LivenessConfig {
            ping_interval: Duration::from_millis(20),
            ping_timeout: Duration::from_millis(200),
        },
    );
    if let Err(err) = kernel.register(Arc::new(monitor)) {
        session.close().await;
        return Err(err);
    }

    let dying = kernel.dying();
    let broken = session.broken();
    let outcome = tokio::select! {
        () = dying.closed() => Err(Kernel::err_dying()),
        () = broken.closed() => Err(AppError::Broken),
    };
    session.close().await;
    outcome
}

#[tokio::test]
async fn owner_closing_a_wedged_session_does_not_block_wait() {
    let (session, peer) = dial_unread_peer().await;
    // Fills the socket so the probe queued behind it never reaches the wire.
    let stuck = push_oversized(&session);

    let owned = session.clone();
    let root = Kernel::invoke("agent", move |kernel| close_on_broken(kernel, owned));

    let outcome = tokio::time::timeout(GUARD, root.wait())
        .await
        .expect("root finishes teardown");
    assert_eq!(outcome, Err(AppError::Broken));
    assert!(session.broken().is_closed());
    assert!(session.is_closed());

    let call = tokio::time::timeout(GUARD, stuck).await.unwrap().unwrap();
    assert_eq!(call, Err(AppError::Closed));
    peer.abort();
}

#[tokio::test]
async fn killing_the_owner_of_a_wedged_session_does_not_block_wait() {
    let (session, peer) = dial_unread_peer().await;
    let _stuck = push_oversized(&session);
    assert!(eventually(GUARD, || session.pending_calls() >= 1).await);

    let owned = session.clone();
    let root = Kernel::invoke("agent", move |kernel| close_on_broken(kernel, owned));
    root.kill(None);

    let outcome = tokio::time::timeout(GUARD, root.wait())
        .await
        .expect("root finishes teardown");
    assert_eq!(outcome, Ok(()));
    assert!(session.is_closed());
    peer.abort();
}

//! Request/response multiplexing over one duplex stream.
//!
//! A [`Dispatcher`] owns two tasks on the stream:
//!
//! - the **writer** drains an [`mpsc`] queue and writes one NDJSON line per
//!   request, so writes to the wire are serialized,
//! - the **reader** decodes response lines with [`ApiCodec`] and routes each
//!   one, by correlation id alone, to the oneshot slot of the caller that is
//!   waiting for it.
//!
//! The pending-call table becomes `None` once the dispatcher shuts down;
//! every slot still in it is resolved with [`AppError::Closed`] and later
//! calls fail immediately. Shutdown happens on explicit close, on EOF or I/O
//! failure in either task, or when the session is marked broken.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::api::codec::ApiCodec;
use crate::api::message::{Request, Response};
use crate::{AppError, Result};

/// Capacity of the outbound request queue.
const OUTBOUND_CAPACITY: usize = 64;

/// How long the writer may spend flushing and sending close_notify on
/// shutdown. A peer that stopped reading would otherwise stall it forever.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type Slot = oneshot::Sender<Result<Value>>;

/// State shared between the dispatcher handle and its two tasks.
struct Shared {
    name: String,
    pending: Mutex<Option<HashMap<u64, Slot>>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock_pending(&self) -> MutexGuard<'_, Option<HashMap<u64, Slot>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `outcome` to the caller waiting on `request_id`.
    ///
    /// Returns `false` when no such call is pending.
    fn resolve(&self, request_id: u64, outcome: Result<Value>) -> bool {
        let slot = self
            .lock_pending()
            .as_mut()
            .and_then(|pending| pending.remove(&request_id));
        match slot {
            Some(slot) => {
                // The caller may have given up; nothing to do then.
                let _ = slot.send(outcome);
                true
            }
            None => false,
        }
    }

    fn forget(&self, request_id: u64) {
        if let Some(pending) = self.lock_pending().as_mut() {
            pending.remove(&request_id);
        }
    }

    /// Stop both tasks and fail every pending call. Idempotent.
    fn shut_down(&self) {
        self.shutdown.cancel();
        let drained = self.lock_pending().take();
        if let Some(pending) = drained {
            if !pending.is_empty() {
                debug!(
                    session = self.name,
                    count = pending.len(),
                    "dispatcher: failing pending calls"
                );
            }
            for (_, slot) in pending {
                let _ = slot.send(Err(AppError::Closed));
            }
        }
    }
}

/// Removes an abandoned call from the table when its caller is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(self.request_id);
    }
}

/// Correlating request dispatcher for one connection.
pub struct Dispatcher {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    outbound: mpsc::Sender<Request>,
    tasks: TaskTracker,
}

impl Dispatcher {
    /// Split `stream` and start the reader and writer tasks on it.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start<S>(name: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.into(),
            pending: Mutex::new(Some(HashMap::new())),
            shutdown: CancellationToken::new(),
        });

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let tasks = TaskTracker::new();
        tasks.spawn(run_reader(Arc::clone(&shared), read_half));
        tasks.spawn(run_writer(Arc::clone(&shared), write_half, outbound_rx));
        tasks.close();

        Self {
            shared,
            next_id: AtomicU64::new(1),
            outbound,
            tasks,
        }
    }

    /// Issue one request and wait for its response.
    ///
    /// Safe to call concurrently from many tasks.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] if the dispatcher is shut down before or while
    ///   the call is outstanding.
    /// - [`AppError::Call`] if the server answered with an error.
    /// - [`AppError::Codec`] if the request could not be serialized.
    pub async fn call(
        &self,
        object_type: &str,
        id: &str,
        request: &str,
        params: Value,
    ) -> Result<Value> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (slot, outcome) = oneshot::channel();

        match self.shared.lock_pending().as_mut() {
            Some(pending) => {
                pending.insert(request_id, slot);
            }
            None => return Err(AppError::Closed),
        }
        let _guard = PendingGuard {
            shared: &self.shared,
            request_id,
        };

        let message = Request {
            request_id,
            object_type: object_type.to_owned(),
            id: id.to_owned(),
            request: request.to_owned(),
            params,
        };
        if self.outbound.send(message).await.is_err() {
            return Err(AppError::Closed);
        }

        outcome.await.unwrap_or(Err(AppError::Closed))
    }

    /// Shut down and wait for both tasks to release the stream. Idempotent.
    pub async fn close(&self) {
        self.shared.shut_down();
        self.tasks.wait().await;
    }

    /// Shut down without waiting for the tasks to exit.
    pub fn shut_down(&self) {
        self.shared.shut_down();
    }

    /// Whether the dispatcher has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Number of calls currently awaiting a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.lock_pending().as_ref().map_or(0, HashMap::len)
    }
}

/// Writer task: serialize queued requests onto the wire, one line each.
async fn run_writer<S>(
    shared: Arc<Shared>,
    mut writer: WriteHalf<S>,
    mut outbound_rx: mpsc::Receiver<Request>,
) where
    S: AsyncWrite,
{
    loop {
        let message = tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => break,

            message = outbound_rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let mut bytes = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                shared.resolve(message.request_id, Err(AppError::from(err)));
                continue;
            }
        };
        bytes.push(b'\n');

        let written = tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => break,

            written = async {
                writer.write_all(&bytes).await?;
                writer.flush().await
            } => written,
        };
        if let Err(err) = written {
            warn!(session = shared.name, error = %err, "dispatcher: write failed, shutting down");
            break;
        }
    }

    // Best effort: the peer may already be gone, or no longer reading.
    if tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown())
        .await
        .is_err()
    {
        warn!(
            session = shared.name,
            grace = ?SHUTDOWN_GRACE,
            "dispatcher: peer not draining, dropping stream without clean shutdown"
        );
    }
    shared.shut_down();
    debug!(session = shared.name, "dispatcher: writer stopped");
}

/// Reader task: decode response lines and route them to waiting callers.
async fn run_reader<S>(shared: Arc<Shared>, reader: ReadHalf<S>)
where
    S: AsyncRead,
{
    let mut framed = FramedRead::new(reader, ApiCodec::new());

    loop {
        tokio::select! {
            biased;

            () = shared.shutdown.cancelled() => break,

            item = framed.next() => match item {
                None => {
                    debug!(session = shared.name, "dispatcher: EOF from server");
                    break;
                }
                Some(Err(AppError::Codec(ref msg))) => {
                    warn!(session = shared.name, error = msg.as_str(), "dispatcher: framing error, skipping");
                }
                Some(Err(err)) => {
                    warn!(session = shared.name, error = %err, "dispatcher: read failed, shutting down");
                    break;
                }
                Some(Ok(line)) => route_line(&shared, &line),
            },
        }
    }

    shared.shut_down();
    debug!(session = shared.name, "dispatcher: reader stopped");
}

fn route_line(shared: &Shared, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    let response: Response = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(err) => {
            warn!(session = shared.name, error = %err, raw_line = line, "dispatcher: malformed response, skipping");
            return;
        }
    };

    let request_id = response.request_id;
    if !shared.resolve(request_id, response.into_result()) {
        warn!(
            session = shared.name,
            request_id, "dispatcher: response for unknown request"
        );
    }
}

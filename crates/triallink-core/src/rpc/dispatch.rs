//! Request dispatcher - correlation ids, pending calls, the reader loop
//!
//! One dispatcher per session. Arbitrarily many callers may `send`
//! concurrently; a single reader task routes every inbound line to the
//! pending call whose id matches. Responses and requests have no ordering
//! relationship, correlation is by id only.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{Result, RpcError};
use super::protocol::{parse_response, Request, Response};
use super::transport::Transport;

/// An in-flight request. The slot is fulfilled at most once, by a matching
/// response, a timeout, or transport shutdown; whichever removes the entry
/// from the pending map first wins.
struct PendingCall {
    method: String,
    sent_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

pub struct RequestDispatcher {
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<String, PendingCall>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RequestDispatcher {
    /// Create a dispatcher and start its reader loop.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let pending: Arc<DashMap<String, PendingCall>> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let reader = tokio::spawn(Self::reader_loop(
            transport.clone(),
            pending.clone(),
            closed.clone(),
            shutdown.clone(),
        ));

        Self {
            transport,
            pending,
            next_id: AtomicU64::new(0),
            closed,
            shutdown,
            reader: parking_lot::Mutex::new(Some(reader)),
        }
    }

    /// True once the child exited or the dispatcher was shut down. All
    /// subsequent sends fail immediately with `TransportClosed`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Issue one request and wait for its response or the timeout.
    ///
    /// A timed-out call is removed from the pending set; a response arriving
    /// afterwards is discarded as unmatched. Cancelling the returned future
    /// likewise removes the entry without disturbing other in-flight calls.
    pub async fn send(&self, method: &str, params: Value, limit: Duration) -> Result<Value> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        let (tx, rx) = oneshot::channel();
        let call = PendingCall {
            method: method.to_string(),
            sent_at: Instant::now(),
            tx,
        };

        // Register before writing so a fast response can never race past us.
        if self.pending.insert(id.clone(), call).is_some() {
            return Err(RpcError::Internal {
                reason: format!("correlation id collision on {}", id),
            });
        }

        // Removes the entry on every exit path: timeout, cancellation, or a
        // write failure. A no-op when the reader already resolved the call.
        let pending = self.pending.clone();
        let guard_id = id.clone();
        let _cleanup = scopeguard::guard((), move |_| {
            pending.remove(&guard_id);
        });

        // The reader may have observed EOF between the closed check and the
        // insert; re-check so this call fails now instead of waiting out its
        // full timeout.
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let line = Request::new(id.clone(), method, params).to_line()?;
        debug!(%id, %method, "sending request");
        self.transport.write_line(&line).await?;

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving: the pending map was torn down.
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                debug!(%id, %method, "call timed out");
                Err(RpcError::CallTimeout {
                    method: method.to_string(),
                    id,
                    elapsed_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Stop the reader loop and fail anything still pending. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.fail_pending();
    }

    async fn reader_loop(
        transport: Arc<dyn Transport>,
        pending: Arc<DashMap<String, PendingCall>>,
        closed: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = transport.read_line(None) => line,
            };
            match line {
                Ok(Some(line)) => Self::route_line(&pending, &line),
                Ok(None) => {
                    debug!("tool server closed its output stream");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "transport read failed");
                    break;
                }
            }
        }

        closed.store(true, Ordering::SeqCst);
        let stderr_tail = transport.stderr_tail();
        for entry in pending.iter().map(|e| e.key().clone()).collect::<Vec<_>>() {
            if let Some((id, call)) = pending.remove(&entry) {
                debug!(%id, method = %call.method, "failing pending call: transport closed");
                let _ = call.tx.send(Err(RpcError::TransportClosed {
                    stderr_tail: stderr_tail.clone(),
                }));
            }
        }
    }

    /// Route one inbound line. Malformed lines and unmatched ids are logged
    /// and dropped; line noise from an imperfect child is never fatal.
    fn route_line(pending: &DashMap<String, PendingCall>, line: &str) {
        let Some(Response { id, outcome }) = parse_response(line) else {
            debug!(line = %truncate(line, 200), "discarding malformed line from child");
            return;
        };

        // First remove wins; a duplicate or post-timeout response finds no
        // entry and is dropped here.
        let Some((_, call)) = pending.remove(&id) else {
            debug!(%id, "discarding unmatched response");
            return;
        };

        let elapsed_ms = call.sent_at.elapsed().as_millis() as u64;
        debug!(%id, method = %call.method, elapsed_ms, "resolving call");
        let result = outcome.map_err(|payload| RpcError::Remote {
            tool: call.method,
            message: payload.message,
            code: payload.code,
        });
        // The receiver may already be gone (caller cancelled); that is fine.
        let _ = call.tx.send(result);
    }

    fn fail_pending(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let stderr_tail = self.transport.stderr_tail();
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.tx.send(Err(RpcError::TransportClosed {
                    stderr_tail: stderr_tail.clone(),
                }));
            }
        }
    }

    fn closed_error(&self) -> RpcError {
        RpcError::TransportClosed {
            stderr_tail: self.transport.stderr_tail(),
        }
    }
}

impl Drop for RequestDispatcher {
    fn drop(&mut self) {
        // Stops the reader task even when close() was never called.
        self.shutdown.cancel();
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

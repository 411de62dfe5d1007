//! Caller-driven transport for tests and demos

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use super::{Transport, TransportError, TransportRequest, TransportResponse};

/// A request waiting for the script to answer it
#[derive(Debug)]
pub struct PendingCall {
    pub request: TransportRequest,
    pub received_at: Instant,
    responder: oneshot::Sender<Result<TransportResponse, TransportError>>,
}

impl PendingCall {
    /// Settle the call with the given result
    pub fn respond(self, result: Result<TransportResponse, TransportError>) {
        debug!(identity = %self.request.identity, ok = result.is_ok(), "PendingCall::respond: called");
        // The transport future may already be gone; nothing to do then
        let _ = self.responder.send(result);
    }

    pub fn succeed(self, response: TransportResponse) {
        self.respond(Ok(response));
    }

    pub fn fail(self, error: TransportError) {
        self.respond(Err(error));
    }
}

/// Transport whose calls are answered by whoever holds the receiver
///
/// Every `execute` is forwarded as a [`PendingCall`]; it stays in flight
/// until the call is answered. Dropping a `PendingCall` unanswered settles it
/// with [`TransportError::Dropped`].
pub struct ScriptedTransport {
    calls_tx: mpsc::UnboundedSender<PendingCall>,
    call_count: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingCall>) {
        debug!("ScriptedTransport::new: called");
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        (
            Self {
                calls_tx,
                call_count: AtomicUsize::new(0),
            },
            calls_rx,
        )
    }

    /// Number of requests that reached the transport
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        debug!(%idx, identity = %request.identity, "ScriptedTransport::execute: called");

        let (responder, response_rx) = oneshot::channel();
        let call = PendingCall {
            request,
            received_at: Instant::now(),
            responder,
        };
        if self.calls_tx.send(call).is_err() {
            debug!("ScriptedTransport::execute: script receiver gone");
            return Err(TransportError::Dropped);
        }

        response_rx.await.unwrap_or(Err(TransportError::Dropped))
    }
}

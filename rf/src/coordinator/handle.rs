//! CoordinatorHandle - Client interface to the coordinator task

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use super::error::CoordinatorError;
use super::locks::LockState;
use super::messages::{CoordRequest, CoordinatorMetrics, CoordinatorSnapshot, DispatchMode, Dispatched, Settlement};
use crate::transport::{RequestOverrides, TransportHandle};

/// Handle for dispatching requests through the Coordinator
///
/// Cloneable and cheap; every clone talks to the same coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordRequest>,
}

/// Returned for every accepted dispatch
#[derive(Debug)]
pub struct DispatchReceipt {
    request_id: Uuid,
    handle: TransportHandle,
    settlement: PendingSettlement,
}

#[derive(Debug)]
enum PendingSettlement {
    Waiting(oneshot::Receiver<Settlement>),
    Ready(Settlement),
}

impl DispatchReceipt {
    fn new(dispatched: Dispatched) -> Self {
        Self {
            request_id: dispatched.request_id,
            handle: dispatched.handle,
            settlement: PendingSettlement::Waiting(dispatched.settled_rx),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn handle(&self) -> &TransportHandle {
        &self.handle
    }

    /// Detach the response; see [`TransportHandle::abort`]
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// True once the outcome is already known
    pub fn is_settled(&self) -> bool {
        matches!(self.settlement, PendingSettlement::Ready(_))
    }

    /// Wait for the request to settle
    ///
    /// Resolves to `Discarded` if the coordinator stopped before settling.
    pub async fn settled(self) -> Settlement {
        match self.settlement {
            PendingSettlement::Ready(settlement) => settlement,
            PendingSettlement::Waiting(rx) => rx.await.unwrap_or(Settlement::Discarded),
        }
    }

    async fn wait(self) -> Self {
        let request_id = self.request_id;
        let handle = self.handle.clone();
        let settlement = self.settled().await;
        Self {
            request_id,
            handle,
            settlement: PendingSettlement::Ready(settlement),
        }
    }
}

fn validate_identity(identity: &str) -> Result<String, CoordinatorError> {
    if identity.is_empty() {
        return Err(CoordinatorError::EmptyIdentity);
    }
    Ok(identity.to_string())
}

fn validate_payload(payload: Value) -> Result<Map<String, Value>, CoordinatorError> {
    match payload {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::Bool(_) => Err(CoordinatorError::InvalidPayload("boolean")),
        Value::Number(_) => Err(CoordinatorError::InvalidPayload("number")),
        Value::String(_) => Err(CoordinatorError::InvalidPayload("string")),
        Value::Array(_) => Err(CoordinatorError::InvalidPayload("array")),
    }
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::Sender<CoordRequest>) -> Self {
        debug!("CoordinatorHandle::new: called");
        Self { tx }
    }

    async fn send(&self, request: CoordRequest) -> Result<(), CoordinatorError> {
        self.tx.send(request).await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Send a request that ignores the identity's lock
    pub async fn dispatch(&self, identity: &str, payload: Value) -> Result<DispatchReceipt, CoordinatorError> {
        debug!(%identity, "CoordinatorHandle::dispatch: called");
        // Plain dispatches are never suppressed, so a missing receipt means the reply was lost
        self.dispatch_with(identity, payload, DispatchMode::Plain, RequestOverrides::default())
            .await?
            .ok_or(CoordinatorError::NoReply)
    }

    /// Send a request unless one for the same identity is still outstanding
    ///
    /// Returns `Ok(None)` when suppressed. Suppression is silent.
    pub async fn dispatch_locked(
        &self,
        identity: &str,
        payload: Value,
    ) -> Result<Option<DispatchReceipt>, CoordinatorError> {
        debug!(%identity, "CoordinatorHandle::dispatch_locked: called");
        self.dispatch_with(identity, payload, DispatchMode::Locked, RequestOverrides::default())
            .await
    }

    /// Send a request and discard whatever comes back
    pub async fn dispatch_detached(&self, identity: &str, payload: Value) -> Result<TransportHandle, CoordinatorError> {
        debug!(%identity, "CoordinatorHandle::dispatch_detached: called");
        let receipt = self
            .dispatch_with(identity, payload, DispatchMode::Detached, RequestOverrides::default())
            .await?
            .ok_or(CoordinatorError::NoReply)?;
        Ok(receipt.handle)
    }

    /// Dispatch with an explicit mode and per-request overrides
    pub async fn dispatch_with(
        &self,
        identity: &str,
        payload: Value,
        mode: DispatchMode,
        overrides: RequestOverrides,
    ) -> Result<Option<DispatchReceipt>, CoordinatorError> {
        debug!(%identity, ?mode, "CoordinatorHandle::dispatch_with: called");
        let identity = validate_identity(identity)?;
        let payload = validate_payload(payload)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(CoordRequest::Dispatch {
            identity,
            payload,
            mode,
            overrides,
            reply_tx: Some(reply_tx),
        })
        .await?;

        let Some(dispatched) = reply_rx.await.map_err(|_| CoordinatorError::NoReply)? else {
            debug!("CoordinatorHandle::dispatch_with: suppressed");
            return Ok(None);
        };

        let synchronous = dispatched.synchronous && mode != DispatchMode::Detached;
        let receipt = DispatchReceipt::new(dispatched);
        if synchronous {
            debug!(request_id = %receipt.request_id, "CoordinatorHandle::dispatch_with: waiting for settlement");
            return Ok(Some(receipt.wait().await));
        }
        Ok(Some(receipt))
    }

    /// Fire a locked dispatch every configured poll interval
    pub async fn dispatch_periodic(&self, identity: &str, payload: Value) -> Result<(), CoordinatorError> {
        self.dispatch_periodic_with(identity, payload, None, RequestOverrides::default())
            .await
    }

    /// Fire a locked dispatch every `interval`
    pub async fn dispatch_periodic_every(
        &self,
        identity: &str,
        payload: Value,
        interval: Duration,
    ) -> Result<(), CoordinatorError> {
        self.dispatch_periodic_with(identity, payload, Some(interval), RequestOverrides::default())
            .await
    }

    /// Start (or replace) the periodic series for an identity
    ///
    /// The first fire happens one interval from now. Each fire is a locked
    /// dispatch, so fires overlapping an outstanding request are skipped.
    pub async fn dispatch_periodic_with(
        &self,
        identity: &str,
        payload: Value,
        interval: Option<Duration>,
        overrides: RequestOverrides,
    ) -> Result<(), CoordinatorError> {
        debug!(%identity, ?interval, "CoordinatorHandle::dispatch_periodic_with: called");
        let identity = validate_identity(identity)?;
        let payload = validate_payload(payload)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        self.send(CoordRequest::StartPeriodic {
            identity,
            payload,
            overrides,
            interval,
            reply_tx,
        })
        .await?;

        reply_rx.await.map_err(|_| CoordinatorError::NoReply)?
    }

    /// Stop the periodic series of one identity; false if none was running
    pub async fn cancel_periodic(&self, identity: &str) -> Result<bool, CoordinatorError> {
        debug!(%identity, "CoordinatorHandle::cancel_periodic: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::CancelPeriodic {
            identity: identity.to_string(),
            reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    /// Stop every periodic series; returns how many were running
    pub async fn cancel_all_periodic(&self) -> Result<usize, CoordinatorError> {
        debug!("CoordinatorHandle::cancel_all_periodic: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::CancelAllPeriodic { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    pub async fn lock_state(&self, identity: &str) -> Result<LockState, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::GetLockState {
            identity: identity.to_string(),
            reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::GetSnapshot { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    pub async fn metrics(&self) -> Result<CoordinatorMetrics, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(CoordRequest::GetMetrics { reply_tx }).await?;
        reply_rx.await.map_err(|_| CoordinatorError::NoReply)
    }

    /// Stop the coordinator and all periodic series
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        debug!("CoordinatorHandle::shutdown: called");
        self.send(CoordRequest::Shutdown).await
    }
}

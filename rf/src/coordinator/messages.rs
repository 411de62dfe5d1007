//! Message types for the Coordinator

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::error::CoordinatorError;
use super::locks::LockState;
use crate::transport::{RequestOverrides, TransportError, TransportHandle, TransportResponse};

/// How a single dispatch treats the identity's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Always sends; ignores the lock
    Plain,
    /// Silently skipped while the identity is locked
    Locked,
    /// Sends, then discards the response immediately
    Detached,
}

/// Final outcome of one accepted dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Settlement {
    Succeeded { status: u16 },
    Failed { error: String },
    /// The handle was aborted; the response was not routed anywhere
    Discarded,
}

/// Reply to an accepted dispatch
#[derive(Debug)]
pub(crate) struct Dispatched {
    pub request_id: Uuid,
    pub handle: TransportHandle,
    pub synchronous: bool,
    pub settled_rx: oneshot::Receiver<Settlement>,
}

/// Internal requests to the Coordinator task
#[derive(Debug)]
pub(crate) enum CoordRequest {
    /// Dispatch a request; `reply_tx` gets `None` when suppressed by the lock
    Dispatch {
        identity: String,
        payload: Map<String, Value>,
        mode: DispatchMode,
        overrides: RequestOverrides,
        reply_tx: Option<oneshot::Sender<Option<Dispatched>>>,
    },

    /// A transport call finished (internal)
    Settle {
        request_id: Uuid,
        result: Result<TransportResponse, TransportError>,
    },

    /// Start a periodic series for an identity
    StartPeriodic {
        identity: String,
        payload: Map<String, Value>,
        overrides: RequestOverrides,
        interval: Option<Duration>,
        reply_tx: oneshot::Sender<Result<(), CoordinatorError>>,
    },

    /// Stop the periodic series of one identity
    CancelPeriodic {
        identity: String,
        reply_tx: oneshot::Sender<bool>,
    },

    /// Stop every periodic series
    CancelAllPeriodic { reply_tx: oneshot::Sender<usize> },

    /// Read the lock flag of an identity
    GetLockState {
        identity: String,
        reply_tx: oneshot::Sender<LockState>,
    },

    /// Get a copy of the coordinator tables
    GetSnapshot {
        reply_tx: oneshot::Sender<CoordinatorSnapshot>,
    },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Shutdown the coordinator
    Shutdown,
}

/// Point-in-time copy of the coordinator tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub locks: BTreeMap<String, LockState>,
    /// Request id of the most recent dispatch per identity
    pub handles: BTreeMap<String, Uuid>,
    /// Identities with a running periodic series
    pub timers: Vec<String>,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    pub dispatched: u64,
    pub suppressed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub discarded: u64,
    pub in_flight: usize,
    /// Identities currently holding a lock
    pub locked: usize,
    pub active_timers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_serialization() {
        let json = serde_json::to_string(&Settlement::Succeeded { status: 200 }).unwrap();
        assert!(json.contains(r#""outcome":"succeeded""#));

        let back: Settlement = serde_json::from_str(r#"{"outcome":"discarded"}"#).unwrap();
        assert_eq!(back, Settlement::Discarded);
    }

    #[test]
    fn test_dispatch_mode_serialization() {
        assert_eq!(serde_json::to_string(&DispatchMode::Detached).unwrap(), r#""detached""#);
    }
}

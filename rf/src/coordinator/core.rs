//! Main Coordinator task implementation

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::CoordinatorConfig;
use super::error::CoordinatorError;
use super::failure::{DefaultFailureHandler, ErrorHook, FailureHandler};
use super::handle::CoordinatorHandle;
use super::handlers::{HandlerRegistry, Handlers};
use super::locks::LockTable;
use super::messages::{CoordRequest, CoordinatorMetrics, CoordinatorSnapshot, DispatchMode, Dispatched, Settlement};
use crate::csrf::{DEFAULT_CSRF_HEADER, MemoryTokenStore, TokenStore};
use crate::notify::{LogNotifier, Notifier};
use crate::transport::{
    RequestOverrides, Transport, TransportConfig, TransportError, TransportHandle, TransportRequest, TransportResponse,
};

/// In-flight request tracking
struct PendingRequest {
    identity: String,
    locked: bool,
    handle: TransportHandle,
    settled_tx: oneshot::Sender<Settlement>,
}

/// One running periodic series
struct TimerHandle {
    task: JoinHandle<()>,
    interval: Duration,
}

impl TimerHandle {
    fn cancel(self) {
        self.task.abort();
    }
}

type InitCallback = Box<dyn FnOnce(&CoordinatorHandle) + Send>;

/// Assembles a [`Coordinator`] from its collaborators
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    transport_config: TransportConfig,
    transport: Arc<dyn Transport>,
    token_store: Arc<dyn TokenStore>,
    csrf_header: String,
    notifier: Arc<dyn Notifier>,
    handlers: HandlerRegistry,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    on_error: Option<ErrorHook>,
    on_init: Option<InitCallback>,
}

impl CoordinatorBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            config: CoordinatorConfig::default(),
            transport_config: TransportConfig::default(),
            transport,
            token_store: Arc::new(MemoryTokenStore::new()),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            notifier: Arc::new(LogNotifier),
            handlers: HandlerRegistry::new(),
            failure_handler: None,
            on_error: None,
            on_init: None,
        }
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults applied to every dispatch
    pub fn transport_config(mut self, transport_config: TransportConfig) -> Self {
        self.transport_config = transport_config;
        self
    }

    pub fn token_store(mut self, token_store: Arc<dyn TokenStore>) -> Self {
        self.token_store = token_store;
        self
    }

    /// Header the CSRF token is sent in and read back from
    pub fn csrf_header(mut self, name: impl Into<String>) -> Self {
        self.csrf_header = name.into();
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Register hooks for a single identity
    pub fn register(mut self, identity: impl Into<String>, handlers: Handlers) -> Self {
        self.handlers.register(identity, handlers);
        self
    }

    /// Replace the default failure path entirely
    ///
    /// The notifier, modal surface and error hook are not used when set.
    pub fn failure_handler(mut self, failure_handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(failure_handler);
        self
    }

    /// Extra handling run by the default failure path after notifying
    ///
    /// Runs on the coordinator task; a panic in it is caught and logged.
    pub fn on_error(mut self, hook: impl Fn(&str, &TransportError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Called once with a handle when the coordinator is built
    pub fn on_init(mut self, init: impl FnOnce(&CoordinatorHandle) + Send + 'static) -> Self {
        self.on_init = Some(Box::new(init));
        self
    }

    pub fn build(self) -> Coordinator {
        debug!(
            url = %self.transport_config.url,
            method = %self.transport_config.method,
            handlers = self.handlers.len(),
            "CoordinatorBuilder::build: called"
        );
        let failure_handler = self.failure_handler.unwrap_or_else(|| {
            Arc::new(
                DefaultFailureHandler::new(self.notifier)
                    .with_modal(self.config.id_modal_error.clone())
                    .with_error_hook(self.on_error),
            )
        });

        let (tx, rx) = mpsc::channel(self.config.channel_buffer.max(1));
        let coordinator = Coordinator {
            config: self.config,
            transport_config: self.transport_config,
            transport: self.transport,
            token_store: self.token_store,
            csrf_header: self.csrf_header,
            handlers: self.handlers,
            failure_handler,
            tx,
            rx,
            locks: LockTable::new(),
            handles: HashMap::new(),
            pending: HashMap::new(),
            timers: HashMap::new(),
            metrics: CoordinatorMetrics::default(),
        };

        if let Some(init) = self.on_init {
            debug!("CoordinatorBuilder::build: running init callback");
            init(&coordinator.handle());
        }

        coordinator
    }
}

/// Coordinates identity-keyed request flows against one endpoint
///
/// Owns the lock table, the handle table and the periodic timers. All of them
/// are only touched from the task running [`Coordinator::run`]; callers talk
/// to it through [`CoordinatorHandle`].
pub struct Coordinator {
    config: CoordinatorConfig,
    transport_config: TransportConfig,
    transport: Arc<dyn Transport>,
    token_store: Arc<dyn TokenStore>,
    csrf_header: String,
    handlers: HandlerRegistry,
    failure_handler: Arc<dyn FailureHandler>,
    tx: mpsc::Sender<CoordRequest>,
    rx: mpsc::Receiver<CoordRequest>,
    locks: LockTable,
    /// Most recent handle per identity
    handles: HashMap<String, TransportHandle>,
    pending: HashMap<Uuid, PendingRequest>,
    timers: HashMap<String, TimerHandle>,
    metrics: CoordinatorMetrics,
}

impl Coordinator {
    /// Start building a coordinator around a transport
    pub fn builder(transport: Arc<dyn Transport>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(transport)
    }

    /// Create a coordinator with default collaborators
    pub fn new(transport: Arc<dyn Transport>, transport_config: TransportConfig) -> Self {
        Self::builder(transport).transport_config(transport_config).build()
    }

    /// Create a handle for dispatching requests
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.tx.clone())
    }

    /// Spawn the coordinator task and return a handle to it
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run the Coordinator task
    ///
    /// This consumes the Coordinator and runs until shutdown is requested.
    pub async fn run(mut self) {
        info!(url = %self.transport_config.url, "Coordinator started");

        while let Some(req) = self.rx.recv().await {
            match req {
                CoordRequest::Dispatch {
                    identity,
                    payload,
                    mode,
                    overrides,
                    reply_tx,
                } => {
                    let dispatched = self.dispatch(identity, payload, mode, &overrides);
                    if let Some(reply_tx) = reply_tx {
                        let _ = reply_tx.send(dispatched);
                    }
                }

                CoordRequest::Settle { request_id, result } => {
                    self.settle(request_id, result);
                }

                CoordRequest::StartPeriodic {
                    identity,
                    payload,
                    overrides,
                    interval,
                    reply_tx,
                } => {
                    let result = self.start_periodic(identity, payload, overrides, interval);
                    let _ = reply_tx.send(result);
                }

                CoordRequest::CancelPeriodic { identity, reply_tx } => {
                    let cancelled = match self.timers.remove(&identity) {
                        Some(timer) => {
                            info!(%identity, "Cancelling periodic dispatch");
                            timer.cancel();
                            true
                        }
                        None => {
                            debug!(%identity, "No periodic dispatch to cancel");
                            false
                        }
                    };
                    let _ = reply_tx.send(cancelled);
                }

                CoordRequest::CancelAllPeriodic { reply_tx } => {
                    let count = self.cancel_all_timers();
                    let _ = reply_tx.send(count);
                }

                CoordRequest::GetLockState { identity, reply_tx } => {
                    let _ = reply_tx.send(self.locks.state(&identity));
                }

                CoordRequest::GetSnapshot { reply_tx } => {
                    let _ = reply_tx.send(self.snapshot());
                }

                CoordRequest::GetMetrics { reply_tx } => {
                    let mut metrics = self.metrics.clone();
                    metrics.in_flight = self.pending.len();
                    metrics.locked = self.locks.locked_count();
                    metrics.active_timers = self.timers.len();
                    let _ = reply_tx.send(metrics);
                }

                CoordRequest::Shutdown => {
                    info!("Coordinator shutting down");
                    break;
                }
            }
        }

        self.cancel_all_timers();
        info!("Coordinator stopped");
    }

    fn dispatch(
        &mut self,
        identity: String,
        payload: Map<String, Value>,
        mode: DispatchMode,
        overrides: &RequestOverrides,
    ) -> Option<Dispatched> {
        debug!(%identity, ?mode, "Coordinator::dispatch: called");

        if mode == DispatchMode::Locked && self.locks.is_locked(&identity) {
            debug!(%identity, "Coordinator::dispatch: identity locked, suppressing");
            self.metrics.suppressed += 1;
            return None;
        }

        let settings = self.transport_config.apply(overrides);
        let mut request = TransportRequest::new(identity.as_str(), &settings, payload);

        if settings.method.is_state_changing() {
            match self.token_store.read() {
                Some(token) => request.set_header(self.csrf_header.as_str(), token),
                None => debug!(%identity, "Coordinator::dispatch: no CSRF token available"),
            }
        }

        let locked = mode == DispatchMode::Locked;
        if locked {
            self.locks.try_acquire(&identity);
        }

        self.handlers.run_send(&identity, &mut request);

        let request_id = Uuid::now_v7();
        let handle = TransportHandle::new(request_id, &identity);
        let (settled_tx, settled_rx) = oneshot::channel();

        self.pending.insert(
            request_id,
            PendingRequest {
                identity: identity.clone(),
                locked,
                handle: handle.clone(),
                settled_tx,
            },
        );
        self.handles.insert(identity, handle.clone());
        self.metrics.dispatched += 1;

        let transport = Arc::clone(&self.transport);
        let settle_tx = self.tx.clone();
        tokio::spawn(async move {
            // The inner task isolates a panicking transport so the request still settles
            let result = match tokio::spawn(async move { transport.execute(request).await }).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(%request_id, error = %e, "transport task: call did not complete");
                    Err(TransportError::TaskFailed(e.to_string()))
                }
            };
            if settle_tx.send(CoordRequest::Settle { request_id, result }).await.is_err() {
                debug!(%request_id, "transport task: coordinator gone before settlement");
            }
        });

        if mode == DispatchMode::Detached {
            debug!(%request_id, "Coordinator::dispatch: detaching response");
            handle.abort();
        }

        Some(Dispatched {
            request_id,
            handle,
            synchronous: settings.synchronous,
            settled_rx,
        })
    }

    fn settle(&mut self, request_id: Uuid, result: Result<TransportResponse, TransportError>) {
        let Some(pending) = self.pending.remove(&request_id) else {
            warn!(%request_id, "Settlement for unknown request");
            return;
        };
        let identity = pending.identity.as_str();
        debug!(%identity, %request_id, ok = result.is_ok(), "Coordinator::settle: called");

        if pending.locked {
            self.locks.release(identity);
        }

        let settlement = if pending.handle.is_aborted() {
            debug!(%identity, %request_id, "Coordinator::settle: handle aborted, discarding response");
            self.metrics.discarded += 1;
            Settlement::Discarded
        } else {
            match result {
                Ok(response) => {
                    if let Some(token) = response.header(&self.csrf_header) {
                        debug!(%identity, "Coordinator::settle: rotating CSRF token");
                        self.token_store.write(token);
                    }
                    self.metrics.succeeded += 1;
                    self.handlers.run_success(identity, &response);
                    Settlement::Succeeded {
                        status: response.status,
                    }
                }
                Err(error) => {
                    self.metrics.failed += 1;
                    let failure_handler = &self.failure_handler;
                    if panic::catch_unwind(AssertUnwindSafe(|| failure_handler.handle(identity, &error))).is_err() {
                        warn!(%identity, "Coordinator::settle: failure handler panicked");
                    }
                    Settlement::Failed {
                        error: error.to_string(),
                    }
                }
            }
        };

        // Nobody may be waiting on the receipt
        let _ = pending.settled_tx.send(settlement);
    }

    fn start_periodic(
        &mut self,
        identity: String,
        payload: Map<String, Value>,
        overrides: RequestOverrides,
        interval: Option<Duration>,
    ) -> Result<(), CoordinatorError> {
        let interval = interval.unwrap_or_else(|| self.config.poll_interval());
        if interval.is_zero() {
            return Err(CoordinatorError::ZeroInterval);
        }

        if let Some(previous) = self.timers.remove(&identity) {
            info!(%identity, previous_interval = ?previous.interval, "Replacing periodic dispatch");
            previous.cancel();
        }

        info!(%identity, ?interval, "Starting periodic dispatch");
        let tx = self.tx.clone();
        let task_identity = identity.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(identity = %task_identity, "periodic: firing");
                let fire = CoordRequest::Dispatch {
                    identity: task_identity.clone(),
                    payload: payload.clone(),
                    mode: DispatchMode::Locked,
                    overrides: overrides.clone(),
                    reply_tx: None,
                };
                if tx.send(fire).await.is_err() {
                    debug!(identity = %task_identity, "periodic: coordinator gone, stopping");
                    break;
                }
            }
        });

        self.timers.insert(identity, TimerHandle { task, interval });
        Ok(())
    }

    fn cancel_all_timers(&mut self) -> usize {
        let count = self.timers.len();
        if count > 0 {
            info!(count, "Cancelling all periodic dispatches");
        }
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        count
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        let mut timers: Vec<String> = self.timers.keys().cloned().collect();
        timers.sort();
        CoordinatorSnapshot {
            locks: self.locks.snapshot(),
            handles: self
                .handles
                .iter()
                .map(|(identity, handle)| (identity.clone(), handle.request_id()))
                .collect(),
            timers,
        }
    }
}

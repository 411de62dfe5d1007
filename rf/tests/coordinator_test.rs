//! Coordinator behavior through the public API

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use reqflow::coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, DispatchMode, Handlers, LockState, Settlement,
};
use reqflow::csrf::{MemoryTokenStore, TokenStore};
use reqflow::notify::{GENERIC_ERROR_MESSAGE, Notifier};
use reqflow::transport::{
    HttpMethod, PendingCall, RequestOverrides, ScriptedTransport, TransportConfig, TransportError, TransportResponse,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

#[derive(Default)]
struct RecordingNotifier {
    blocking: Mutex<Vec<String>>,
    modal: Mutex<Vec<(String, String)>>,
}

impl Notifier for RecordingNotifier {
    fn show_blocking_error(&self, message: &str) {
        self.blocking.lock().unwrap().push(message.to_string());
    }

    fn show_in_modal(&self, surface_id: &str, details: &str) {
        self.modal
            .lock()
            .unwrap()
            .push((surface_id.to_string(), details.to_string()));
    }
}

struct Harness {
    handle: CoordinatorHandle,
    calls: UnboundedReceiver<PendingCall>,
    transport: Arc<ScriptedTransport>,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(
    method: HttpMethod,
    config: CoordinatorConfig,
    token_store: Arc<dyn TokenStore>,
    handlers: Vec<(&str, Handlers)>,
) -> Harness {
    let (transport, calls) = ScriptedTransport::new();
    let transport = Arc::new(transport);
    let notifier = Arc::new(RecordingNotifier::default());

    let mut builder = Coordinator::builder(transport.clone())
        .config(config)
        .transport_config(TransportConfig::new("http://localhost/ajax").with_method(method))
        .token_store(token_store)
        .notifier(notifier.clone());
    for (identity, h) in handlers {
        builder = builder.register(identity, h);
    }
    let (handle, _task) = builder.build().spawn();

    Harness {
        handle,
        calls,
        transport,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(
        HttpMethod::Post,
        CoordinatorConfig::default(),
        Arc::new(MemoryTokenStore::new()),
        Vec::new(),
    )
}

fn counter() -> (Arc<Mutex<u32>>, impl Fn(&TransportResponse) + Send + Sync + 'static) {
    let count = Arc::new(Mutex::new(0));
    let count_clone = Arc::clone(&count);
    (count, move |_: &TransportResponse| *count_clone.lock().unwrap() += 1)
}

#[tokio::test]
async fn test_locked_dispatch_suppressed_while_outstanding() {
    let mut h = harness();

    let first = h.handle.dispatch_locked("save", json!({"n": 1})).await.unwrap().unwrap();
    assert_eq!(h.handle.lock_state("save").await.unwrap(), LockState::Locked);

    assert!(h.handle.dispatch_locked("save", json!({"n": 2})).await.unwrap().is_none());
    assert!(h.handle.dispatch_locked("save", json!({"n": 3})).await.unwrap().is_none());

    let call = h.calls.recv().await.unwrap();
    assert_eq!(call.request.payload["n"], 1);
    call.succeed(TransportResponse::ok_text("saved"));
    assert_eq!(first.settled().await, Settlement::Succeeded { status: 200 });

    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.handle.lock_state("save").await.unwrap(), LockState::Unlocked);
    assert!(h.notifier.blocking.lock().unwrap().is_empty());

    let again = h.handle.dispatch_locked("save", json!({"n": 4})).await.unwrap();
    assert!(again.is_some());
}

#[tokio::test]
async fn test_concurrent_locked_dispatches_send_once() {
    let h = harness();

    let attempts = (0..10).map(|_| {
        let handle = h.handle.clone();
        async move { handle.dispatch_locked("save", json!({})).await.unwrap() }
    });
    let results = join_all(attempts).await;

    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    let metrics = h.handle.metrics().await.unwrap();
    assert_eq!(metrics.dispatched, 1);
    assert_eq!(metrics.suppressed, 9);
}

#[tokio::test]
async fn test_unused_identity_reports_unset() {
    let h = harness();
    assert_eq!(h.handle.lock_state("never").await.unwrap(), LockState::Unset);
}

#[tokio::test]
async fn test_csrf_token_rotates_before_success_hook() {
    let store = Arc::new(MemoryTokenStore::with_token("t1"));
    let seen_in_hook = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen_in_hook);
    let hook_store = store.clone();

    let mut h = harness_with(
        HttpMethod::Post,
        CoordinatorConfig::default(),
        store.clone(),
        vec![(
            "save",
            Handlers::new().on_success(move |_| {
                *seen_clone.lock().unwrap() = hook_store.read();
            }),
        )],
    );

    let receipt = h.handle.dispatch("save", json!({"v": 1})).await.unwrap();
    let call = h.calls.recv().await.unwrap();
    assert_eq!(call.request.header("X-CSRF-Token"), Some("t1"));
    call.succeed(TransportResponse::ok_text("").with_header("X-CSRF-Token", "t2"));
    receipt.settled().await;

    assert_eq!(seen_in_hook.lock().unwrap().as_deref(), Some("t2"));
    assert_eq!(store.read().as_deref(), Some("t2"));

    h.handle.dispatch("save", json!({"v": 2})).await.unwrap();
    let call = h.calls.recv().await.unwrap();
    assert_eq!(call.request.header("X-CSRF-Token"), Some("t2"));
}

#[tokio::test]
async fn test_response_without_token_keeps_current_token() {
    let store = Arc::new(MemoryTokenStore::with_token("t1"));
    let mut h = harness_with(HttpMethod::Post, CoordinatorConfig::default(), store.clone(), Vec::new());

    let receipt = h.handle.dispatch("save", json!({})).await.unwrap();
    h.calls.recv().await.unwrap().succeed(TransportResponse::ok_text(""));
    receipt.settled().await;

    assert_eq!(store.read().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_identities_are_independent() {
    let (saves, on_save) = counter();
    let (loads, on_load) = counter();
    let mut h = harness_with(
        HttpMethod::Post,
        CoordinatorConfig::default(),
        Arc::new(MemoryTokenStore::new()),
        vec![
            ("save", Handlers::new().on_success(on_save)),
            ("load", Handlers::new().on_success(on_load)),
        ],
    );

    let save = h.handle.dispatch_locked("save", json!({})).await.unwrap().unwrap();
    let load = h.handle.dispatch_locked("load", json!({})).await.unwrap().unwrap();

    let first = h.calls.recv().await.unwrap();
    let second = h.calls.recv().await.unwrap();
    let (save_call, load_call) = if first.request.identity == "save" {
        (first, second)
    } else {
        (second, first)
    };

    load_call.succeed(TransportResponse::ok_text("loaded"));
    load.settled().await;
    assert_eq!(h.handle.lock_state("load").await.unwrap(), LockState::Unlocked);
    assert_eq!(h.handle.lock_state("save").await.unwrap(), LockState::Locked);
    assert_eq!(*loads.lock().unwrap(), 1);
    assert_eq!(*saves.lock().unwrap(), 0);

    save_call.succeed(TransportResponse::ok_text("saved"));
    save.settled().await;
    assert_eq!(*saves.lock().unwrap(), 1);
    assert_eq!(*loads.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_plain_dispatch_is_never_suppressed() {
    let mut h = harness();

    h.handle.dispatch_locked("save", json!({})).await.unwrap().unwrap();
    h.handle.dispatch("save", json!({})).await.unwrap();
    h.handle.dispatch("save", json!({})).await.unwrap();

    for _ in 0..3 {
        h.calls.recv().await.unwrap();
    }
    assert_eq!(h.handle.metrics().await.unwrap().suppressed, 0);
}

#[tokio::test]
async fn test_detached_dispatch_skips_hooks() {
    let (successes, on_success) = counter();
    let mut h = harness_with(
        HttpMethod::Post,
        CoordinatorConfig::default(),
        Arc::new(MemoryTokenStore::with_token("t1")),
        vec![("ping", Handlers::new().on_success(on_success))],
    );

    let handle = h.handle.dispatch_detached("ping", json!({"beat": true})).await.unwrap();
    assert!(handle.is_aborted());
    assert_eq!(handle.identity(), "ping");

    // Still sent on the wire
    let call = h.calls.recv().await.unwrap();
    assert_eq!(call.request.header("X-CSRF-Token"), Some("t1"));
    call.fail(TransportError::Status {
        status: 500,
        body: "boom".to_string(),
    });

    let receipt = h
        .handle
        .dispatch_with("ping", json!({}), DispatchMode::Detached, RequestOverrides::default())
        .await
        .unwrap()
        .unwrap();
    h.calls.recv().await.unwrap().succeed(TransportResponse::ok_text("pong"));
    assert_eq!(receipt.settled().await, Settlement::Discarded);

    let metrics = h.handle.metrics().await.unwrap();
    assert_eq!(metrics.discarded, 2);
    assert_eq!(*successes.lock().unwrap(), 0);
    assert!(h.notifier.blocking.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_unlocks_and_alerts_once() {
    let (successes, on_success) = counter();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = Arc::clone(&errors);

    let (transport, mut calls) = ScriptedTransport::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let (handle, _task) = Coordinator::builder(Arc::new(transport))
        .transport_config(TransportConfig::new("http://localhost/ajax"))
        .notifier(notifier.clone())
        .register("save", Handlers::new().on_success(on_success))
        .on_error(move |identity, error| {
            errors_clone.lock().unwrap().push((identity.to_string(), error.status()));
        })
        .build()
        .spawn();

    let receipt = handle.dispatch_locked("save", json!({})).await.unwrap().unwrap();
    calls.recv().await.unwrap().fail(TransportError::Status {
        status: 500,
        body: "boom".to_string(),
    });

    let settlement = receipt.settled().await;
    assert!(matches!(settlement, Settlement::Failed { ref error } if error.contains("500")));
    assert_eq!(handle.lock_state("save").await.unwrap(), LockState::Unlocked);
    assert_eq!(*notifier.blocking.lock().unwrap(), vec![GENERIC_ERROR_MESSAGE.to_string()]);
    assert_eq!(*errors.lock().unwrap(), vec![("save".to_string(), Some(500))]);
    assert_eq!(*successes.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_failure_goes_to_modal_when_configured() {
    let config = CoordinatorConfig {
        id_modal_error: Some("modal-error".to_string()),
        ..Default::default()
    };
    let mut h = harness_with(HttpMethod::Post, config, Arc::new(MemoryTokenStore::new()), Vec::new());

    let receipt = h.handle.dispatch("save", json!({})).await.unwrap();
    h.calls.recv().await.unwrap().fail(TransportError::Status {
        status: 503,
        body: "down".to_string(),
    });
    receipt.settled().await;

    let modal = h.notifier.modal.lock().unwrap();
    assert_eq!(modal.len(), 1);
    assert_eq!(modal[0].0, "modal-error");
    assert!(h.notifier.blocking.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let h = harness();
    assert!(h.handle.dispatch("", json!({})).await.is_err());
    assert!(h.handle.dispatch_locked("save", json!(42)).await.is_err());
    assert_eq!(h.transport.call_count(), 0);
}

/// Answer every call after `latency`, recording when each arrived
fn answer_after(
    mut calls: UnboundedReceiver<PendingCall>,
    latency: Duration,
) -> Arc<Mutex<Vec<(String, Instant)>>> {
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let arrivals_clone = Arc::clone(&arrivals);
    tokio::spawn(async move {
        while let Some(call) = calls.recv().await {
            arrivals_clone
                .lock()
                .unwrap()
                .push((call.request.identity.clone(), call.received_at));
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                call.succeed(TransportResponse::ok_text("tick"));
            });
        }
    });
    arrivals
}

fn offsets_ms(arrivals: &[(String, Instant)], identity: &str, start: Instant) -> Vec<u128> {
    arrivals
        .iter()
        .filter(|(id, _)| id == identity)
        .map(|(_, at)| at.duration_since(start).as_millis())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_periodic_fires_at_fixed_rate() {
    let h = harness();
    let arrivals = answer_after(h.calls, Duration::from_millis(200));

    let start = Instant::now();
    h.handle.dispatch_periodic("poll", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(15_100)).await;

    let offsets = offsets_ms(&arrivals.lock().unwrap(), "poll", start);
    assert_eq!(offsets, vec![5000, 10_000, 15_000]);
    assert_eq!(h.handle.metrics().await.unwrap().suppressed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_skips_fires_while_outstanding() {
    let h = harness();
    let arrivals = answer_after(h.calls, Duration::from_millis(250));

    let start = Instant::now();
    h.handle
        .dispatch_periodic_every("poll", json!({}), Duration::from_millis(100))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;

    // 100 sends, 200 and 300 are skipped, the lock clears at 350, 400 sends
    let offsets = offsets_ms(&arrivals.lock().unwrap(), "poll", start);
    assert_eq!(offsets, vec![100, 400]);
    let metrics = h.handle.metrics().await.unwrap();
    assert_eq!(metrics.dispatched, 2);
    assert_eq!(metrics.suppressed, 2);
}

/// Each identity keeps its own series; a single shared timer would orphan the first one
#[tokio::test(start_paused = true)]
async fn test_periodic_timers_are_per_identity() {
    let h = harness();
    let arrivals = answer_after(h.calls, Duration::from_millis(10));

    let start = Instant::now();
    h.handle
        .dispatch_periodic_every("a", json!({}), Duration::from_millis(100))
        .await
        .unwrap();
    h.handle
        .dispatch_periodic_every("b", json!({}), Duration::from_millis(150))
        .await
        .unwrap();
    assert_eq!(h.handle.snapshot().await.unwrap().timers, vec!["a", "b"]);

    tokio::time::sleep(Duration::from_millis(320)).await;
    assert!(h.handle.cancel_periodic("a").await.unwrap());
    assert!(!h.handle.cancel_periodic("a").await.unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let arrivals = arrivals.lock().unwrap();
    assert_eq!(offsets_ms(&arrivals, "a", start), vec![100, 200, 300]);
    assert_eq!(offsets_ms(&arrivals, "b", start), vec![150, 300, 450, 600]);
}

/// Restarting cancels the old series for that identity instead of leaving it running unreferenced
#[tokio::test(start_paused = true)]
async fn test_restarting_series_replaces_only_that_identity() {
    let h = harness();
    let arrivals = answer_after(h.calls, Duration::from_millis(10));

    let start = Instant::now();
    h.handle
        .dispatch_periodic_every("a", json!({}), Duration::from_millis(100))
        .await
        .unwrap();
    h.handle
        .dispatch_periodic_every("b", json!({}), Duration::from_millis(100))
        .await
        .unwrap();
    h.handle
        .dispatch_periodic_every("a", json!({}), Duration::from_millis(1000))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.timers, vec!["a", "b"]);

    let arrivals = arrivals.lock().unwrap();
    assert!(offsets_ms(&arrivals, "a", start).is_empty());
    assert_eq!(offsets_ms(&arrivals, "b", start), vec![100, 200]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_all_periodic() {
    let h = harness();
    let arrivals = answer_after(h.calls, Duration::from_millis(10));

    for identity in ["a", "b", "c"] {
        h.handle
            .dispatch_periodic_every(identity, json!({}), Duration::from_millis(100))
            .await
            .unwrap();
    }
    assert_eq!(h.handle.cancel_all_periodic().await.unwrap(), 3);
    assert_eq!(h.handle.cancel_all_periodic().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(arrivals.lock().unwrap().is_empty());
    assert_eq!(h.handle.metrics().await.unwrap().active_timers, 0);
}

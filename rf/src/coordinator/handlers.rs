//! Identity-keyed send/success hooks

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::transport::{TransportRequest, TransportResponse};

/// Runs right before transmission and may mutate the outgoing request
pub type SendHook = Arc<dyn Fn(&mut TransportRequest) + Send + Sync>;

/// Runs after a successful response
pub type SuccessHook = Arc<dyn Fn(&TransportResponse) + Send + Sync>;

/// Hooks registered for one identity; either may be absent
///
/// Hooks run on the coordinator task. A panicking hook is caught and logged;
/// the request carries on as if the hook had returned.
#[derive(Clone, Default)]
pub struct Handlers {
    on_send: Option<SendHook>,
    on_success: Option<SuccessHook>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_send(mut self, hook: impl Fn(&mut TransportRequest) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(hook));
        self
    }

    pub fn on_success(mut self, hook: impl Fn(&TransportResponse) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_send", &self.on_send.is_some())
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

/// Identity -> hooks, populated at setup time
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handlers>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hooks for an identity, replacing any earlier registration
    pub fn register(&mut self, identity: impl Into<String>, handlers: Handlers) -> &mut Self {
        let identity = identity.into();
        debug!(%identity, ?handlers, "HandlerRegistry::register: called");
        self.handlers.insert(identity, handlers);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn run_send(&self, identity: &str, request: &mut TransportRequest) {
        if let Some(hook) = self.handlers.get(identity).and_then(|h| h.on_send.as_ref()) {
            debug!(%identity, "HandlerRegistry::run_send: invoking send hook");
            if panic::catch_unwind(AssertUnwindSafe(|| hook(request))).is_err() {
                warn!(%identity, "HandlerRegistry::run_send: send hook panicked");
            }
        }
    }

    pub(crate) fn run_success(&self, identity: &str, response: &TransportResponse) {
        if let Some(hook) = self.handlers.get(identity).and_then(|h| h.on_success.as_ref()) {
            debug!(%identity, "HandlerRegistry::run_success: invoking success hook");
            if panic::catch_unwind(AssertUnwindSafe(|| hook(response))).is_err() {
                warn!(%identity, "HandlerRegistry::run_success: success hook panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;
    use serde_json::Map;
    use std::sync::Mutex;

    fn request(identity: &str) -> TransportRequest {
        TransportRequest::new(identity, &TransportConfig::new("http://localhost/ajax"), Map::new())
    }

    #[test]
    fn test_send_hook_mutates_request() {
        let mut registry = HandlerRegistry::new();
        registry.register("save", Handlers::new().on_send(|req| req.set_header("X-Trace", "1")));

        let mut req = request("save");
        registry.run_send("save", &mut req);
        assert_eq!(req.header("X-Trace"), Some("1"));
    }

    #[test]
    fn test_hooks_are_scoped_to_identity() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let mut registry = HandlerRegistry::new();
        registry.register(
            "save",
            Handlers::new().on_success(move |resp| {
                seen_clone.lock().unwrap().push(resp.status);
            }),
        );

        registry.run_success("load", &TransportResponse::ok_text("x"));
        assert!(seen.lock().unwrap().is_empty());

        registry.run_success("save", &TransportResponse::ok_text("x"));
        assert_eq!(*seen.lock().unwrap(), vec![200]);
    }

    #[test]
    fn test_panicking_hooks_are_contained() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "save",
            Handlers::new()
                .on_send(|req| {
                    req.set_header("X-Before", "1");
                    panic!("send hook failed");
                })
                .on_success(|_| panic!("success hook failed")),
        );

        let mut req = request("save");
        registry.run_send("save", &mut req);
        registry.run_success("save", &TransportResponse::ok_text(""));
        assert_eq!(req.header("X-Before"), Some("1"));
    }

    #[test]
    fn test_missing_hooks_are_not_an_error() {
        let registry = HandlerRegistry::new();
        let mut req = request("anything");
        registry.run_send("anything", &mut req);
        registry.run_success("anything", &TransportResponse::ok_text(""));
        assert!(req.headers.is_empty());
        assert!(registry.is_empty());
    }
}

//! Transport layer for the request coordinator
//!
//! A [`Transport`] performs exactly one request and settles with a response or
//! an error. The coordinator wraps every call in a spawned task and hands the
//! caller a [`TransportHandle`] that can detach the response channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

mod config;
mod error;
mod http;
mod scripted;

pub use config::{HttpMethod, RequestOverrides, ResponseFormat, TransportConfig};
pub use error::TransportError;
pub use http::HttpTransport;
pub use scripted::{PendingCall, ScriptedTransport};

/// Performs a single request against the endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and wait for the server to answer
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// A fully resolved outgoing request
///
/// Send hooks receive this mutably right before transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub identity: String,
    pub url: String,
    pub method: HttpMethod,
    pub response_format: ResponseFormat,
    pub cache: bool,
    pub headers: Vec<(String, String)>,
    pub payload: Map<String, Value>,
}

impl TransportRequest {
    pub fn new(identity: impl Into<String>, settings: &TransportConfig, payload: Map<String, Value>) -> Self {
        Self {
            identity: identity.into(),
            url: settings.url.clone(),
            method: settings.method,
            response_format: settings.response_format,
            cache: settings.cache,
            headers: Vec::new(),
            payload,
        }
    }

    /// Set a header, replacing any existing value with the same name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Look up a header by name, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Flatten the payload into key/value pairs for a query string or form body
    ///
    /// Strings are sent as-is, other scalars by their JSON text, null as an
    /// empty value, and arrays/objects as compact JSON.
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        self.payload
            .iter()
            .map(|(key, value)| {
                let encoded = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), encoded)
            })
            .collect()
    }
}

/// Response body, decoded according to the requested format
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Json(_) => None,
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => write!(f, "{}", value),
            ResponseBody::Text(text) => f.write_str(text),
        }
    }
}

/// A successful response
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Header names are stored lowercased
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// 200 response with a text body
    pub fn ok_text(body: impl Into<String>) -> Self {
        Self::new(200, ResponseBody::Text(body.into()))
    }

    /// 200 response with a JSON body
    pub fn ok_json(body: Value) -> Self {
        Self::new(200, ResponseBody::Json(body))
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header by name, ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Handle to one dispatched request
///
/// Cloneable; every clone refers to the same request. Aborting detaches the
/// local response channel: the request still runs to completion on the wire,
/// but its outcome is discarded and no hook or failure handler runs for it.
#[derive(Clone)]
pub struct TransportHandle {
    request_id: Uuid,
    identity: Arc<str>,
    aborted: Arc<AtomicBool>,
}

impl TransportHandle {
    pub(crate) fn new(request_id: Uuid, identity: &str) -> Self {
        Self {
            request_id,
            identity: Arc::from(identity),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Discard this request's response
    pub fn abort(&self) {
        debug!(request_id = %self.request_id, identity = %self.identity, "TransportHandle::abort: called");
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("request_id", &self.request_id)
            .field("identity", &self.identity)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with(payload: Value) -> TransportRequest {
        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        TransportRequest::new("save", &TransportConfig::new("http://localhost/ajax"), map)
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request = request_with(json!({}));
        request.set_header("X-CSRF-Token", "first");
        request.set_header("x-csrf-token", "second");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("X-Csrf-Token"), Some("second"));
    }

    #[test]
    fn test_form_pairs_encoding() {
        let request = request_with(json!({
            "name": "widget",
            "count": 3,
            "active": true,
            "note": null,
            "tags": ["a", "b"],
        }));

        let pairs: HashMap<_, _> = request.form_pairs().into_iter().collect();
        assert_eq!(pairs["name"], "widget");
        assert_eq!(pairs["count"], "3");
        assert_eq!(pairs["active"], "true");
        assert_eq!(pairs["note"], "");
        assert_eq!(pairs["tags"], r#"["a","b"]"#);
    }

    #[test]
    fn test_response_header_lookup() {
        let response = TransportResponse::ok_text("done").with_header("X-CSRF-Token", "abc123");
        assert_eq!(response.header("x-csrf-token"), Some("abc123"));
        assert_eq!(response.header("X-CSRF-TOKEN"), Some("abc123"));
        assert_eq!(response.header("missing"), None);
    }

    #[test]
    fn test_handle_abort_is_shared_between_clones() {
        let handle = TransportHandle::new(Uuid::now_v7(), "ping");
        let clone = handle.clone();
        assert!(!clone.is_aborted());

        handle.abort();
        assert!(clone.is_aborted());
        assert_eq!(clone.identity(), "ping");
    }

    #[test]
    fn test_response_body_accessors() {
        let body = ResponseBody::Json(json!({"ok": true}));
        assert_eq!(body.as_json(), Some(&json!({"ok": true})));
        assert!(body.as_text().is_none());
        assert_eq!(ResponseBody::Text("hi".to_string()).to_string(), "hi");
    }
}

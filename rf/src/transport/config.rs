//! Transport defaults and per-call overrides

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// HTTP method used to send a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Whether requests with this method carry the CSRF token
    pub fn is_state_changing(self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!(
                "Unknown HTTP method: '{}'. Supported: GET, POST, PUT, PATCH, DELETE",
                other
            )),
        }
    }
}

/// Expected format of the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Html,
    Json,
    Xml,
    Script,
    Text,
}

impl ResponseFormat {
    /// Value sent in the `Accept` header
    pub fn accept_header(self) -> &'static str {
        match self {
            ResponseFormat::Html => "text/html, */*; q=0.01",
            ResponseFormat::Json => "application/json, text/javascript, */*; q=0.01",
            ResponseFormat::Xml => "application/xml, text/xml, */*; q=0.01",
            ResponseFormat::Script => {
                "text/javascript, application/javascript, application/ecmascript, application/x-ecmascript, */*; q=0.01"
            }
            ResponseFormat::Text => "text/plain, */*; q=0.01",
        }
    }
}

/// Default settings applied to every dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Endpoint URL every request is sent to
    pub url: String,

    /// HTTP method
    pub method: HttpMethod,

    /// Expected response body format
    #[serde(rename = "response-format")]
    pub response_format: ResponseFormat,

    /// Allow cached responses; when false GET requests carry a cache-busting parameter
    pub cache: bool,

    /// Dispatch waits for settlement before returning
    pub synchronous: bool,

    /// HTTP client timeout in milliseconds (none by default)
    #[serde(rename = "timeout-ms", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: HttpMethod::Get,
            response_format: ResponseFormat::Html,
            cache: false,
            synchronous: false,
            timeout_ms: None,
        }
    }
}

impl TransportConfig {
    /// Create a config pointing at the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = response_format;
        self
    }

    /// Get the client timeout as a Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Merge per-call overrides over these defaults
    pub fn apply(&self, overrides: &RequestOverrides) -> TransportConfig {
        debug!(?overrides, "TransportConfig::apply: called");
        TransportConfig {
            url: overrides.url.clone().unwrap_or_else(|| self.url.clone()),
            method: overrides.method.unwrap_or(self.method),
            response_format: overrides.response_format.unwrap_or(self.response_format),
            cache: overrides.cache.unwrap_or(self.cache),
            synchronous: overrides.synchronous.unwrap_or(self.synchronous),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Per-call replacements for [`TransportConfig`] fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub response_format: Option<ResponseFormat>,
    pub cache: Option<bool>,
    pub synchronous: Option<bool>,
}

impl RequestOverrides {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn response_format(mut self, response_format: ResponseFormat) -> Self {
        self.response_format = Some(response_format);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = Some(synchronous);
        self
    }
}

//! HTTP transport backed by reqwest

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

use super::{
    HttpMethod, ResponseBody, ResponseFormat, Transport, TransportConfig, TransportError, TransportRequest,
    TransportResponse,
};

/// Query parameter appended to uncached GET requests
const CACHE_BUST_PARAM: &str = "_";

/// Sends requests over HTTP
///
/// GET payloads travel as query parameters; every other method sends a
/// form-encoded body. Non-2xx statuses settle as [`TransportError::Status`].
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Create a transport with no client timeout
    pub fn new() -> Result<Self, TransportError> {
        Self::from_config(&TransportConfig::default())
    }

    /// Create a transport using the client settings from config
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        debug!(timeout_ms = ?config.timeout_ms, "HttpTransport::from_config: called");
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            debug!(?timeout, "HttpTransport::from_config: applying timeout");
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http })
    }

    fn reqwest_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Build the wire request for a resolved transport request
    fn build_request(&self, request: &TransportRequest) -> Result<reqwest::Request, TransportError> {
        debug!(identity = %request.identity, method = %request.method, url = %request.url, "build_request: called");
        if request.url.is_empty() {
            return Err(TransportError::InvalidRequest("no endpoint URL configured".to_string()));
        }

        let mut builder = self
            .http
            .request(Self::reqwest_method(request.method), request.url.as_str())
            .header(ACCEPT, request.response_format.accept_header())
            .header("X-Requested-With", "XMLHttpRequest");

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut pairs = request.form_pairs();
        if request.method == HttpMethod::Get {
            if !request.cache {
                debug!("build_request: cache disabled, adding cache-bust parameter");
                pairs.push((CACHE_BUST_PARAM.to_string(), Utc::now().timestamp_millis().to_string()));
            }
            if !pairs.is_empty() {
                builder = builder.query(&pairs);
            }
        } else {
            builder = builder.form(&pairs);
        }

        Ok(builder.build()?)
    }

    fn decode_body(format: ResponseFormat, text: String) -> Result<ResponseBody, TransportError> {
        match format {
            ResponseFormat::Json if text.trim().is_empty() => Ok(ResponseBody::Json(Value::Null)),
            ResponseFormat::Json => Ok(ResponseBody::Json(serde_json::from_str(&text)?)),
            _ => Ok(ResponseBody::Text(text)),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        debug!(identity = %request.identity, "HttpTransport::execute: called");
        let http_request = self.build_request(&request)?;
        let response = self.http.execute(http_request).await?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(status = %status.as_u16(), "HttpTransport::execute: error status");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body = Self::decode_body(request.response_format, text)?;
        debug!(status = %status.as_u16(), "HttpTransport::execute: success");
        Ok(TransportResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

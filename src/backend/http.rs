//! Shared HTTP plumbing for the two read paths

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::types::{BackendError, BackendResult};

/// Configuration for an HTTP read backend
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the marketplace read API (e.g. "https://market.example")
    pub base_url: String,
    /// Timeout for each request (default: 10 seconds)
    pub request_timeout: Duration,
    /// Optional bearer token sent with every request
    pub api_token: Option<String>,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(10),
            api_token: None,
        }
    }
}

impl HttpBackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// JSON-over-HTTP GET client
#[derive(Debug, Clone)]
pub struct JsonClient {
    http: reqwest::Client,
    base_url: String,
}

impl JsonClient {
    pub fn new(config: &HttpBackendConfig) -> BackendResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(ref token) = config.api_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| BackendError::InvalidInput(format!("invalid API token: {}", e)))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("labdesk/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with query parameters and decode the JSON body
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> BackendResult<Value> {
        self.get_with_headers(path, query, &[]).await
    }

    /// GET with extra per-request headers
    pub async fn get_with_headers(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: &[(&'static str, String)],
    ) -> BackendResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Read API returned error status");
            return Err(BackendError::Status {
                code: status.as_u16(),
                url: path.to_string(),
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

//! HTTP transport backed by `reqwest`
//!
//! Each payload is one POST; the parsed body is returned as-is, so the
//! request manager sees the full envelope (or the array for a batch).
//! HTTP carries no server push, so this provider uses the EIP-1193
//! convention and never supports subscriptions.

use crate::provider::{Eip1193Provider, ProviderCapabilities};
use async_trait::async_trait;
use nodewire_core::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for [`HttpProvider`]
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub request_timeout: Duration,
    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            headers: Vec::new(),
        }
    }
}

impl HttpProviderConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// JSON-RPC over HTTP POST
pub struct HttpProvider {
    url: String,
    http: reqwest::Client,
    headers: Vec<(String, String)>,
}

impl HttpProvider {
    pub fn new(url: impl Into<String>, config: HttpProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            http,
            headers: config.headers,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Eip1193Provider for HttpProvider {
    async fn request(&self, payload: Value) -> Result<Option<Value>> {
        let mut builder = self.http.post(&self.url).json(&payload);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(url = %self.url, status, "HTTP request rejected");
            return Err(Error::Http(format!("HTTP {}: {}", status, body)));
        }

        let body = resp
            .json::<Value>()
            .await
            .map_err(|e| Error::invalid_response(format!("body is not JSON: {}", e)))?;

        Ok(Some(body))
    }
}

impl ProviderCapabilities for HttpProvider {
    fn as_eip1193(self: Arc<Self>) -> Option<Arc<dyn Eip1193Provider>> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpProviderConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_header("Authorization", "Bearer token");

        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.headers.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let provider = HttpProvider::new(
            "http://127.0.0.1:1",
            HttpProviderConfig::default().with_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let err = provider
            .request(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "net_version", "params": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}

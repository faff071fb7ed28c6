//! Base JSON-RPC 2.0 HTTP client.
//!
//! Provides `call()` for JSON-RPC methods (POST to `/json_rpc`) and `post()`
//! for the daemon's plain JSON endpoints. Supports Basic auth, configurable
//! timeout, and retry with exponential backoff on transient failures.

use crate::error::RpcError;
use base64::Engine;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC 2.0 request envelope.
#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Configuration for an RPC client.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Base URL (e.g., `http://localhost:18081`).
    pub url: String,
    /// Optional username for Basic auth.
    pub username: Option<String>,
    /// Optional password for Basic auth.
    pub password: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Number of retry attempts on transient failure.
    pub retries: u32,
    /// Initial delay between retries (doubles each attempt).
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:18081".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(210),
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Async RPC client for daemon JSON-RPC and raw JSON endpoints.
pub struct RpcClient {
    client: reqwest::Client,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl RpcClient {
    /// Create a new client with the given URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig {
            url: url.to_string(),
            ..Default::default()
        })
    }

    /// Create a new client with full configuration.
    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = config.url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| RpcError::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(0),
        })
    }

    /// Get the configured base URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn auth_header(&self) -> Option<HeaderValue> {
        match (&self.config.username, &self.config.password) {
            (Some(user), Some(pass)) => {
                let creds = format!("{}:{}", user, pass);
                let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
                HeaderValue::from_str(&format!("Basic {}", encoded)).ok()
            }
            _ => None,
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(auth) = self.auth_header() {
            headers.insert(AUTHORIZATION, auth);
        }
        headers
    }

    /// Run `op` up to `retries + 1` times, backing off between transient
    /// failures.
    async fn with_retries<F, Fut>(&self, context: &str, mut op: F) -> Result<Value, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, RpcError>>,
    {
        let attempts = self.config.retries + 1;
        let mut last_err = RpcError::NoResult {
            context: context.to_string(),
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
                debug!("retrying {} in {:?} (attempt {}/{})", context, delay, attempt + 1, attempts);
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(val) => return Ok(val),
                Err(e) => {
                    let should_retry = e.is_transient() && attempt + 1 < attempts;
                    if !should_retry {
                        return Err(e);
                    }
                    warn!("{} failed transiently: {}", context, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Call a JSON-RPC 2.0 method (POST to `/json_rpc`).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let url = format!("{}/json_rpc", self.config.url);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id(),
            method,
            params,
        };

        self.with_retries(method, || self.do_call(&url, &req, method))
            .await
    }

    async fn do_call(
        &self,
        url: &str,
        req: &JsonRpcRequest<'_>,
        method: &str,
    ) -> Result<Value, RpcError> {
        let resp = self
            .client
            .post(url)
            .headers(self.build_headers())
            .json(req)
            .send()
            .await
            .map_err(|e| RpcError::Http {
                method: method.to_string(),
                url: url.to_string(),
                source: e,
            })?;

        let resp = check_http_status(resp, method, url).await?;

        let body: JsonRpcResponse = resp.json().await.map_err(|e| RpcError::Http {
            method: method.to_string(),
            url: url.to_string(),
            source: e,
        })?;

        if let Some(err) = body.error {
            if err.message == "BUSY" {
                return Err(RpcError::Busy {
                    context: method.to_string(),
                });
            }
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
                method: method.to_string(),
            });
        }

        body.result.ok_or(RpcError::NoResult {
            context: method.to_string(),
        })
    }

    /// POST JSON to a raw endpoint (not JSON-RPC).
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, RpcError> {
        let url = format!("{}{}", self.config.url, endpoint);
        self.with_retries(endpoint, || self.do_post(&url, body, endpoint))
            .await
    }

    async fn do_post(&self, url: &str, body: &Value, endpoint: &str) -> Result<Value, RpcError> {
        let resp = self
            .client
            .post(url)
            .headers(self.build_headers())
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::Http {
                method: endpoint.to_string(),
                url: url.to_string(),
                source: e,
            })?;

        let resp = check_http_status(resp, endpoint, url).await?;

        let val: Value = resp.json().await.map_err(|e| RpcError::Http {
            method: endpoint.to_string(),
            url: url.to_string(),
            source: e,
        })?;

        Ok(val)
    }
}

async fn check_http_status(
    resp: reqwest::Response,
    method: &str,
    url: &str,
) -> Result<reqwest::Response, RpcError> {
    let status = resp.status().as_u16();

    if status == 401 {
        return Err(RpcError::AuthFailed {
            url: url.to_string(),
        });
    }

    if status >= 400 {
        let body = resp.text().await.unwrap_or_default();
        return Err(RpcError::HttpStatus {
            method: method.to_string(),
            url: url.to_string(),
            status,
            body: body.chars().take(500).collect(),
        });
    }

    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RpcConfig::default();
        assert_eq!(config.url, "http://localhost:18081");
        assert_eq!(config.timeout, Duration::from_secs(210));
        assert_eq!(config.retries, 2);
    }

    #[test]
    fn test_client_url() {
        let client = RpcClient::new("http://example.com:18081/").unwrap();
        assert_eq!(client.url(), "http://example.com:18081");
    }

    #[test]
    fn test_request_ids_increment() {
        let client = RpcClient::new("http://localhost:18081").unwrap();
        let id1 = client.next_id();
        let id2 = client.next_id();
        assert_eq!(id2, id1 + 1);
    }

    #[test]
    fn test_auth_header() {
        let client = RpcClient::with_config(RpcConfig {
            username: Some("user".into()),
            password: Some("pass".into()),
            ..Default::default()
        })
        .unwrap();
        let header = client.auth_header().unwrap();
        assert_eq!(header.to_str().unwrap(), "Basic dXNlcjpwYXNz");

        let anon = RpcClient::new("http://localhost:18081").unwrap();
        assert!(anon.auth_header().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_transient() {
        let client = RpcClient::with_config(RpcConfig {
            url: "http://127.0.0.1:1".into(),
            timeout: Duration::from_secs(2),
            retries: 1,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        })
        .unwrap();
        let err = client
            .post("/get_height", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err}");
    }
}

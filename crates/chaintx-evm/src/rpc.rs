//! JSON-RPC 2.0 wire types and the HTTP transport.
//!
//! Transport failures are mapped straight onto [`IngestError`]:
//! connection errors, timeouts, HTTP 429 / 5xx and overload-style JSON-RPC
//! errors are `Unavailable` (retried by the loop); an unreadable body is
//! `Decode`; any other JSON-RPC error is `Other` and is not retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chaintx_core::error::IngestError;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Returns `true` for overload-style errors a later attempt may not see
    /// (-32005, -32603, 429, and geth's generic -32000 such as `header not
    /// found` on a lagging node). Malformed requests fail the same way every
    /// time.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, -32005 | -32603 | -32000 | 429)
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value (`Value::Null` when absent) or the node's error.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Sends one JSON-RPC call and returns its `result`.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IngestError>;

    /// The endpoint URL.
    fn url(&self) -> &str;
}

/// JSON-RPC over HTTP(S) with a per-request timeout.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::ConfigInvalid(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> IngestError {
        if e.is_timeout() {
            IngestError::Unavailable(format!(
                "request to {} timed out after {}ms",
                self.url,
                self.timeout.as_millis()
            ))
        } else {
            IngestError::Unavailable(format!("HTTP error: {e}"))
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IngestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("HTTP {}: {body}", status.as_u16());
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                IngestError::Unavailable(msg)
            } else {
                IngestError::Other(msg)
            });
        }

        let body = resp.bytes().await.map_err(|e| self.map_send_error(e))?;
        let parsed: JsonRpcResponse = serde_json::from_slice(&body)
            .map_err(|e| IngestError::Decode(format!("{method}: malformed response: {e}")))?;

        parsed.into_result().map_err(|err| {
            tracing::debug!(method, code = err.code, message = %err.message, "Node returned an error");
            if err.is_retryable() {
                IngestError::Unavailable(format!("{method}: {err}"))
            } else {
                IngestError::Other(format!("{method}: {err}"))
            }
        })
    }

    fn url(&self) -> &str {
        &self.url
    }
}

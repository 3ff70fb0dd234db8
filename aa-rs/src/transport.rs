use crate::error::{AccountError, Result, RpcError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// A JSON-RPC endpoint: bundler, paymaster or alternate-chain service.
///
/// Implementations return the `result` member on success and lift an `error`
/// member into [`RpcError`] without retrying.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
}

#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    pub fn with_client(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::debug!(method, id, url = %self.url, "json-rpc request");

        let transport_err = |reason: String| AccountError::Transport {
            method: method.to_string(),
            reason,
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| transport_err(format!("POST {} failed: {e}", self.url)))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| transport_err(format!("failed to decode JSON: {e}")))?;

        // Some providers return an error object with a non-2xx status.
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(RpcError::from_response(method, err).into());
        }

        if !status.is_success() {
            return Err(transport_err(format!("HTTP {status}: {body}")));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| AccountError::malformed(method, "missing result field"))
    }
}

//! Minimal EVM JSON-RPC client over HTTP

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

pub struct EvmRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl EvmRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` and deserialize its `result`
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        debug!(method, url = %self.url, "EVM RPC call");

        let response: JsonRpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{} request failed", method))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", method))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = response.error {
            bail!("{} failed ({}): {}", method, error.code, error.message);
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).with_context(|| format!("Unexpected {} result shape", method))
    }
}

/// Parse a `0x`-prefixed quantity
pub fn parse_hex_u128(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("Not a hex quantity: {}", value))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity: {}", value))
}

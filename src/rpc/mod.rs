//! JSON-RPC clients for chain (EVM + migrate) and platform endpoints.

pub mod migrate;
pub mod platform;

pub use platform::{PlatformClient, PlatformRpc, Validator};

use crate::constants::RPC_BATCH_SIZE;
use crate::error::Error;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// Minimal JSON-RPC 2.0 client over HTTP.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        debug!("rpc {} -> {}", method, self.url);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("{} returned HTTP {}: {}", method, status, text.trim());
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .with_context(|| format!("invalid JSON-RPC response for {}", method))?;
        if let Some(err) = parsed.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            }
            .into());
        }
        let result = parsed
            .result
            .with_context(|| format!("{} returned no result", method))?;
        serde_json::from_value(result)
            .with_context(|| format!("unexpected result shape for {}", method))
    }
}

/// EVM chain calls plus the `migrate_*` block transfer extension.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64>;
    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<Value>>;
    /// Returns how many blocks the node accepted.
    async fn import_blocks(&self, blocks: &[Value]) -> Result<u64>;
    async fn get_block(&self, number: u64) -> Result<Value>;
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn block_number(&self) -> Result<u64> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex)
    }

    async fn get_blocks(&self, start: u64, end: u64) -> Result<Vec<Value>> {
        self.call("migrate_getBlocks", json!([start, end, RPC_BATCH_SIZE]))
            .await
    }

    async fn import_blocks(&self, blocks: &[Value]) -> Result<u64> {
        let result: Value = self.call("migrate_importBlocks", json!([blocks])).await?;
        imported_count(&result)
            .with_context(|| format!("unexpected migrate_importBlocks result: {}", result))
    }

    async fn get_block(&self, number: u64) -> Result<Value> {
        self.call("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await
    }
}

fn imported_count(result: &Value) -> Option<u64> {
    match result {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map.get("imported").and_then(Value::as_u64),
        _ => None,
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .with_context(|| format!("expected 0x-prefixed quantity, got {:?}", s))?;
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {:?}", s))
}

/// Block height from `number` or `header.number`, given as hex or integer.
pub fn block_number_of(block: &Value) -> Option<u64> {
    let field = block
        .get("number")
        .or_else(|| block.get("header").and_then(|h| h.get("number")))?;
    match field {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_hex_u64(s).ok().or_else(|| s.parse().ok()),
        _ => None,
    }
}

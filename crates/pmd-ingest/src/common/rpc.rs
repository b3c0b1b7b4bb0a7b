//! Minimal Ethereum JSON-RPC client
//!
//! Only the three calls the chain resources need: `eth_blockNumber`,
//! `eth_getLogs` and `eth_getBlockByNumber`. Every call goes through the
//! retry policy; node errors are classified so an oversized log query can
//! be split by the caller instead of retried as is.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::http::{check_status, read_json};
use crate::error::SourceError;
use crate::framework::retry::RetryPolicy;

/// JSON-RPC "limit exceeded" error code
pub const RPC_LIMIT_EXCEEDED: i64 = -32005;
/// JSON-RPC "invalid params" error code
pub const RPC_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC "method not found" error code
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// Phrases nodes use when a log query covers too much
const TOO_LARGE_HINTS: &[&str] = &[
    "too many",
    "response size exceeded",
    "limit exceeded",
    "query returned more than",
    "block range is too large",
    "range too large",
];

/// A raw log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    pub log_index: String,
    /// Set when the log was dropped by a reorg
    #[serde(default)]
    pub removed: bool,
}

impl RpcLog {
    pub fn block(&self) -> Result<u64, SourceError> {
        parse_quantity(&self.block_number)
    }

    pub fn index(&self) -> Result<u64, SourceError> {
        parse_quantity(&self.log_index)
    }
}

/// Address and topic0 filter for `eth_getLogs`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contracts; empty matches any contract
    pub addresses: Vec<String>,
    /// Accepted event signatures (topic0 alternatives)
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

/// JSON-RPC client bound to one endpoint
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
            retry,
            cancel: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Cut retry backoffs short when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One call, no retries
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        let body = read_json(response).await?;

        let envelope: RpcResponse = serde_json::from_value(body)
            .map_err(|e| SourceError::Malformed(format!("{} response envelope: {}", method, e)))?;
        if let Some(err) = envelope.error {
            return Err(classify_rpc_error(err.code, &err.message));
        }
        let result = envelope.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| SourceError::Malformed(format!("{} result: {}", method, e)))
    }

    /// Current chain head height
    pub async fn block_number(&self) -> Result<u64, SourceError> {
        let head: String = self
            .retry
            .run("eth_blockNumber", &self.cancel, || self.call("eth_blockNumber", json!([])))
            .await?;
        parse_quantity(&head)
    }

    /// Logs in the inclusive height range `[from, to]`
    ///
    /// A node refusing the range as too large surfaces as
    /// [`SourceError::ResponseTooLarge`] covering `[from, to + 1)`; it is
    /// not retried here.
    pub async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RpcLog>, SourceError> {
        let mut criteria = json!({
            "fromBlock": format!("{:#x}", from),
            "toBlock": format!("{:#x}", to),
            "topics": [filter.topics],
        });
        if !filter.addresses.is_empty() {
            criteria["address"] = json!(filter.addresses);
        }
        let params = json!([criteria]);

        let op = format!("eth_getLogs [{}, {}]", from, to);
        let logs: Vec<RpcLog> = self
            .retry
            .run(&op, &self.cancel, || self.call("eth_getLogs", params.clone()))
            .await
            .map_err(|e| match e {
                SourceError::ResponseTooLarge { message, .. } => SourceError::ResponseTooLarge {
                    from,
                    to: to + 1,
                    message,
                },
                other => other,
            })?;
        debug!(from, to, logs = logs.len(), "Fetched logs");
        Ok(logs)
    }

    /// Timestamp of block `number` in milliseconds since epoch
    pub async fn block_timestamp(&self, number: u64) -> Result<i64, SourceError> {
        let op = format!("eth_getBlockByNumber {}", number);
        let params = json!([format!("{:#x}", number), false]);
        let header: Option<BlockHeader> = self
            .retry
            .run(&op, &self.cancel, || self.call("eth_getBlockByNumber", params.clone()))
            .await?;

        let header = header.ok_or_else(|| {
            SourceError::Transient(format!("block {} not available from node", number))
        })?;
        let secs = parse_quantity(&header.timestamp)?;
        i64::try_from(secs)
            .ok()
            .and_then(|s| s.checked_mul(1000))
            .ok_or_else(|| SourceError::Malformed(format!("block {} timestamp out of range", number)))
    }
}

/// Map a JSON-RPC error object onto the error taxonomy
///
/// Oversized log queries come back with a placeholder range; callers that
/// know the range fill it in.
pub fn classify_rpc_error(code: i64, message: &str) -> SourceError {
    let lower = message.to_lowercase();
    // "rate limit exceeded" also matches the size hints
    if lower.contains("rate limit") {
        return SourceError::RateLimited { retry_after: None };
    }
    if code == RPC_LIMIT_EXCEEDED || TOO_LARGE_HINTS.iter().any(|hint| lower.contains(hint)) {
        return SourceError::ResponseTooLarge {
            from: 0,
            to: 0,
            message: message.to_string(),
        };
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return SourceError::Timeout(message.to_string());
    }
    match code {
        RPC_INVALID_PARAMS | RPC_METHOD_NOT_FOUND => SourceError::Rejected {
            status: 400,
            message: format!("RPC {}: {}", code, message),
        },
        _ => SourceError::Transient(format!("RPC {}: {}", code, message)),
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u64, SourceError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| SourceError::Malformed(format!("'{}' is not a hex quantity", value)))?;
    if digits.is_empty() {
        return Err(SourceError::Malformed(format!("'{}' is not a hex quantity", value)));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| SourceError::Malformed(format!("'{}' is not a hex quantity: {}", value, e)))
}

//! Ingestion configuration
//!
//! Every operational constant lives here with a documented default.
//! `IngestConfig::from_env()` reads `PMD_*` variables (after loading a
//! `.env` file if present) and falls back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use crate::framework::retry::RetryPolicy;

// ============================================================================
// Pipeline Defaults
// ============================================================================

/// Default data root for shards and checkpoints.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default maximum number of records per shard.
pub const DEFAULT_SHARD_SIZE: usize = 10_000;

/// Default number of fetch units in flight per resource.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default orchestrator-level requeues per fetch unit.
pub const DEFAULT_MAX_UNIT_REQUEUES: u32 = 3;

/// Default sleep between head polls in follow mode.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

/// Default User-Agent header for upstream requests.
pub const DEFAULT_USER_AGENT: &str = concat!("pmd-ingest/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Source Defaults
// ============================================================================

/// Default Kalshi REST API base URL.
pub const DEFAULT_KALSHI_BASE_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// Default Kalshi page size (the API maximum).
pub const DEFAULT_KALSHI_PAGE_LIMIT: u32 = 1000;

/// Default Polymarket gamma API base URL.
pub const DEFAULT_POLYMARKET_BASE_URL: &str = "https://gamma-api.polymarket.com";

/// Default Polymarket gamma page size.
pub const DEFAULT_POLYMARKET_PAGE_LIMIT: u32 = 500;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default Polygon JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://polygon-rpc.com";

/// Default block window per `eth_getLogs` call.
pub const DEFAULT_BLOCK_WINDOW: u64 = 1_000;

/// Default number of blocks withheld behind the chain head.
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 10;

/// Default height stride for the block timestamp resource.
pub const DEFAULT_BLOCK_STRIDE: u64 = 1;

/// Polymarket CTF exchange deployment block.
pub const DEFAULT_CTF_START_BLOCK: u64 = 33_605_403;

/// First block with Polymarket FPMM activity.
pub const DEFAULT_LEGACY_START_BLOCK: u64 = 4_023_686;

/// Polymarket CTF exchange contract.
pub const DEFAULT_CTF_EXCHANGE: &str = "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e";

/// Polymarket neg-risk CTF exchange contract.
pub const DEFAULT_NEG_RISK_CTF_EXCHANGE: &str = "0xc5d563a36ae78145c45a50134d48a1215220f80a";

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root directory; shards go to `{data_dir}/{resource}/`
    pub data_dir: PathBuf,
    /// Maximum records per shard
    pub shard_size: usize,
    /// Fetch units in flight per resource
    pub concurrency: usize,
    /// Requeues per fetch unit before the run fails
    pub max_unit_requeues: u32,
    /// Keep block resources running at the chain head until stopped
    pub follow: bool,
    pub poll_interval_ms: u64,
    /// Re-fetch the last page of a drained API resource instead of stopping
    pub refresh_exhausted: bool,
    pub user_agent: String,
    pub retry: RetryPolicy,
    pub kalshi: KalshiConfig,
    pub polymarket: PolymarketApiConfig,
    pub chain: ChainConfig,
}

/// Kalshi REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalshiConfig {
    pub base_url: String,
    pub page_limit: u32,
    pub timeout_secs: u64,
}

/// Polymarket gamma API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymarketApiConfig {
    pub base_url: String,
    pub page_limit: u32,
    pub timeout_secs: u64,
}

/// Polygon JSON-RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// First height scanned for CTF exchange fills
    pub ctf_start_block: u64,
    /// First height scanned for FPMM trades
    pub legacy_start_block: u64,
    /// First height sampled by the blocks resource
    pub blocks_start_block: u64,
    /// Exclusive upper bound; `None` follows the chain head
    pub end_block: Option<u64>,
    pub window_size: u64,
    pub confirmation_depth: u64,
    pub timeout_secs: u64,
    /// Sample every n-th height in the blocks resource
    pub block_stride: u64,
    pub ctf_exchange_addresses: Vec<String>,
    /// Topic0 overrides; `None` uses the canonical event signatures
    pub order_filled_topic: Option<String>,
    pub fpmm_buy_topic: Option<String>,
    pub fpmm_sell_topic: Option<String>,
}

impl Default for KalshiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_KALSHI_BASE_URL.to_string(),
            page_limit: DEFAULT_KALSHI_PAGE_LIMIT,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for PolymarketApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_POLYMARKET_BASE_URL.to_string(),
            page_limit: DEFAULT_POLYMARKET_PAGE_LIMIT,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            ctf_start_block: DEFAULT_CTF_START_BLOCK,
            legacy_start_block: DEFAULT_LEGACY_START_BLOCK,
            blocks_start_block: DEFAULT_LEGACY_START_BLOCK,
            end_block: None,
            window_size: DEFAULT_BLOCK_WINDOW,
            confirmation_depth: DEFAULT_CONFIRMATION_DEPTH,
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            block_stride: DEFAULT_BLOCK_STRIDE,
            ctf_exchange_addresses: vec![
                DEFAULT_CTF_EXCHANGE.to_string(),
                DEFAULT_NEG_RISK_CTF_EXCHANGE.to_string(),
            ],
            order_filled_topic: None,
            fpmm_buy_topic: None,
            fpmm_sell_topic: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            shard_size: DEFAULT_SHARD_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_unit_requeues: DEFAULT_MAX_UNIT_REQUEUES,
            follow: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            refresh_exhausted: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryPolicy::default(),
            kalshi: KalshiConfig::default(),
            polymarket: PolymarketApiConfig::default(),
            chain: ChainConfig::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: env_or("PMD_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
            base_delay: Duration::from_millis(env_or(
                "PMD_RETRY_BASE_DELAY_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_or(
                "PMD_RETRY_MAX_DELAY_MS",
                defaults.retry.max_delay.as_millis() as u64,
            )),
            jitter: env_or("PMD_RETRY_JITTER", defaults.retry.jitter),
        };

        let config = Self {
            data_dir: std::env::var("PMD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            shard_size: env_or("PMD_SHARD_SIZE", defaults.shard_size),
            concurrency: env_or("PMD_CONCURRENCY", defaults.concurrency),
            max_unit_requeues: env_or("PMD_MAX_UNIT_REQUEUES", defaults.max_unit_requeues),
            follow: env_or("PMD_FOLLOW", defaults.follow),
            poll_interval_ms: env_or("PMD_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            refresh_exhausted: env_or("PMD_REFRESH_EXHAUSTED", defaults.refresh_exhausted),
            user_agent: env_string("PMD_USER_AGENT", &defaults.user_agent),
            retry,
            kalshi: KalshiConfig::from_env(),
            polymarket: PolymarketApiConfig::from_env(),
            chain: ChainConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shard_size == 0 {
            anyhow::bail!("PMD_SHARD_SIZE must be greater than 0");
        }
        if self.concurrency == 0 {
            anyhow::bail!("PMD_CONCURRENCY must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("PMD_RETRY_MAX_ATTEMPTS must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            anyhow::bail!("PMD_RETRY_JITTER must be between 0 and 1");
        }
        if self.retry.base_delay > self.retry.max_delay {
            anyhow::bail!("PMD_RETRY_BASE_DELAY_MS must not exceed PMD_RETRY_MAX_DELAY_MS");
        }
        if self.kalshi.page_limit == 0 || self.polymarket.page_limit == 0 {
            anyhow::bail!("API page limits must be greater than 0");
        }
        self.chain.validate()?;
        Ok(())
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_shard_size(mut self, shard_size: usize) -> Self {
        self.shard_size = shard_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_unit_requeues(mut self, requeues: u32) -> Self {
        self.max_unit_requeues = requeues;
        self
    }

    pub fn with_follow(mut self, follow: bool, poll_interval: Duration) -> Self {
        self.follow = follow;
        self.poll_interval_ms = poll_interval.as_millis() as u64;
        self
    }

    pub fn with_refresh_exhausted(mut self, refresh: bool) -> Self {
        self.refresh_exhausted = refresh;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_kalshi(mut self, kalshi: KalshiConfig) -> Self {
        self.kalshi = kalshi;
        self
    }

    pub fn with_polymarket(mut self, polymarket: PolymarketApiConfig) -> Self {
        self.polymarket = polymarket;
        self
    }

    pub fn with_chain(mut self, chain: ChainConfig) -> Self {
        self.chain = chain;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl KalshiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_string("PMD_KALSHI_BASE_URL", &defaults.base_url),
            page_limit: env_or("PMD_KALSHI_PAGE_LIMIT", defaults.page_limit),
            timeout_secs: env_or("PMD_KALSHI_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PolymarketApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_string("PMD_POLYMARKET_BASE_URL", &defaults.base_url),
            page_limit: env_or("PMD_POLYMARKET_PAGE_LIMIT", defaults.page_limit),
            timeout_secs: env_or("PMD_POLYMARKET_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ChainConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rpc_url: env_string("PMD_RPC_URL", &defaults.rpc_url),
            ctf_start_block: env_or("PMD_CTF_START_BLOCK", defaults.ctf_start_block),
            legacy_start_block: env_or("PMD_LEGACY_START_BLOCK", defaults.legacy_start_block),
            blocks_start_block: env_or("PMD_BLOCKS_START_BLOCK", defaults.blocks_start_block),
            end_block: std::env::var("PMD_END_BLOCK")
                .ok()
                .and_then(|s| s.parse().ok()),
            window_size: env_or("PMD_BLOCK_WINDOW", defaults.window_size),
            confirmation_depth: env_or("PMD_CONFIRMATION_DEPTH", defaults.confirmation_depth),
            timeout_secs: env_or("PMD_RPC_TIMEOUT_SECS", defaults.timeout_secs),
            block_stride: env_or("PMD_BLOCK_STRIDE", defaults.block_stride),
            ctf_exchange_addresses: std::env::var("PMD_CTF_EXCHANGE_ADDRESSES")
                .map(|s| {
                    s.split(',')
                        .map(|a| a.trim().to_lowercase())
                        .filter(|a| !a.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.ctf_exchange_addresses),
            order_filled_topic: std::env::var("PMD_ORDER_FILLED_TOPIC").ok(),
            fpmm_buy_topic: std::env::var("PMD_FPMM_BUY_TOPIC").ok(),
            fpmm_sell_topic: std::env::var("PMD_FPMM_SELL_TOPIC").ok(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc_url.is_empty() {
            anyhow::bail!("PMD_RPC_URL cannot be empty");
        }
        if self.window_size == 0 {
            anyhow::bail!("PMD_BLOCK_WINDOW must be greater than 0");
        }
        if self.block_stride == 0 {
            anyhow::bail!("PMD_BLOCK_STRIDE must be greater than 0");
        }
        if let Some(end) = self.end_block {
            let start = self
                .ctf_start_block
                .min(self.legacy_start_block)
                .min(self.blocks_start_block);
            if end <= start {
                anyhow::bail!("PMD_END_BLOCK ({}) must be above the start blocks", end);
            }
        }
        Ok(())
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    /// Use one start height for every chain resource
    pub fn with_start_block(mut self, start: u64) -> Self {
        self.ctf_start_block = start;
        self.legacy_start_block = start;
        self.blocks_start_block = start;
        self
    }

    pub fn with_end_block(mut self, end: Option<u64>) -> Self {
        self.end_block = end;
        self
    }

    pub fn with_window_size(mut self, window_size: u64) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    pub fn with_block_stride(mut self, stride: u64) -> Self {
        self.block_stride = stride;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.shard_size, 10_000);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.max_unit_requeues, 3);
        assert_eq!(config.chain.confirmation_depth, 10);
        assert_eq!(config.chain.window_size, 1_000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_shard_size() {
        let config = IngestConfig::default().with_shard_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = IngestConfig::default();
        config.retry.jitter = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_end_before_start() {
        let config = IngestConfig::default().with_chain(
            ChainConfig::default()
                .with_start_block(100)
                .with_end_block(Some(50)),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = IngestConfig::default()
            .with_data_dir("/tmp/pmd")
            .with_concurrency(4)
            .with_follow(true, Duration::from_secs(5));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pmd"));
        assert_eq!(config.concurrency, 4);
        assert!(config.follow);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }
}

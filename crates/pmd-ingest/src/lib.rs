//! PMD Ingest Library
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//!
//! Resumable, append-only harvesting of prediction-market data into
//! columnar shards.
//!
//! # Resources
//!
//! - **kalshi-trades** / **kalshi-markets**: Kalshi REST API, cursor paginated
//! - **polymarket-markets**: Polymarket gamma API, offset paginated
//! - **polymarket-ctf-trades**: CTF exchange `OrderFilled` events on Polygon
//! - **polymarket-legacy-trades**: FPMM `FPMMBuy` / `FPMMSell` events on Polygon
//! - **polymarket-blocks**: block height to timestamp mapping
//!
//! Each resource writes immutable Parquet shards under
//! `{data_dir}/{resource}/` and a checkpoint under `{data_dir}/_checkpoints/`.
//! A rerun continues from the checkpoint; records already in committed
//! shards are never written twice.
//!
//! # Example
//!
//! ```no_run
//! use pmd_common::logging::{init_logging, LogConfig};
//! use pmd_ingest::{IngestConfig, IngestContext, SourceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!
//!     let ctx = IngestContext::new(IngestConfig::from_env()?)?;
//!     let registry = SourceRegistry::standard(&ctx);
//!     let report = registry.run("kalshi-trades").await?;
//!     println!("{} records appended", report.records_appended);
//!     Ok(())
//! }
//! ```

pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod framework;
pub mod kalshi;
pub mod polymarket;
pub mod records;
pub mod registry;

pub use config::{ChainConfig, IngestConfig, KalshiConfig, PolymarketApiConfig};
pub use context::IngestContext;
pub use error::{IngestError, IngestResult, SourceError};
pub use framework::{Orchestrator, Position, RunReport, RunState, SourceAdapter};
pub use records::{BlockRecord, MarketRecord, TakerSide, TradeRecord, TradeSource};
pub use registry::{IngestJob, SourceRegistry};

//! Polymarket sources
//!
//! - Gamma API `GET /markets`: offset pagination ordered by id
//! - CTF exchange `OrderFilled` logs on Polygon
//! - FPMM `FPMMBuy` / `FPMMSell` logs on Polygon
//! - Polygon block timestamps, used to place chain trades in time

pub mod abi;
pub mod events;
pub mod models;

use serde_json::Value;

use crate::common::block_range::{BlockRangeAdapter, BlockTimestampAdapter, BlockWindows};
use crate::common::paginated::{decode_items, ApiEndpoint, ApiPage, PaginatedApiAdapter};
use crate::common::rpc::RpcClient;
use crate::config::PolymarketApiConfig;
use crate::context::IngestContext;
use crate::error::SourceError;
use crate::framework::types::{FetchUnit, Schedule};
use crate::records::MarketRecord;
use events::TradeLogDecoder;
use models::GammaMarket;

/// Gamma `GET /markets`
#[derive(Debug, Clone)]
pub struct PolymarketMarkets {
    config: PolymarketApiConfig,
}

impl PolymarketMarkets {
    pub fn new(config: PolymarketApiConfig) -> Self {
        Self { config }
    }
}

impl ApiEndpoint for PolymarketMarkets {
    type Record = MarketRecord;

    fn name(&self) -> &str {
        "polymarket-markets"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Offsets
    }

    fn page_limit(&self) -> u32 {
        self.config.page_limit
    }

    fn url(&self) -> String {
        format!("{}/markets", self.config.base_url.trim_end_matches('/'))
    }

    fn query(&self, unit: &FetchUnit) -> Vec<(String, String)> {
        let (offset, limit) = match unit {
            FetchUnit::Offset { offset, limit } => (*offset, *limit),
            _ => (0, self.config.page_limit),
        };
        vec![
            ("limit".to_string(), limit.to_string()),
            ("offset".to_string(), offset.to_string()),
            ("order".to_string(), "id".to_string()),
            ("ascending".to_string(), "true".to_string()),
        ]
    }

    fn parse_page(&self, body: Value) -> Result<ApiPage<MarketRecord>, SourceError> {
        let Value::Array(items) = body else {
            return Err(SourceError::Malformed(
                "expected a JSON array of markets".to_string(),
            ));
        };
        Ok(decode_items(self.name(), items, None, GammaMarket::into_record))
    }
}

/// Gamma market listing adapter
pub fn markets_adapter(ctx: &IngestContext) -> PaginatedApiAdapter<PolymarketMarkets> {
    let config = ctx.config();
    PaginatedApiAdapter::new(
        PolymarketMarkets::new(config.polymarket.clone()),
        ctx.http().clone(),
        config.retry.clone(),
        config.polymarket.timeout(),
    )
    .with_cancel(ctx.cancel_token().clone())
}

fn rpc_client(ctx: &IngestContext) -> RpcClient {
    let config = ctx.config();
    RpcClient::new(
        ctx.http().clone(),
        config.chain.rpc_url.clone(),
        config.chain.timeout(),
        config.retry.clone(),
    )
    .with_cancel(ctx.cancel_token().clone())
}

fn windows(ctx: &IngestContext, start: u64) -> BlockWindows {
    let chain = &ctx.config().chain;
    BlockWindows {
        start,
        end: chain.end_block,
        window: chain.window_size,
        confirmation_depth: chain.confirmation_depth,
    }
}

/// CTF exchange `OrderFilled` adapter
pub fn ctf_trades_adapter(ctx: &IngestContext) -> BlockRangeAdapter<TradeLogDecoder> {
    let chain = &ctx.config().chain;
    BlockRangeAdapter::new(
        rpc_client(ctx),
        TradeLogDecoder::ctf(chain),
        windows(ctx, chain.ctf_start_block),
    )
}

/// FPMM buy/sell adapter
pub fn legacy_trades_adapter(ctx: &IngestContext) -> BlockRangeAdapter<TradeLogDecoder> {
    let chain = &ctx.config().chain;
    BlockRangeAdapter::new(
        rpc_client(ctx),
        TradeLogDecoder::legacy(chain),
        windows(ctx, chain.legacy_start_block),
    )
}

/// Block timestamp adapter
pub fn blocks_adapter(ctx: &IngestContext) -> BlockTimestampAdapter {
    let chain = &ctx.config().chain;
    BlockTimestampAdapter::new(
        rpc_client(ctx),
        windows(ctx, chain.blocks_start_block),
        chain.block_stride,
    )
}

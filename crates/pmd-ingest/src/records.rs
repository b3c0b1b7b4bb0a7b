//! Normalized record shapes written to shards
//!
//! Every source normalizes to one of these at the adapter boundary.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::framework::record::ShardRecord;

/// Origin of a trade row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSource {
    Kalshi,
    /// Polymarket CTF exchange `OrderFilled` events
    PolymarketCtf,
    /// Polymarket fixed-product market maker buys and sells
    PolymarketLegacy,
}

impl TradeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSource::Kalshi => "kalshi",
            TradeSource::PolymarketCtf => "polymarket_ctf",
            TradeSource::PolymarketLegacy => "polymarket_legacy",
        }
    }
}

impl fmt::Display for TradeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Taker-side indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakerSide {
    Yes,
    No,
    Buy,
    Sell,
}

impl TakerSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakerSide::Yes => "yes",
            TakerSide::No => "no",
            TakerSide::Buy => "buy",
            TakerSide::Sell => "sell",
        }
    }
}

/// One executed trade
///
/// Chain trades carry raw integer amounts in token base units (6 decimals
/// for USDC and outcome tokens); `price` and `size` are derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub source: TradeSource,
    /// Kalshi trade id, or `{tx_hash}:{log_index}` for chain events
    pub trade_id: String,
    /// Kalshi ticker, CTF outcome token id, or FPMM address
    pub market_id: String,
    /// Probability in `0..=1`
    pub price: f64,
    pub size: f64,
    pub taker_side: TakerSide,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<u64>,
    pub order_hash: Option<String>,
    pub maker: Option<String>,
    pub taker: Option<String>,
    /// Decimal token id; `"0"` is collateral
    pub maker_asset_id: Option<String>,
    pub taker_asset_id: Option<String>,
    pub maker_amount: Option<u64>,
    pub taker_amount: Option<u64>,
    /// FPMM outcome slot
    pub outcome_index: Option<u32>,
    pub fee: Option<u64>,
    /// Milliseconds since epoch; chain trades resolve it through the blocks resource
    pub timestamp: Option<i64>,
}

impl ShardRecord for TradeRecord {
    const KEY_COLUMN: &'static str = "trade_id";

    fn dedup_key(&self) -> String {
        self.trade_id.clone()
    }

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        let source: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
        let trade_id: Vec<&str> = records.iter().map(|r| r.trade_id.as_str()).collect();
        let market_id: Vec<&str> = records.iter().map(|r| r.market_id.as_str()).collect();
        let price: Vec<f64> = records.iter().map(|r| r.price).collect();
        let size: Vec<f64> = records.iter().map(|r| r.size).collect();
        let taker_side: Vec<&str> = records.iter().map(|r| r.taker_side.as_str()).collect();
        let block_number: Vec<Option<u64>> = records.iter().map(|r| r.block_number).collect();
        let transaction_hash: Vec<Option<String>> =
            records.iter().map(|r| r.transaction_hash.clone()).collect();
        let log_index: Vec<Option<u64>> = records.iter().map(|r| r.log_index).collect();
        let order_hash: Vec<Option<String>> =
            records.iter().map(|r| r.order_hash.clone()).collect();
        let maker: Vec<Option<String>> = records.iter().map(|r| r.maker.clone()).collect();
        let taker: Vec<Option<String>> = records.iter().map(|r| r.taker.clone()).collect();
        let maker_asset_id: Vec<Option<String>> =
            records.iter().map(|r| r.maker_asset_id.clone()).collect();
        let taker_asset_id: Vec<Option<String>> =
            records.iter().map(|r| r.taker_asset_id.clone()).collect();
        let maker_amount: Vec<Option<u64>> = records.iter().map(|r| r.maker_amount).collect();
        let taker_amount: Vec<Option<u64>> = records.iter().map(|r| r.taker_amount).collect();
        let outcome_index: Vec<Option<u32>> = records.iter().map(|r| r.outcome_index).collect();
        let fee: Vec<Option<u64>> = records.iter().map(|r| r.fee).collect();
        let timestamp: Vec<Option<i64>> = records.iter().map(|r| r.timestamp).collect();

        DataFrame::new(vec![
            Column::new("source".into(), source),
            Column::new("trade_id".into(), trade_id),
            Column::new("market_id".into(), market_id),
            Column::new("price".into(), price),
            Column::new("size".into(), size),
            Column::new("taker_side".into(), taker_side),
            Column::new("block_number".into(), block_number),
            Column::new("transaction_hash".into(), transaction_hash),
            Column::new("log_index".into(), log_index),
            Column::new("order_hash".into(), order_hash),
            Column::new("maker".into(), maker),
            Column::new("taker".into(), taker),
            Column::new("maker_asset_id".into(), maker_asset_id),
            Column::new("taker_asset_id".into(), taker_asset_id),
            Column::new("maker_amount".into(), maker_amount),
            Column::new("taker_amount".into(), taker_amount),
            Column::new("outcome_index".into(), outcome_index),
            Column::new("fee".into(), fee),
            Column::new("timestamp".into(), timestamp),
        ])
    }
}

/// Market metadata row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub source: String,
    pub market_id: String,
    pub title: String,
    pub status: String,
    pub result: Option<String>,
    pub closed: bool,
    pub volume: Option<f64>,
    pub close_time: Option<i64>,
    /// JSON array strings, as published by Polymarket
    pub outcomes: Option<String>,
    pub outcome_prices: Option<String>,
    pub clob_token_ids: Option<String>,
    pub market_maker_address: Option<String>,
    /// Remaining source-specific fields as a JSON object string
    pub metadata: String,
}

impl ShardRecord for MarketRecord {
    const KEY_COLUMN: &'static str = "market_id";

    fn dedup_key(&self) -> String {
        self.market_id.clone()
    }

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        let source: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
        let market_id: Vec<&str> = records.iter().map(|r| r.market_id.as_str()).collect();
        let title: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        let status: Vec<&str> = records.iter().map(|r| r.status.as_str()).collect();
        let result: Vec<Option<String>> = records.iter().map(|r| r.result.clone()).collect();
        let closed: Vec<bool> = records.iter().map(|r| r.closed).collect();
        let volume: Vec<Option<f64>> = records.iter().map(|r| r.volume).collect();
        let close_time: Vec<Option<i64>> = records.iter().map(|r| r.close_time).collect();
        let outcomes: Vec<Option<String>> = records.iter().map(|r| r.outcomes.clone()).collect();
        let outcome_prices: Vec<Option<String>> =
            records.iter().map(|r| r.outcome_prices.clone()).collect();
        let clob_token_ids: Vec<Option<String>> =
            records.iter().map(|r| r.clob_token_ids.clone()).collect();
        let market_maker_address: Vec<Option<String>> = records
            .iter()
            .map(|r| r.market_maker_address.clone())
            .collect();
        let metadata: Vec<&str> = records.iter().map(|r| r.metadata.as_str()).collect();

        DataFrame::new(vec![
            Column::new("source".into(), source),
            Column::new("market_id".into(), market_id),
            Column::new("title".into(), title),
            Column::new("status".into(), status),
            Column::new("result".into(), result),
            Column::new("closed".into(), closed),
            Column::new("volume".into(), volume),
            Column::new("close_time".into(), close_time),
            Column::new("outcomes".into(), outcomes),
            Column::new("outcome_prices".into(), outcome_prices),
            Column::new("clob_token_ids".into(), clob_token_ids),
            Column::new("market_maker_address".into(), market_maker_address),
            Column::new("metadata".into(), metadata),
        ])
    }
}

/// Block height to wall-clock mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub block_number: u64,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

impl ShardRecord for BlockRecord {
    const KEY_COLUMN: &'static str = "block_number";

    fn dedup_key(&self) -> String {
        self.block_number.to_string()
    }

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        let block_number: Vec<u64> = records.iter().map(|r| r.block_number).collect();
        let timestamp: Vec<i64> = records.iter().map(|r| r.timestamp).collect();

        DataFrame::new(vec![
            Column::new("block_number".into(), block_number),
            Column::new("timestamp".into(), timestamp),
        ])
    }

    fn keys_from_frame(df: &DataFrame) -> PolarsResult<Vec<String>> {
        let column = df.column(Self::KEY_COLUMN)?;
        Ok(column
            .u64()?
            .into_iter()
            .flatten()
            .map(|n| n.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(id: &str) -> TradeRecord {
        TradeRecord {
            source: TradeSource::Kalshi,
            trade_id: id.to_string(),
            market_id: "KXBTC-24".to_string(),
            price: 0.55,
            size: 10.0,
            taker_side: TakerSide::Yes,
            block_number: None,
            transaction_hash: None,
            log_index: None,
            order_hash: None,
            maker: None,
            taker: None,
            maker_asset_id: None,
            taker_asset_id: None,
            maker_amount: None,
            taker_amount: None,
            outcome_index: None,
            fee: None,
            timestamp: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn test_trade_frame_schema() {
        let df = TradeRecord::to_frame(&[trade("a"), trade("b")]).unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 19);
        assert_eq!(TradeRecord::keys_from_frame(&df).unwrap(), vec!["a", "b"]);
        assert_eq!(df.column("block_number").unwrap().null_count(), 2);
    }

    #[test]
    fn test_block_keys_read_back_as_strings() {
        let rows = [
            BlockRecord {
                block_number: 100,
                timestamp: 1,
            },
            BlockRecord {
                block_number: 110,
                timestamp: 2,
            },
        ];
        let df = BlockRecord::to_frame(&rows).unwrap();
        assert_eq!(BlockRecord::keys_from_frame(&df).unwrap(), vec!["100", "110"]);
    }

    #[test]
    fn test_market_frame_keeps_nulls() {
        let market = MarketRecord {
            source: "kalshi".into(),
            market_id: "KXBTC-24".into(),
            title: "Bitcoin above 100k?".into(),
            status: "open".into(),
            result: None,
            closed: false,
            volume: None,
            close_time: None,
            outcomes: None,
            outcome_prices: None,
            clob_token_ids: None,
            market_maker_address: None,
            metadata: "{}".into(),
        };
        let df = MarketRecord::to_frame(&[market]).unwrap();
        assert_eq!(df.width(), 13);
        assert_eq!(df.column("result").unwrap().null_count(), 1);
        assert_eq!(df.column("outcomes").unwrap().null_count(), 1);
        assert_eq!(MarketRecord::keys_from_frame(&df).unwrap(), vec!["KXBTC-24"]);
    }
}

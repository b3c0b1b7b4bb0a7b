//! Kalshi REST API response models

use chrono::{DateTime, Utc};
use pmd_common::types::Venue;
use serde::Deserialize;
use serde_json::json;

use crate::records::{MarketRecord, TakerSide, TradeRecord, TradeSource};

/// Market statuses after which no more trading happens
pub const CLOSED_STATUSES: &[&str] = &["closed", "settled", "finalized", "determined"];

/// One entry of `GET /markets/trades`
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiTrade {
    pub trade_id: String,
    pub ticker: String,
    /// Contracts traded
    pub count: f64,
    /// Yes price in cents
    #[serde(default)]
    pub yes_price: Option<f64>,
    /// Yes price in dollars, as a decimal string
    #[serde(default)]
    pub yes_price_dollars: Option<String>,
    pub taker_side: String,
    pub created_time: DateTime<Utc>,
}

impl KalshiTrade {
    fn price(&self) -> Result<f64, String> {
        let price = match (self.yes_price, &self.yes_price_dollars) {
            (Some(cents), _) => cents / 100.0,
            (None, Some(dollars)) => dollars
                .parse::<f64>()
                .map_err(|e| format!("yes_price_dollars '{}': {}", dollars, e))?,
            (None, None) => return Err("trade has no yes price".to_string()),
        };
        if !(0.0..=1.0).contains(&price) {
            return Err(format!("yes price {} outside 0..1", price));
        }
        Ok(price)
    }

    pub fn into_record(self) -> Result<TradeRecord, String> {
        let taker_side = match self.taker_side.to_lowercase().as_str() {
            "yes" => TakerSide::Yes,
            "no" => TakerSide::No,
            other => return Err(format!("unknown taker_side '{}'", other)),
        };
        let price = self.price()?;

        Ok(TradeRecord {
            source: TradeSource::Kalshi,
            trade_id: self.trade_id,
            market_id: self.ticker,
            price,
            size: self.count,
            taker_side,
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
            timestamp: Some(self.created_time.timestamp_millis()),
        })
    }
}

/// One entry of `GET /markets`
#[derive(Debug, Clone, Deserialize)]
pub struct KalshiMarket {
    pub ticker: String,
    #[serde(default)]
    pub event_ticker: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub status: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
}

impl KalshiMarket {
    pub fn into_record(self) -> MarketRecord {
        let closed = CLOSED_STATUSES.contains(&self.status.to_lowercase().as_str());
        let metadata = json!({
            "event_ticker": self.event_ticker,
            "subtitle": self.subtitle,
            "open_interest": self.open_interest,
            "last_price": self.last_price,
            "open_time": self.open_time.map(|t| t.to_rfc3339()),
        });

        MarketRecord {
            source: Venue::Kalshi.as_str().to_string(),
            market_id: self.ticker,
            title: self.title.unwrap_or_default(),
            status: self.status,
            result: self.result.filter(|r| !r.is_empty()),
            closed,
            volume: self.volume,
            close_time: self.close_time.map(|t| t.timestamp_millis()),
            outcomes: None,
            outcome_prices: None,
            clob_token_ids: None,
            market_maker_address: None,
            metadata: metadata.to_string(),
        }
    }
}

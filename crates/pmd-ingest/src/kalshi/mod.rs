//! Kalshi REST API sources
//!
//! Both listings use cursor pagination: every response carries the cursor
//! of the next page, and an empty cursor marks the last page.
//!
//! - `GET /markets/trades` -> [`TradeRecord`](crate::records::TradeRecord)
//! - `GET /markets` -> [`MarketRecord`](crate::records::MarketRecord)

pub mod models;

use serde_json::Value;

use crate::common::paginated::{decode_items, ApiEndpoint, ApiPage, PaginatedApiAdapter};
use crate::config::KalshiConfig;
use crate::context::IngestContext;
use crate::error::SourceError;
use crate::framework::types::{FetchUnit, Schedule};
use crate::records::{MarketRecord, TradeRecord};
use models::{KalshiMarket, KalshiTrade};

/// Split a `{"<key>": [...], "cursor": "..."}` envelope
fn split_envelope(body: Value, key: &str) -> Result<(Vec<Value>, Option<String>), SourceError> {
    let Value::Object(mut map) = body else {
        return Err(SourceError::Malformed(format!(
            "expected an object with '{}'",
            key
        )));
    };
    let items = match map.remove(key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(SourceError::Malformed(format!(
                "'{}' is not an array: {}",
                key, other
            )))
        }
    };
    let cursor = match map.remove("cursor") {
        Some(Value::String(cursor)) if !cursor.is_empty() => Some(cursor),
        _ => None,
    };
    Ok((items, cursor))
}

fn cursor_query(unit: &FetchUnit, limit: u32) -> Vec<(String, String)> {
    let mut query = vec![("limit".to_string(), limit.to_string())];
    if let FetchUnit::Page { cursor: Some(cursor) } = unit {
        query.push(("cursor".to_string(), cursor.clone()));
    }
    query
}

/// `GET /markets/trades`
#[derive(Debug, Clone)]
pub struct KalshiTrades {
    config: KalshiConfig,
}

impl KalshiTrades {
    pub fn new(config: KalshiConfig) -> Self {
        Self { config }
    }
}

impl ApiEndpoint for KalshiTrades {
    type Record = TradeRecord;

    fn name(&self) -> &str {
        "kalshi-trades"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Chained
    }

    fn page_limit(&self) -> u32 {
        self.config.page_limit
    }

    fn url(&self) -> String {
        format!("{}/markets/trades", self.config.base_url.trim_end_matches('/'))
    }

    fn query(&self, unit: &FetchUnit) -> Vec<(String, String)> {
        cursor_query(unit, self.config.page_limit)
    }

    fn parse_page(&self, body: Value) -> Result<ApiPage<TradeRecord>, SourceError> {
        let (items, cursor) = split_envelope(body, "trades")?;
        Ok(decode_items(self.name(), items, cursor, KalshiTrade::into_record))
    }
}

/// `GET /markets`
#[derive(Debug, Clone)]
pub struct KalshiMarkets {
    config: KalshiConfig,
}

impl KalshiMarkets {
    pub fn new(config: KalshiConfig) -> Self {
        Self { config }
    }
}

impl ApiEndpoint for KalshiMarkets {
    type Record = MarketRecord;

    fn name(&self) -> &str {
        "kalshi-markets"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Chained
    }

    fn page_limit(&self) -> u32 {
        self.config.page_limit
    }

    fn url(&self) -> String {
        format!("{}/markets", self.config.base_url.trim_end_matches('/'))
    }

    fn query(&self, unit: &FetchUnit) -> Vec<(String, String)> {
        cursor_query(unit, self.config.page_limit)
    }

    fn parse_page(&self, body: Value) -> Result<ApiPage<MarketRecord>, SourceError> {
        let (items, cursor) = split_envelope(body, "markets")?;
        Ok(decode_items(self.name(), items, cursor, |market: KalshiMarket| {
            Ok(market.into_record())
        }))
    }
}

/// Trade listing adapter wired to the context's client and retry policy
pub fn trades_adapter(ctx: &IngestContext) -> PaginatedApiAdapter<KalshiTrades> {
    let config = ctx.config();
    PaginatedApiAdapter::new(
        KalshiTrades::new(config.kalshi.clone()),
        ctx.http().clone(),
        config.retry.clone(),
        config.kalshi.timeout(),
    )
    .with_cancel(ctx.cancel_token().clone())
}

/// Market listing adapter wired to the context's client and retry policy
pub fn markets_adapter(ctx: &IngestContext) -> PaginatedApiAdapter<KalshiMarkets> {
    let config = ctx.config();
    PaginatedApiAdapter::new(
        KalshiMarkets::new(config.kalshi.clone()),
        ctx.http().clone(),
        config.retry.clone(),
        config.kalshi.timeout(),
    )
    .with_cancel(ctx.cancel_token().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trades_page_skips_bad_items() {
        let endpoint = KalshiTrades::new(KalshiConfig::default());
        let page = endpoint
            .parse_page(json!({
                "trades": [
                    {"trade_id": "a", "ticker": "T", "count": 3, "yes_price": 40,
                     "taker_side": "yes", "created_time": "2024-01-01T00:00:00Z"},
                    {"trade_id": "b", "ticker": "T"},
                    {"trade_id": "c", "ticker": "T", "count": 1, "yes_price": 55,
                     "taker_side": "no", "created_time": "2024-01-01T00:00:01Z"}
                ],
                "cursor": "next-1"
            }))
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.malformed, 1);
        assert_eq!(page.next_cursor.as_deref(), Some("next-1"));
    }

    #[test]
    fn test_empty_cursor_is_last_page() {
        let endpoint = KalshiMarkets::new(KalshiConfig::default());
        let page = endpoint
            .parse_page(json!({"markets": [], "cursor": ""}))
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_bad_envelope_is_malformed() {
        let endpoint = KalshiTrades::new(KalshiConfig::default());
        assert!(matches!(
            endpoint.parse_page(json!([1, 2, 3])),
            Err(SourceError::Malformed(_))
        ));
        assert!(matches!(
            endpoint.parse_page(json!({"trades": "nope"})),
            Err(SourceError::Malformed(_))
        ));
    }

    #[test]
    fn test_query_and_url() {
        let endpoint = KalshiTrades::new(
            KalshiConfig::default()
                .with_base_url("http://localhost:8080/")
                .with_page_limit(3),
        );
        assert_eq!(endpoint.url(), "http://localhost:8080/markets/trades");
        let query = endpoint.query(&FetchUnit::Page {
            cursor: Some("abc".into()),
        });
        assert_eq!(
            query,
            vec![
                ("limit".to_string(), "3".to_string()),
                ("cursor".to_string(), "abc".to_string())
            ]
        );
        assert_eq!(endpoint.query(&FetchUnit::Page { cursor: None }).len(), 1);
    }
}

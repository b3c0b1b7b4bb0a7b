//! Polymarket gamma API response models

use chrono::DateTime;
use pmd_common::types::Venue;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::records::MarketRecord;

/// Price above which an outcome is read as the winner of a closed market
pub const WINNER_PRICE: f64 = 0.99;
/// Price below which an outcome is read as the loser of a closed market
pub const LOSER_PRICE: f64 = 0.01;

/// Accept a JSON string or number and keep it as text
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// One entry of `GET /markets`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    /// Published as a string or a number depending on the endpoint version
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// JSON array encoded as a string, e.g. `"[\"Yes\", \"No\"]"`
    #[serde(default)]
    pub outcomes: Option<String>,
    #[serde(default)]
    pub outcome_prices: Option<String>,
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub market_maker_address: Option<String>,
}

impl GammaMarket {
    fn volume(&self) -> Option<f64> {
        match self.volume.as_ref()? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Winning outcome of a closed market, read from final prices
    pub fn resolved_outcome(&self) -> Option<String> {
        if !self.closed.unwrap_or(false) {
            return None;
        }
        let prices: Vec<String> = serde_json::from_str(self.outcome_prices.as_deref()?).ok()?;
        let prices: Vec<f64> = prices.iter().map(|p| p.parse().ok()).collect::<Option<_>>()?;
        let [first, second] = prices.as_slice() else {
            return None;
        };

        let winner = if *first > WINNER_PRICE && *second < LOSER_PRICE {
            0
        } else if *second > WINNER_PRICE && *first < LOSER_PRICE {
            1
        } else {
            return None;
        };

        let labels: Option<Vec<String>> = self
            .outcomes
            .as_deref()
            .and_then(|o| serde_json::from_str(o).ok());
        Some(
            labels
                .and_then(|labels| labels.get(winner).cloned())
                .unwrap_or_else(|| winner.to_string()),
        )
    }

    pub fn into_record(self) -> Result<MarketRecord, String> {
        if self.id.is_empty() {
            return Err("market has an empty id".to_string());
        }

        let closed = self.closed.unwrap_or(false);
        let status = if closed {
            "closed"
        } else if self.active.unwrap_or(false) {
            "active"
        } else {
            "inactive"
        };
        let close_time = self
            .end_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.timestamp_millis());
        let metadata = json!({
            "condition_id": self.condition_id,
            "slug": self.slug,
            "active": self.active,
        });

        Ok(MarketRecord {
            source: Venue::Polymarket.as_str().to_string(),
            result: self.resolved_outcome(),
            volume: self.volume(),
            title: self.question.clone().unwrap_or_default(),
            status: status.to_string(),
            closed,
            close_time,
            outcomes: self.outcomes,
            outcome_prices: self.outcome_prices,
            clob_token_ids: self.clob_token_ids,
            market_maker_address: self.market_maker_address.map(|a| a.to_lowercase()),
            metadata: metadata.to_string(),
            market_id: self.id,
        })
    }
}

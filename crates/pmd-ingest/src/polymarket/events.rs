//! Polymarket trade events on Polygon
//!
//! Two families of contracts emit trades:
//!
//! - CTF exchange `OrderFilled(bytes32 indexed orderHash, address indexed
//!   maker, address indexed taker, uint256 makerAssetId, uint256
//!   takerAssetId, uint256 makerAmountFilled, uint256 takerAmountFilled,
//!   uint256 fee)`
//! - FPMM `FPMMBuy(address indexed buyer, uint256 investmentAmount,
//!   uint256 feeAmount, uint256 indexed outcomeIndex, uint256
//!   outcomeTokensBought)` and `FPMMSell(address indexed seller, uint256
//!   returnAmount, uint256 feeAmount, uint256 indexed outcomeIndex,
//!   uint256 outcomeTokensSold)`
//!
//! Asset id `0` is collateral (USDC). Collateral and outcome tokens both
//! have 6 decimals, so price is the plain ratio of the raw amounts.

use super::abi::{topic_word, word_to_address, word_to_decimal, word_to_hex, word_to_u64, words};
use crate::common::block_range::LogDecoder;
use crate::common::rpc::{LogFilter, RpcLog};
use crate::config::ChainConfig;
use crate::records::{TakerSide, TradeRecord, TradeSource};

/// keccak256 of the `OrderFilled` signature
pub const ORDER_FILLED_TOPIC: &str =
    "0xd0a08e8c493f9c94f29311604c9de1b4e8c8d4c06bd0c789af57f2d65bfec0f6";
/// keccak256 of the `FPMMBuy` signature
pub const FPMM_BUY_TOPIC: &str =
    "0x4f62630f51608fc8a7603a9391a5101e58bd7c276139366fc107dc3b67c3dcf8";
/// keccak256 of the `FPMMSell` signature
pub const FPMM_SELL_TOPIC: &str =
    "0xadcf2a240ed9300d681d9a3f5382b6c1beed1b7e46643e0c7b42cbe6e2d766b4";

/// Collateral asset id in `OrderFilled`
pub const COLLATERAL_ASSET_ID: &str = "0";

/// Outcome token base units per whole token
pub const TOKEN_UNIT: f64 = 1_000_000.0;

/// A decoded trade event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeEvent {
    OrderFilled {
        order_hash: String,
        maker: String,
        taker: String,
        maker_asset_id: String,
        taker_asset_id: String,
        maker_amount: u64,
        taker_amount: u64,
        fee: u64,
    },
    FpmmBuy {
        fpmm: String,
        buyer: String,
        investment: u64,
        fee: u64,
        outcome_index: u32,
        tokens_bought: u64,
    },
    FpmmSell {
        fpmm: String,
        seller: String,
        returned: u64,
        fee: u64,
        outcome_index: u32,
        tokens_sold: u64,
    },
}

/// Where a log sits on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLocation {
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
}

impl LogLocation {
    pub fn of(log: &RpcLog) -> Result<Self, String> {
        Ok(Self {
            block_number: log.block().map_err(|e| e.to_string())?,
            transaction_hash: log.transaction_hash.to_lowercase(),
            log_index: log.index().map_err(|e| e.to_string())?,
        })
    }

    /// Stable trade id: `{tx_hash}:{log_index}`
    pub fn trade_id(&self) -> String {
        format!("{}:{}", self.transaction_hash, self.log_index)
    }
}

/// Topic0 values to decode against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopics {
    pub order_filled: String,
    pub fpmm_buy: String,
    pub fpmm_sell: String,
}

impl Default for EventTopics {
    fn default() -> Self {
        Self {
            order_filled: ORDER_FILLED_TOPIC.to_string(),
            fpmm_buy: FPMM_BUY_TOPIC.to_string(),
            fpmm_sell: FPMM_SELL_TOPIC.to_string(),
        }
    }
}

impl EventTopics {
    pub fn from_config(config: &ChainConfig) -> Self {
        let defaults = Self::default();
        Self {
            order_filled: config
                .order_filled_topic
                .clone()
                .unwrap_or(defaults.order_filled)
                .to_lowercase(),
            fpmm_buy: config
                .fpmm_buy_topic
                .clone()
                .unwrap_or(defaults.fpmm_buy)
                .to_lowercase(),
            fpmm_sell: config
                .fpmm_sell_topic
                .clone()
                .unwrap_or(defaults.fpmm_sell)
                .to_lowercase(),
        }
    }
}

fn amount(word: &[u8; 32], field: &str) -> Result<u64, String> {
    word_to_u64(word).ok_or_else(|| format!("{} does not fit in 64 bits", field))
}

fn topic(log: &RpcLog, index: usize) -> Result<[u8; 32], String> {
    let raw = log
        .topics
        .get(index)
        .ok_or_else(|| format!("log has {} topics, expected more than {}", log.topics.len(), index))?;
    topic_word(raw)
}

impl TradeEvent {
    /// Decode a log against the configured topics
    pub fn decode(log: &RpcLog, topics: &EventTopics) -> Result<Self, String> {
        let signature = log
            .topics
            .first()
            .map(|t| t.to_lowercase())
            .ok_or_else(|| "log has no topics".to_string())?;

        if signature == topics.order_filled {
            let data = words(&log.data, 5)?;
            Ok(TradeEvent::OrderFilled {
                order_hash: word_to_hex(&topic(log, 1)?),
                maker: word_to_address(&topic(log, 2)?),
                taker: word_to_address(&topic(log, 3)?),
                maker_asset_id: word_to_decimal(&data[0]),
                taker_asset_id: word_to_decimal(&data[1]),
                maker_amount: amount(&data[2], "makerAmountFilled")?,
                taker_amount: amount(&data[3], "takerAmountFilled")?,
                fee: amount(&data[4], "fee")?,
            })
        } else if signature == topics.fpmm_buy || signature == topics.fpmm_sell {
            let data = words(&log.data, 3)?;
            let trader = word_to_address(&topic(log, 1)?);
            let outcome_index = word_to_u64(&topic(log, 2)?)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| "outcomeIndex out of range".to_string())?;
            let fpmm = log.address.to_lowercase();

            if signature == topics.fpmm_buy {
                Ok(TradeEvent::FpmmBuy {
                    fpmm,
                    buyer: trader,
                    investment: amount(&data[0], "investmentAmount")?,
                    fee: amount(&data[1], "feeAmount")?,
                    outcome_index,
                    tokens_bought: amount(&data[2], "outcomeTokensBought")?,
                })
            } else {
                Ok(TradeEvent::FpmmSell {
                    fpmm,
                    seller: trader,
                    returned: amount(&data[0], "returnAmount")?,
                    fee: amount(&data[1], "feeAmount")?,
                    outcome_index,
                    tokens_sold: amount(&data[2], "outcomeTokensSold")?,
                })
            }
        } else {
            Err(format!("unexpected event signature {}", signature))
        }
    }

    /// Normalize into a trade row
    pub fn into_record(self, at: &LogLocation) -> Result<TradeRecord, String> {
        let mut record = TradeRecord {
            source: TradeSource::PolymarketCtf,
            trade_id: at.trade_id(),
            market_id: String::new(),
            price: 0.0,
            size: 0.0,
            taker_side: TakerSide::Buy,
            block_number: Some(at.block_number),
            transaction_hash: Some(at.transaction_hash.clone()),
            log_index: Some(at.log_index),
            order_hash: None,
            maker: None,
            taker: None,
            maker_asset_id: None,
            taker_asset_id: None,
            maker_amount: None,
            taker_amount: None,
            outcome_index: None,
            fee: None,
            timestamp: None,
        };

        match self {
            TradeEvent::OrderFilled {
                order_hash,
                maker,
                taker,
                maker_asset_id,
                taker_asset_id,
                maker_amount,
                taker_amount,
                fee,
            } => {
                // maker paying collateral means the taker sold outcome tokens
                let (token_id, collateral, tokens, side) = if maker_asset_id == COLLATERAL_ASSET_ID {
                    (taker_asset_id.clone(), maker_amount, taker_amount, TakerSide::Sell)
                } else {
                    (maker_asset_id.clone(), taker_amount, maker_amount, TakerSide::Buy)
                };
                record.market_id = token_id;
                record.price = ratio(collateral, tokens)?;
                record.size = tokens as f64 / TOKEN_UNIT;
                record.taker_side = side;
                record.order_hash = Some(order_hash);
                record.maker = Some(maker);
                record.taker = Some(taker);
                record.maker_asset_id = Some(maker_asset_id);
                record.taker_asset_id = Some(taker_asset_id);
                record.maker_amount = Some(maker_amount);
                record.taker_amount = Some(taker_amount);
                record.fee = Some(fee);
            }
            TradeEvent::FpmmBuy {
                fpmm,
                buyer,
                investment,
                fee,
                outcome_index,
                tokens_bought,
            } => {
                record.source = TradeSource::PolymarketLegacy;
                record.market_id = fpmm;
                record.price = ratio(investment, tokens_bought)?;
                record.size = tokens_bought as f64 / TOKEN_UNIT;
                record.taker_side = TakerSide::Buy;
                record.taker = Some(buyer);
                record.maker_amount = Some(investment);
                record.taker_amount = Some(tokens_bought);
                record.outcome_index = Some(outcome_index);
                record.fee = Some(fee);
            }
            TradeEvent::FpmmSell {
                fpmm,
                seller,
                returned,
                fee,
                outcome_index,
                tokens_sold,
            } => {
                record.source = TradeSource::PolymarketLegacy;
                record.market_id = fpmm;
                record.price = ratio(returned, tokens_sold)?;
                record.size = tokens_sold as f64 / TOKEN_UNIT;
                record.taker_side = TakerSide::Sell;
                record.taker = Some(seller);
                record.maker_amount = Some(returned);
                record.taker_amount = Some(tokens_sold);
                record.outcome_index = Some(outcome_index);
                record.fee = Some(fee);
            }
        }

        Ok(record)
    }
}

fn ratio(collateral: u64, tokens: u64) -> Result<f64, String> {
    if tokens == 0 {
        return Err("zero outcome token amount".to_string());
    }
    Ok(collateral as f64 / tokens as f64)
}

/// Log decoder for one of the two trade resources
#[derive(Debug, Clone)]
pub struct TradeLogDecoder {
    name: &'static str,
    topics: EventTopics,
    filter: LogFilter,
}

impl TradeLogDecoder {
    /// CTF exchange fills from the configured exchange contracts
    pub fn ctf(config: &ChainConfig) -> Self {
        let topics = EventTopics::from_config(config);
        let filter = LogFilter {
            addresses: config
                .ctf_exchange_addresses
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            topics: vec![topics.order_filled.clone()],
        };
        Self {
            name: "polymarket-ctf",
            topics,
            filter,
        }
    }

    /// FPMM buys and sells from any market maker contract
    pub fn legacy(config: &ChainConfig) -> Self {
        let topics = EventTopics::from_config(config);
        let filter = LogFilter {
            addresses: Vec::new(),
            topics: vec![topics.fpmm_buy.clone(), topics.fpmm_sell.clone()],
        };
        Self {
            name: "polymarket-fpmm",
            topics,
            filter,
        }
    }
}

impl LogDecoder for TradeLogDecoder {
    type Record = TradeRecord;

    fn name(&self) -> &str {
        self.name
    }

    fn filter(&self) -> &LogFilter {
        &self.filter
    }

    fn decode(&self, log: &RpcLog) -> Result<TradeRecord, String> {
        let at = LogLocation::of(log)?;
        TradeEvent::decode(log, &self.topics)?.into_record(&at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(n: u64) -> String {
        format!("{:064x}", n)
    }

    fn address_topic(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    fn log(address: &str, topics: Vec<String>, data: String) -> RpcLog {
        RpcLog {
            address: address.to_string(),
            topics,
            data,
            block_number: "0x2faf080".to_string(),
            transaction_hash: "0xABCDEF".to_string(),
            log_index: "0x7".to_string(),
            removed: false,
        }
    }

    fn order_filled(maker_asset: u64, taker_asset: u64, maker_amount: u64, taker_amount: u64) -> RpcLog {
        let data = format!(
            "0x{}{}{}{}{}",
            word(maker_asset),
            word(taker_asset),
            word(maker_amount),
            word(taker_amount),
            word(0)
        );
        log(
            "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e",
            vec![
                ORDER_FILLED_TOPIC.to_string(),
                format!("0x{}", "11".repeat(32)),
                address_topic("0x00000000000000000000000000000000000000aa"),
                address_topic("0x00000000000000000000000000000000000000bb"),
            ],
            data,
        )
    }

    #[test]
    fn test_order_filled_maker_pays_collateral() {
        let decoder = TradeLogDecoder::ctf(&ChainConfig::default());
        let record = decoder
            .decode(&order_filled(0, 123_456, 400_000, 1_000_000))
            .unwrap();

        assert_eq!(record.source, TradeSource::PolymarketCtf);
        assert_eq!(record.trade_id, "0xabcdef:7");
        assert_eq!(record.market_id, "123456");
        assert_eq!(record.taker_side, TakerSide::Sell);
        assert!((record.price - 0.4).abs() < 1e-12);
        assert!((record.size - 1.0).abs() < 1e-12);
        assert_eq!(record.block_number, Some(50_000_000));
        assert_eq!(record.maker_asset_id.as_deref(), Some("0"));
        assert_eq!(
            record.maker.as_deref(),
            Some("0x00000000000000000000000000000000000000aa")
        );
    }

    #[test]
    fn test_order_filled_maker_sells_tokens() {
        let decoder = TradeLogDecoder::ctf(&ChainConfig::default());
        let record = decoder
            .decode(&order_filled(987, 0, 2_000_000, 1_300_000))
            .unwrap();
        assert_eq!(record.market_id, "987");
        assert_eq!(record.taker_side, TakerSide::Buy);
        assert!((record.price - 0.65).abs() < 1e-12);
        assert!((record.size - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_fpmm_buy_and_sell() {
        let decoder = TradeLogDecoder::legacy(&ChainConfig::default());
        let fpmm = "0x9D1C7E0Fb1b1E2a5dA7B7Ec50e0D5C8D6f7A0B3C";

        let buy = log(
            fpmm,
            vec![
                FPMM_BUY_TOPIC.to_string(),
                address_topic("0x00000000000000000000000000000000000000cc"),
                format!("0x{}", word(1)),
            ],
            format!("0x{}{}{}", word(5_000_000), word(100_000), word(10_000_000)),
        );
        let record = decoder.decode(&buy).unwrap();
        assert_eq!(record.source, TradeSource::PolymarketLegacy);
        assert_eq!(record.market_id, fpmm.to_lowercase());
        assert_eq!(record.taker_side, TakerSide::Buy);
        assert_eq!(record.outcome_index, Some(1));
        assert_eq!(record.maker_amount, Some(5_000_000));
        assert!((record.price - 0.5).abs() < 1e-12);
        assert!((record.size - 10.0).abs() < 1e-12);

        let sell = log(
            fpmm,
            vec![
                FPMM_SELL_TOPIC.to_string(),
                address_topic("0x00000000000000000000000000000000000000cc"),
                format!("0x{}", word(0)),
            ],
            format!("0x{}{}{}", word(2_000_000), word(0), word(8_000_000)),
        );
        let record = decoder.decode(&sell).unwrap();
        assert_eq!(record.taker_side, TakerSide::Sell);
        assert!((record.price - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_malformed_logs_rejected() {
        let decoder = TradeLogDecoder::ctf(&ChainConfig::default());

        let mut short = order_filled(0, 1, 1, 1);
        short.data = format!("0x{}", word(0));
        assert!(decoder.decode(&short).is_err());

        let oversized = order_filled(0, 1, 1, 1);
        let mut data = oversized.data.clone();
        let start = 2 + 64 * 2;
        data.replace_range(start..start + 64, &"f".repeat(64));
        let oversized = RpcLog { data, ..oversized };
        assert!(decoder.decode(&oversized).is_err());

        assert!(decoder.decode(&order_filled(0, 1, 5, 0)).is_err());

        let mut unknown = order_filled(0, 1, 1, 1);
        unknown.topics[0] = format!("0x{}", "00".repeat(32));
        assert!(decoder.decode(&unknown).is_err());
    }

    #[test]
    fn test_filters() {
        let ctf = TradeLogDecoder::ctf(&ChainConfig::default());
        assert_eq!(ctf.filter().addresses.len(), 2);
        assert_eq!(ctf.filter().topics, vec![ORDER_FILLED_TOPIC.to_string()]);

        let legacy = TradeLogDecoder::legacy(&ChainConfig::default());
        assert!(legacy.filter().addresses.is_empty());
        assert_eq!(legacy.filter().topics.len(), 2);
    }
}

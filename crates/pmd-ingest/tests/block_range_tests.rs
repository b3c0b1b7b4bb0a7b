//! Chain resource tests against a fake JSON-RPC node
//!
//! The fake node serves `eth_blockNumber`, `eth_getLogs` (one CTF fill per
//! block) and `eth_getBlockByNumber`, and refuses log queries wider than a
//! configurable range the way public Polygon nodes do.

mod common;

use anyhow::Result;
use common::{context, init_tracing};
use pmd_ingest::config::ChainConfig;
use pmd_ingest::framework::{list_shards, read_shard, Orchestrator};
use pmd_ingest::polymarket::{self, events::ORDER_FILLED_TOPIC};
use pmd_ingest::{Position, RunState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Clone)]
struct FakeNode {
    head: u64,
    /// Widest accepted `eth_getLogs` range, inclusive
    max_range: u64,
    log_queries: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl FakeNode {
    fn new(head: u64, max_range: u64) -> Self {
        Self {
            head,
            max_range,
            log_queries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn queries(&self) -> Vec<(u64, u64)> {
        self.log_queries.lock().unwrap().clone()
    }
}

fn quantity(value: &Value) -> u64 {
    let raw = value.as_str().unwrap();
    u64::from_str_radix(raw.trim_start_matches("0x"), 16).unwrap()
}

fn word(n: u64) -> String {
    format!("{:064x}", n)
}

fn fill_log(block: u64) -> Value {
    // maker pays 0.25 USDC per token for 4 tokens of asset `block`
    let data = format!(
        "0x{}{}{}{}{}",
        word(0),
        word(block),
        word(1_000_000),
        word(4_000_000),
        word(0)
    );
    json!({
        "address": "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e",
        "topics": [
            ORDER_FILLED_TOPIC,
            format!("0x{}", word(block)),
            format!("0x{}", word(0xaa)),
            format!("0x{}", word(0xbb)),
        ],
        "data": data,
        "blockNumber": format!("{:#x}", block),
        "transactionHash": format!("0x{}", word(block)),
        "logIndex": "0x0",
        "removed": false
    })
}

impl Respond for FakeNode {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let id = body["id"].clone();
        let ok = |result: Value| {
            ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        };

        match body["method"].as_str().unwrap() {
            "eth_blockNumber" => ok(json!(format!("{:#x}", self.head))),
            "eth_getLogs" => {
                let criteria = &body["params"][0];
                let from = quantity(&criteria["fromBlock"]);
                let to = quantity(&criteria["toBlock"]);
                if to - from + 1 > self.max_range {
                    return ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32005, "message": "query returned more than 10000 results"}
                    }));
                }
                self.log_queries.lock().unwrap().push((from, to));
                ok(Value::Array((from..=to).map(fill_log).collect()))
            }
            "eth_getBlockByNumber" => {
                let number = quantity(&body["params"][0]);
                ok(json!({
                    "number": format!("{:#x}", number),
                    "timestamp": format!("{:#x}", 1_600_000_000 + number * 2)
                }))
            }
            other => panic!("unexpected RPC method {}", other),
        }
    }
}

async fn start_node(node: &FakeNode) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(node.clone())
        .mount(&server)
        .await;
    server
}

fn chain(server: &MockServer, end: Option<u64>, window: u64) -> ChainConfig {
    ChainConfig::default()
        .with_rpc_url(server.uri())
        .with_start_block(100)
        .with_end_block(end)
        .with_window_size(window)
        .with_confirmation_depth(10)
}

fn column_u64(path: &std::path::Path, name: &str) -> Result<Vec<u64>> {
    let df = read_shard(path)?;
    Ok(df.column(name)?.u64()?.into_iter().flatten().collect())
}

#[tokio::test]
async fn test_confirmation_depth_scenario() -> Result<()> {
    init_tracing();
    let node = FakeNode::new(155, 10_000);
    let server = start_node(&node).await;
    let dir = tempfile::tempdir()?;
    let ctx = context(dir.path(), |c| c.with_chain(chain(&server, Some(150), 20)));

    let report = Orchestrator::new(
        "polymarket-ctf-trades",
        polymarket::ctf_trades_adapter(&ctx),
        &ctx,
    )
    .run()
    .await?;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.records_appended, 45);
    assert_eq!(report.checkpoint, Some(Position::block(145)));

    let shards = list_shards(&dir.path().join("polymarket-ctf-trades"))?;
    let blocks = column_u64(&shards[0].1, "block_number")?;
    assert_eq!(blocks, (100..145).collect::<Vec<_>>());

    let df = read_shard(&shards[0].1)?;
    let prices: Vec<f64> = df.column("price")?.f64()?.into_iter().flatten().collect();
    assert!(prices.iter().all(|p| (p - 0.25).abs() < 1e-12));
    let sides: Vec<String> = df
        .column("taker_side")?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    assert!(sides.iter().all(|s| s == "sell"));

    // nothing new below the confirmed head
    let rerun = Orchestrator::new(
        "polymarket-ctf-trades",
        polymarket::ctf_trades_adapter(&ctx),
        &ctx,
    )
    .run()
    .await?;
    assert_eq!(rerun.units_fetched, 0);
    assert_eq!(rerun.records_appended, 0);
    assert_eq!(rerun.checkpoint, Some(Position::block(145)));
    Ok(())
}

#[tokio::test]
async fn test_oversized_windows_are_split() -> Result<()> {
    init_tracing();
    let node = FakeNode::new(1_000, 6);
    let server = start_node(&node).await;
    let dir = tempfile::tempdir()?;
    let ctx = context(dir.path(), |c| c.with_chain(chain(&server, Some(140), 20)));

    let report = Orchestrator::new(
        "polymarket-ctf-trades",
        polymarket::ctf_trades_adapter(&ctx),
        &ctx,
    )
    .run()
    .await?;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.records_appended, 40);
    assert_eq!(report.checkpoint, Some(Position::block(140)));
    assert!(node.queries().iter().all(|(from, to)| to - from + 1 <= 6));

    let shards = list_shards(&dir.path().join("polymarket-ctf-trades"))?;
    let blocks = column_u64(&shards[0].1, "block_number")?;
    assert_eq!(blocks, (100..140).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_end_block_finishes_without_head_query() -> Result<()> {
    init_tracing();
    let node = FakeNode::new(1_000, 10_000);
    let server = start_node(&node).await;
    let dir = tempfile::tempdir()?;
    let ctx = context(dir.path(), |c| c.with_chain(chain(&server, Some(130), 50)));

    let report = Orchestrator::new(
        "polymarket-ctf-trades",
        polymarket::ctf_trades_adapter(&ctx),
        &ctx,
    )
    .run()
    .await?;
    assert_eq!(report.checkpoint, Some(Position::block(130)));

    let before = server.received_requests().await.unwrap_or_default().len();
    let rerun = Orchestrator::new(
        "polymarket-ctf-trades",
        polymarket::ctf_trades_adapter(&ctx),
        &ctx,
    )
    .run()
    .await?;
    assert_eq!(rerun.state, RunState::Done);
    assert_eq!(rerun.units_fetched, 0);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), before);
    Ok(())
}

#[tokio::test]
async fn test_block_timestamps_sampled_by_stride() -> Result<()> {
    init_tracing();
    let node = FakeNode::new(155, 10_000);
    let server = start_node(&node).await;
    let dir = tempfile::tempdir()?;
    let ctx = context(dir.path(), |c| {
        c.with_chain(chain(&server, None, 20).with_block_stride(10))
    });

    let report = Orchestrator::new("polymarket-blocks", polymarket::blocks_adapter(&ctx), &ctx)
        .run()
        .await?;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.checkpoint, Some(Position::block(145)));

    let shards = list_shards(&dir.path().join("polymarket-blocks"))?;
    let df = read_shard(&shards[0].1)?;
    let heights: Vec<u64> = df.column("block_number")?.u64()?.into_iter().flatten().collect();
    let timestamps: Vec<i64> = df.column("timestamp")?.i64()?.into_iter().flatten().collect();
    assert_eq!(heights, vec![100, 110, 120, 130, 140]);
    assert_eq!(timestamps[0], (1_600_000_000 + 200) * 1_000);
    Ok(())
}

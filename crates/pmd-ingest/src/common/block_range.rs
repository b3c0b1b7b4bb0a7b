//! Adapters over block height windows
//!
//! Chain resources are planned as windows `[from, to)` between the resume
//! height and the confirmed head (`head - confirmation_depth`), capped by
//! an optional configured end height. Windows are independent, so they
//! are fetched in parallel and committed in height order.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::VecDeque;
use tracing::{debug, warn};

use super::rpc::{LogFilter, RpcClient, RpcLog};
use crate::error::SourceError;
use crate::framework::record::ShardRecord;
use crate::framework::source::SourceAdapter;
use crate::framework::types::{FetchOutcome, FetchUnit, Plan, Position, Schedule};
use crate::records::BlockRecord;

/// Block header requests in flight within one timestamp window
pub const TIMESTAMP_FETCH_WIDTH: usize = 8;

/// Turns matching logs into records
pub trait LogDecoder: Send + Sync + 'static {
    type Record: ShardRecord;

    fn name(&self) -> &str;

    fn filter(&self) -> &LogFilter;

    /// Decode one log; an error marks the log as malformed
    fn decode(&self, log: &RpcLog) -> Result<Self::Record, String>;
}

/// Height range and window geometry of a chain resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindows {
    pub start: u64,
    /// Exclusive upper bound; `None` follows the head
    pub end: Option<u64>,
    pub window: u64,
    pub confirmation_depth: u64,
}

impl BlockWindows {
    /// Windows from `next` up to the confirmed head
    pub fn plan(&self, next: u64, head: u64) -> Plan {
        let next = next.max(self.start);
        if self.end.is_some_and(|end| next >= end) {
            return Plan::Finished;
        }

        let mut upper = head.saturating_sub(self.confirmation_depth);
        if let Some(end) = self.end {
            upper = upper.min(end);
        }

        let window = self.window.max(1);
        let mut units = Vec::new();
        let mut from = next;
        while from < upper {
            let to = from.saturating_add(window).min(upper);
            units.push(FetchUnit::Blocks { from, to });
            from = to;
        }
        Plan::Windows(units)
    }

    /// Whether a window closes the configured range
    pub fn ends_range(&self, to: u64) -> bool {
        self.end == Some(to)
    }

    fn resume_height(&self, from: &Position) -> Result<u64, SourceError> {
        match from {
            Position::Block { next } => Ok(*next),
            other => Err(SourceError::Malformed(format!(
                "block resource cannot resume from {}",
                other
            ))),
        }
    }
}

fn window_of(unit: &FetchUnit) -> Result<(u64, u64), SourceError> {
    match unit {
        FetchUnit::Blocks { from, to } if from < to => Ok((*from, *to)),
        other => Err(SourceError::Malformed(format!(
            "not a block window: {}",
            other
        ))),
    }
}

/// Event log resource: one `eth_getLogs` per window, split on demand
pub struct BlockRangeAdapter<D: LogDecoder> {
    rpc: RpcClient,
    decoder: D,
    windows: BlockWindows,
}

impl<D: LogDecoder> BlockRangeAdapter<D> {
    pub fn new(rpc: RpcClient, decoder: D, windows: BlockWindows) -> Self {
        Self {
            rpc,
            decoder,
            windows,
        }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Fetch and decode `[from, to)`, halving sub-windows the node refuses
    async fn scan(&self, from: u64, to: u64) -> Result<(Vec<D::Record>, usize), SourceError> {
        let filter = self.decoder.filter();
        let mut pending = VecDeque::from([(from, to)]);
        let mut records = Vec::new();
        let mut malformed = 0;

        while let Some((lo, hi)) = pending.pop_front() {
            match self.rpc.get_logs(filter, lo, hi - 1).await {
                Ok(logs) => {
                    for log in logs.iter().filter(|log| !log.removed) {
                        match self.decoder.decode(log) {
                            Ok(record) => records.push(record),
                            Err(reason) => {
                                malformed += 1;
                                warn!(
                                    decoder = self.decoder.name(),
                                    tx = %log.transaction_hash,
                                    log_index = %log.log_index,
                                    reason = %reason,
                                    "Skipping malformed log"
                                );
                            }
                        }
                    }
                }
                Err(SourceError::ResponseTooLarge { message, .. }) if hi - lo > 1 => {
                    let mid = lo + (hi - lo) / 2;
                    debug!(from = lo, to = hi, mid, reason = %message, "Log query too large, splitting window");
                    pending.push_front((mid, hi));
                    pending.push_front((lo, mid));
                }
                Err(e) => return Err(e),
            }
        }

        Ok((records, malformed))
    }
}

#[async_trait]
impl<D: LogDecoder> SourceAdapter for BlockRangeAdapter<D> {
    type Record = D::Record;

    fn name(&self) -> &str {
        self.decoder.name()
    }

    fn schedule(&self) -> Schedule {
        Schedule::Blocks
    }

    fn start_position(&self) -> Position {
        Position::block(self.windows.start)
    }

    async fn plan(&self, from: &Position) -> Result<Plan, SourceError> {
        let next = self.windows.resume_height(from)?;
        if self.windows.end.is_some_and(|end| next >= end) {
            return Ok(Plan::Finished);
        }
        let head = self.rpc.block_number().await?;
        Ok(self.windows.plan(next, head))
    }

    async fn fetch(&self, unit: &FetchUnit) -> Result<FetchOutcome<Self::Record>, SourceError> {
        let (from, to) = window_of(unit)?;
        let (records, malformed) = self.scan(from, to).await?;
        Ok(FetchOutcome {
            records,
            malformed,
            position: Position::block(to),
            end_of_stream: self.windows.ends_range(to),
            follow_on: None,
        })
    }
}

/// Block timestamp resource: one header per sampled height
pub struct BlockTimestampAdapter {
    rpc: RpcClient,
    windows: BlockWindows,
    stride: u64,
}

impl BlockTimestampAdapter {
    pub fn new(rpc: RpcClient, windows: BlockWindows, stride: u64) -> Self {
        Self {
            rpc,
            windows,
            stride: stride.max(1),
        }
    }

    /// Sampled heights inside `[from, to)`, aligned to the start height
    pub fn heights(&self, from: u64, to: u64) -> Vec<u64> {
        let start = self.windows.start;
        let from = from.max(start);
        let first = start + (from - start).div_ceil(self.stride) * self.stride;
        (first..to).step_by(self.stride as usize).collect()
    }
}

#[async_trait]
impl SourceAdapter for BlockTimestampAdapter {
    type Record = BlockRecord;

    fn name(&self) -> &str {
        "polygon-blocks"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Blocks
    }

    fn start_position(&self) -> Position {
        Position::block(self.windows.start)
    }

    async fn plan(&self, from: &Position) -> Result<Plan, SourceError> {
        let next = self.windows.resume_height(from)?;
        if self.windows.end.is_some_and(|end| next >= end) {
            return Ok(Plan::Finished);
        }
        let head = self.rpc.block_number().await?;
        Ok(self.windows.plan(next, head))
    }

    async fn fetch(&self, unit: &FetchUnit) -> Result<FetchOutcome<BlockRecord>, SourceError> {
        let (from, to) = window_of(unit)?;
        let rpc = &self.rpc;
        let records: Vec<BlockRecord> = stream::iter(self.heights(from, to))
            .map(|height| async move {
                let timestamp = rpc.block_timestamp(height).await?;
                Ok::<_, SourceError>(BlockRecord {
                    block_number: height,
                    timestamp,
                })
            })
            .buffered(TIMESTAMP_FETCH_WIDTH)
            .try_collect()
            .await?;

        Ok(FetchOutcome {
            records,
            malformed: 0,
            position: Position::block(to),
            end_of_stream: self.windows.ends_range(to),
            follow_on: None,
        })
    }
}

//! Shared helpers for pmd-ingest integration tests
//!
//! - Tracing setup for test output
//! - Context builders over temporary data directories
//! - A scripted in-memory block source with injectable failures
//! - Shard readers for asserting on committed data

#![allow(dead_code)]

use async_trait::async_trait;
use pmd_ingest::common::block_range::BlockWindows;
use pmd_ingest::framework::{
    list_shards, read_shard, FetchOutcome, FetchUnit, Plan, Position, Schedule, SourceAdapter,
};
use pmd_ingest::{BlockRecord, IngestConfig, IngestContext, SourceError};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pmd_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Context over a data directory with instant retries
pub fn context(data_dir: &Path, configure: impl FnOnce(IngestConfig) -> IngestConfig) -> IngestContext {
    let config = IngestConfig::default()
        .with_data_dir(data_dir)
        .with_retry(pmd_ingest::framework::RetryPolicy::immediate(2));
    IngestContext::new(configure(config)).expect("valid test config")
}

/// Block numbers of every committed shard row, in shard order
pub fn committed_heights(data_dir: &Path, resource: &str) -> Vec<u64> {
    let mut heights = Vec::new();
    for (_, path) in list_shards(&data_dir.join(resource)).expect("list shards") {
        let df = read_shard(&path).expect("read shard");
        let column = df.column("block_number").expect("block_number column");
        heights.extend(column.u64().expect("u64 column").into_iter().flatten());
    }
    heights
}

/// Row count of each committed shard, in shard order
pub fn shard_sizes(data_dir: &Path, resource: &str) -> Vec<usize> {
    list_shards(&data_dir.join(resource))
        .expect("list shards")
        .into_iter()
        .map(|(_, path)| read_shard(&path).expect("read shard").height())
        .collect()
}

/// In-memory block source
///
/// Window `[from, to)` yields one record per height. Failures and delays
/// are scripted per window start.
pub struct ScriptedSource {
    windows: BlockWindows,
    head: Arc<AtomicU64>,
    overlap: bool,
    delays: HashMap<u64, Duration>,
    failures: Mutex<HashMap<u64, VecDeque<SourceError>>>,
    fetches: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedSource {
    /// Heights `[start, head)` in windows of `window`, no confirmation depth
    pub fn new(start: u64, head: u64, window: u64) -> Self {
        Self {
            windows: BlockWindows {
                start,
                end: None,
                window,
                confirmation_depth: 0,
            },
            head: Arc::new(AtomicU64::new(head)),
            overlap: false,
            delays: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    pub fn with_end(mut self, end: u64) -> Self {
        self.windows.end = Some(end);
        self
    }

    /// Each window also re-emits the height just below it
    pub fn with_overlap(mut self) -> Self {
        self.overlap = true;
        self
    }

    pub fn with_delay(mut self, from: u64, delay: Duration) -> Self {
        self.delays.insert(from, delay);
        self
    }

    /// Fail the window starting at `from` with these errors, in order
    pub fn with_failures(self, from: u64, errors: Vec<SourceError>) -> Self {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(from, errors.into());
        self
    }

    /// Cancel `token` when the n-th fetch starts
    pub fn with_cancel_after(mut self, fetches: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((fetches, token));
        self
    }

    pub fn head_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.head)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    type Record = BlockRecord;

    fn name(&self) -> &str {
        "scripted"
    }

    fn schedule(&self) -> Schedule {
        Schedule::Blocks
    }

    fn start_position(&self) -> Position {
        Position::block(self.windows.start)
    }

    async fn plan(&self, from: &Position) -> Result<Plan, SourceError> {
        let Position::Block { next } = from else {
            return Err(SourceError::Malformed(format!("bad position {}", from)));
        };
        Ok(self.windows.plan(*next, self.head.load(Ordering::SeqCst)))
    }

    async fn fetch(&self, unit: &FetchUnit) -> Result<FetchOutcome<BlockRecord>, SourceError> {
        let FetchUnit::Blocks { from, to } = unit else {
            return Err(SourceError::Malformed(format!("bad unit {}", unit)));
        };

        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if n >= *after {
                token.cancel();
            }
        }

        if let Some(delay) = self.delays.get(from) {
            tokio::time::sleep(*delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(from)
            .and_then(|queue| queue.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }

        let low = if self.overlap && *from > self.windows.start {
            from - 1
        } else {
            *from
        };
        let records = (low..*to)
            .map(|height| BlockRecord {
                block_number: height,
                timestamp: height as i64 * 2_000,
            })
            .collect();

        Ok(FetchOutcome {
            records,
            malformed: 0,
            position: Position::block(*to),
            end_of_stream: self.windows.ends_range(*to),
            follow_on: None,
        })
    }
}

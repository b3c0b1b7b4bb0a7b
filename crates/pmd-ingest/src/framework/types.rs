//! Core types for the ingestion framework

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Resume position of a resource
///
/// Pages carry an opaque upstream cursor (or a decimal offset for
/// offset-paginated endpoints). Blocks carry the exclusive upper bound of
/// the committed height range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    Page {
        cursor: Option<String>,
        #[serde(default)]
        exhausted: bool,
    },
    Block {
        next: u64,
    },
}

impl Position {
    /// First page of an API resource
    pub fn start_of_pages() -> Self {
        Position::Page {
            cursor: None,
            exhausted: false,
        }
    }

    pub fn block(next: u64) -> Self {
        Position::Block { next }
    }

    /// Whether the upstream was drained when this position was recorded
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Position::Page { exhausted: true, .. })
    }

    fn offset(&self) -> Option<u64> {
        match self {
            Position::Page {
                cursor: Some(c), ..
            } => c.parse().ok(),
            _ => None,
        }
    }
}

impl PartialOrd for Position {
    /// Positions are only partially ordered: opaque cursors from different
    /// pages cannot be compared.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Position::Block { next: a }, Position::Block { next: b }) => Some(a.cmp(b)),
            (
                Position::Page {
                    cursor: ca,
                    exhausted: ea,
                },
                Position::Page {
                    cursor: cb,
                    exhausted: eb,
                },
            ) => {
                if ca == cb {
                    return Some(ea.cmp(eb));
                }
                match (ca, cb) {
                    (None, _) if !ea => Some(Ordering::Less),
                    (_, None) if !eb => Some(Ordering::Greater),
                    _ => match (self.offset(), other.offset()) {
                        (Some(a), Some(b)) => Some(a.cmp(&b)),
                        _ => None,
                    },
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Page {
                cursor: None,
                exhausted,
            } => write!(f, "page(start{})", if *exhausted { ", end" } else { "" }),
            Position::Page {
                cursor: Some(c),
                exhausted,
            } => write!(f, "page({}{})", c, if *exhausted { ", end" } else { "" }),
            Position::Block { next } => write!(f, "block({})", next),
        }
    }
}

/// One independently fetchable piece of upstream work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchUnit {
    /// Cursor-paginated request
    Page { cursor: Option<String> },
    /// Offset-paginated request
    Offset { offset: u64, limit: u32 },
    /// Block height window `[from, to)`
    Blocks { from: u64, to: u64 },
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchUnit::Page { cursor: None } => write!(f, "page(start)"),
            FetchUnit::Page { cursor: Some(c) } => write!(f, "page({})", c),
            FetchUnit::Offset { offset, limit } => write!(f, "offset({}+{})", offset, limit),
            FetchUnit::Blocks { from, to } => write!(f, "blocks[{}, {})", from, to),
        }
    }
}

/// How fetch units of a source follow each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Each response reveals the next cursor; one unit in flight
    Chained,
    /// Predictable offsets, dispatched in parallel until a short page
    Offsets,
    /// Finite set of block windows up to the confirmed head
    Blocks,
}

/// Work plan produced by a source for a resume position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Start from this unit; each response reveals the next one
    Chained(FetchUnit),
    /// Offsets `start, start + limit, ...` until a short page
    Offsets { start: u64, limit: u32 },
    /// Windows in dispatch order; empty when caught up with the head
    Windows(Vec<FetchUnit>),
    /// The configured range is fully covered
    Finished,
}

/// Result of fetching one unit
#[derive(Debug, Clone)]
pub struct FetchOutcome<R> {
    pub records: Vec<R>,
    /// Records that failed to decode and were skipped
    pub malformed: usize,
    /// Position reached once these records are committed
    pub position: Position,
    /// Upstream signalled end of stream with this unit
    pub end_of_stream: bool,
    /// Unit revealed by this response (chained pagination)
    pub follow_on: Option<FetchUnit>,
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    LoadingCheckpoint,
    Fetching,
    DedupingAndBuffering,
    Flushing,
    AdvancingCheckpoint,
    Done,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &str {
        match self {
            RunState::LoadingCheckpoint => "loading_checkpoint",
            RunState::Fetching => "fetching",
            RunState::DedupingAndBuffering => "deduping_and_buffering",
            RunState::Flushing => "flushing",
            RunState::AdvancingCheckpoint => "advancing_checkpoint",
            RunState::Done => "done",
            RunState::Stopped => "stopped",
        }
    }
}

/// Summary of one resource run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub resource: String,
    pub state: RunState,
    pub units_fetched: usize,
    pub records_fetched: usize,
    pub records_appended: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub shards_written: usize,
    pub checkpoint: Option<Position>,
}

impl RunReport {
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            state: RunState::LoadingCheckpoint,
            units_fetched: 0,
            records_fetched: 0,
            records_appended: 0,
            duplicates: 0,
            malformed: 0,
            shards_written: 0,
            checkpoint: None,
        }
    }
}

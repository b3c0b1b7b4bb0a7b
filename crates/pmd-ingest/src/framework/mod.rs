//! Generic ingestion framework
//!
//! Source-agnostic pipeline: adapters produce fetch units, the orchestrator
//! fetches them concurrently and commits them in order, the shard writer
//! deduplicates and publishes shards, and the checkpoint store records
//! progress. Every piece is restartable from the files on disk.

pub mod checkpoint;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod retry;
pub mod source;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use checkpoint::{CheckpointDocument, CheckpointStore, CHECKPOINT_FORMAT_VERSION};
pub use orchestrator::Orchestrator;
pub use queue::{ReorderBuffer, WorkQueue};
pub use record::ShardRecord;
pub use retry::RetryPolicy;
pub use source::SourceAdapter;
pub use storage::{list_shards, read_shard, AppendOutcome, AppendStats, ShardInfo, ShardWriter};
pub use types::{FetchOutcome, FetchUnit, Plan, Position, RunReport, RunState, Schedule};

//! Source adapter interface
//!
//! An adapter turns a resume position into fetch units and fetches one
//! unit at a time. Adapters keep no mutable state between calls, so the
//! orchestrator may fetch disjoint units concurrently.

use async_trait::async_trait;

use super::record::ShardRecord;
use super::types::{FetchOutcome, FetchUnit, Plan, Position, Schedule};
use crate::error::SourceError;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Normalized record produced by this source
    type Record: ShardRecord;

    /// Human-readable source name for logs
    fn name(&self) -> &str;

    fn schedule(&self) -> Schedule;

    /// Position of a resource that has never been ingested
    fn start_position(&self) -> Position;

    /// Fetch units needed to continue from `from`
    async fn plan(&self, from: &Position) -> Result<Plan, SourceError>;

    /// Fetch a single unit
    async fn fetch(&self, unit: &FetchUnit) -> Result<FetchOutcome<Self::Record>, SourceError>;
}

//! Shard record trait
//!
//! The storage layer is generic over this trait so it never looks at
//! source-specific payloads.

use polars::prelude::*;

/// A record that can be deduplicated and written to a columnar shard
pub trait ShardRecord: Clone + Send + Sync + 'static {
    /// Column holding the dedup key
    const KEY_COLUMN: &'static str;

    /// Stable identifier unique within the resource
    fn dedup_key(&self) -> String;

    /// Build the shard frame for a batch of records
    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame>;

    /// Read dedup keys back from a committed shard
    fn keys_from_frame(df: &DataFrame) -> PolarsResult<Vec<String>> {
        let column = df.column(Self::KEY_COLUMN)?;
        Ok(column
            .str()?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect())
    }
}

//! Dedup/shard writer
//!
//! Buffers records per resource, drops any whose dedup key is already
//! committed or buffered, and publishes fixed-size Parquet shards as
//! `{root}/{resource}/part-{seq:08}.parquet`. A shard is written under a
//! `.tmp` name, synced, and renamed into place, so readers globbing
//! `*.parquet` never see a partial file.

use pmd_common::checksum::compute_file_checksum;
use pmd_common::types::ChecksumAlgorithm;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::record::ShardRecord;
use crate::error::{IngestError, IngestResult};

const SHARD_PREFIX: &str = "part-";
const SHARD_SUFFIX: &str = ".parquet";
const TMP_SUFFIX: &str = ".tmp";

/// A committed shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub seq: u64,
    pub path: PathBuf,
    pub records: usize,
    pub sha256: String,
}

/// Result of appending one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Key already committed or buffered
    Duplicate,
    Buffered,
    /// Buffer reached the shard size and was published
    Flushed(ShardInfo),
}

/// Counters for a batch append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub appended: usize,
    pub duplicates: usize,
    pub shards: Vec<ShardInfo>,
}

/// Shard file name for a sequence number
pub fn shard_file_name(seq: u64) -> String {
    format!("{}{:08}{}", SHARD_PREFIX, seq, SHARD_SUFFIX)
}

fn parse_shard_seq(name: &str) -> Option<u64> {
    name.strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_SUFFIX)?
        .parse()
        .ok()
}

/// Committed shards in a resource directory, ordered by sequence
pub fn list_shards(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(seq) = parse_shard_seq(&name) {
            shards.push((seq, entry.path()));
        }
    }
    shards.sort_by_key(|(seq, _)| *seq);
    Ok(shards)
}

/// Read a committed shard back into a frame
pub fn read_shard(path: &Path) -> PolarsResult<DataFrame> {
    let file = fs::File::open(path)?;
    ParquetReader::new(file).finish()
}

/// Per-resource shard writer
///
/// Owns the resource's dedup set and sequence counter. Only one writer
/// may exist per resource directory at a time.
pub struct ShardWriter<R: ShardRecord> {
    resource: String,
    dir: PathBuf,
    shard_size: usize,
    committed: HashSet<String>,
    buffered_keys: HashSet<String>,
    buffer: Vec<R>,
    next_seq: u64,
}

impl<R: ShardRecord> ShardWriter<R> {
    /// Open the resource directory, clean up leftovers from a crashed
    /// write, and rebuild the dedup set from committed shards
    pub async fn open(root: &Path, resource: &str, shard_size: usize) -> IngestResult<Self> {
        if shard_size == 0 {
            return Err(IngestError::Config("shard size must be positive".to_string()));
        }

        let dir = root.join(resource);
        let scan_dir = dir.clone();
        let scan_resource = resource.to_string();

        let (committed, next_seq) = tokio::task::spawn_blocking(move || {
            scan_resource_dir::<R>(&scan_resource, &scan_dir)
        })
        .await
        .map_err(|e| IngestError::storage(resource, format!("shard scan task failed: {}", e)))??;

        info!(
            resource,
            dir = %dir.display(),
            committed_keys = committed.len(),
            next_seq,
            "Opened shard writer"
        );

        Ok(Self {
            resource: resource.to_string(),
            dir,
            shard_size,
            committed,
            buffered_keys: HashSet::new(),
            buffer: Vec::with_capacity(shard_size.min(65_536)),
            next_seq,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn committed_keys(&self) -> usize {
        self.committed.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.committed.contains(key) || self.buffered_keys.contains(key)
    }

    /// Buffer a record unless its key was seen; flush when the buffer fills
    pub async fn append(&mut self, record: R) -> IngestResult<AppendOutcome> {
        let key = record.dedup_key();
        if self.contains(&key) {
            return Ok(AppendOutcome::Duplicate);
        }

        self.buffered_keys.insert(key);
        self.buffer.push(record);

        if self.buffer.len() >= self.shard_size {
            if let Some(shard) = self.flush().await? {
                return Ok(AppendOutcome::Flushed(shard));
            }
        }
        Ok(AppendOutcome::Buffered)
    }

    pub async fn append_batch(&mut self, records: Vec<R>) -> IngestResult<AppendStats> {
        let mut stats = AppendStats::default();
        for record in records {
            match self.append(record).await? {
                AppendOutcome::Duplicate => stats.duplicates += 1,
                AppendOutcome::Buffered => stats.appended += 1,
                AppendOutcome::Flushed(shard) => {
                    stats.appended += 1;
                    stats.shards.push(shard);
                }
            }
        }
        Ok(stats)
    }

    /// Publish the buffer as the next shard; no-op when empty
    pub async fn flush(&mut self) -> IngestResult<Option<ShardInfo>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut df = R::to_frame(&self.buffer)
            .map_err(|e| IngestError::storage(&self.resource, format!("shard encoding: {}", e)))?;
        let seq = self.next_seq;
        let dir = self.dir.clone();
        let records = self.buffer.len();

        let shard = tokio::task::spawn_blocking(move || write_shard(&dir, seq, &mut df))
            .await
            .map_err(|e| IngestError::storage(&self.resource, format!("shard write task failed: {}", e)))?
            .map_err(|e| IngestError::storage(&self.resource, e))?;

        self.next_seq += 1;
        self.committed.extend(self.buffered_keys.drain());
        self.buffer.clear();

        info!(
            resource = %self.resource,
            seq,
            records,
            sha256 = %shard.sha256,
            "Committed shard"
        );

        Ok(Some(ShardInfo { records, ..shard }))
    }

    /// Committed shard paths in sequence order
    pub fn committed_shards(&self) -> IngestResult<Vec<PathBuf>> {
        list_shards(&self.dir)
            .map(|shards| shards.into_iter().map(|(_, path)| path).collect())
            .map_err(|e| IngestError::storage(&self.resource, e))
    }
}

fn scan_resource_dir<R: ShardRecord>(
    resource: &str,
    dir: &Path,
) -> IngestResult<(HashSet<String>, u64)> {
    fs::create_dir_all(dir).map_err(|e| IngestError::storage(resource, e))?;

    for entry in fs::read_dir(dir).map_err(|e| IngestError::storage(resource, e))? {
        let entry = entry.map_err(|e| IngestError::storage(resource, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(TMP_SUFFIX) {
            warn!(resource, file = %name, "Removing partial shard left by an interrupted write");
            fs::remove_file(entry.path()).map_err(|e| IngestError::storage(resource, e))?;
        }
    }

    let shards = list_shards(dir).map_err(|e| IngestError::storage(resource, e))?;
    let mut committed = HashSet::new();
    for (seq, path) in &shards {
        let df = read_shard(path).map_err(|e| {
            IngestError::storage(resource, format!("unreadable shard {}: {}", path.display(), e))
        })?;
        let keys = R::keys_from_frame(&df).map_err(|e| {
            IngestError::storage(resource, format!("shard {} has no key column: {}", seq, e))
        })?;
        debug!(resource, seq, keys = keys.len(), "Indexed shard");
        committed.extend(keys);
    }

    let next_seq = shards.last().map(|(seq, _)| seq + 1).unwrap_or(0);
    Ok((committed, next_seq))
}

fn write_shard(dir: &Path, seq: u64, df: &mut DataFrame) -> Result<ShardInfo, String> {
    let name = shard_file_name(seq);
    let path = dir.join(&name);
    let tmp_path = dir.join(format!("{}{}", name, TMP_SUFFIX));

    if path.exists() {
        return Err(format!("shard {} already exists", path.display()));
    }

    let result = (|| -> Result<String, String> {
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| format!("create {}: {}", tmp_path.display(), e))?;
        ParquetWriter::new(&mut file)
            .finish(df)
            .map_err(|e| format!("write parquet: {}", e))?;
        file.sync_all().map_err(|e| format!("sync shard: {}", e))?;
        drop(file);

        let sha256 = compute_file_checksum(&tmp_path, ChecksumAlgorithm::Sha256)
            .map_err(|e| format!("checksum shard: {}", e))?;
        fs::rename(&tmp_path, &path).map_err(|e| format!("atomic rename failed: {}", e))?;
        Ok(sha256)
    })();

    let sha256 = match result {
        Ok(sha256) => sha256,
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %cleanup, "Could not remove partial shard");
                }
            }
            return Err(e);
        }
    };

    // persist the rename itself
    if let Err(e) = fs::File::open(dir).and_then(|handle| handle.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Could not sync shard directory");
    }

    Ok(ShardInfo {
        seq,
        path,
        records: df.height(),
        sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BlockRecord, TakerSide, TradeRecord, TradeSource};

    fn block(n: u64) -> BlockRecord {
        BlockRecord {
            block_number: n,
            timestamp: n as i64 * 2_000,
        }
    }

    fn trade(id: &str) -> TradeRecord {
        TradeRecord {
            source: TradeSource::PolymarketCtf,
            trade_id: id.to_string(),
            market_id: "1234".to_string(),
            price: 0.4,
            size: 25.0,
            taker_side: TakerSide::Buy,
            block_number: Some(100),
            transaction_hash: Some("0xabc".to_string()),
            log_index: Some(3),
            order_hash: Some("0xfeed".to_string()),
            maker: None,
            taker: None,
            maker_asset_id: Some("0".to_string()),
            taker_asset_id: Some("1234".to_string()),
            maker_amount: Some(10_000_000),
            taker_amount: Some(25_000_000),
            outcome_index: None,
            fee: Some(0),
            timestamp: None,
        }
    }

    #[test]
    fn test_shard_names_sort_lexically() {
        assert_eq!(shard_file_name(7), "part-00000007.parquet");
        assert_eq!(parse_shard_seq("part-00000007.parquet"), Some(7));
        assert_eq!(parse_shard_seq("part-00000007.parquet.tmp"), None);
        assert!(shard_file_name(9) < shard_file_name(10));
    }

    #[tokio::test]
    async fn test_flushes_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::<BlockRecord>::open(dir.path(), "blocks", 3)
            .await
            .unwrap();

        let stats = writer
            .append_batch((0..7).map(block).collect())
            .await
            .unwrap();
        assert_eq!(stats.appended, 7);
        assert_eq!(stats.shards.len(), 2);
        assert!(stats.shards.iter().all(|s| s.records == 3));
        assert_eq!(writer.buffered(), 1);

        let last = writer.flush().await.unwrap().unwrap();
        assert_eq!(last.seq, 2);
        assert_eq!(last.records, 1);
        assert_eq!(writer.committed_shards().unwrap().len(), 3);
        assert!(writer.flush().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicates_within_buffer_and_committed() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::<TradeRecord>::open(dir.path(), "trades", 10)
            .await
            .unwrap();

        assert_eq!(writer.append(trade("a")).await.unwrap(), AppendOutcome::Buffered);
        assert_eq!(writer.append(trade("a")).await.unwrap(), AppendOutcome::Duplicate);
        writer.flush().await.unwrap();
        assert_eq!(writer.append(trade("a")).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(writer.append(trade("b")).await.unwrap(), AppendOutcome::Buffered);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_dedup_set_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = ShardWriter::<TradeRecord>::open(dir.path(), "trades", 2)
                .await
                .unwrap();
            writer
                .append_batch(vec![trade("a"), trade("b"), trade("c")])
                .await
                .unwrap();
            writer.flush().await.unwrap();
        }

        let mut writer = ShardWriter::<TradeRecord>::open(dir.path(), "trades", 2)
            .await
            .unwrap();
        assert_eq!(writer.committed_keys(), 3);
        assert!(writer.contains("b"));
        assert_eq!(writer.append(trade("c")).await.unwrap(), AppendOutcome::Duplicate);

        writer.append(trade("d")).await.unwrap();
        let shard = writer.flush().await.unwrap().unwrap();
        assert_eq!(shard.seq, 2);
    }

    #[tokio::test]
    async fn test_open_removes_stale_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let resource_dir = dir.path().join("blocks");
        std::fs::create_dir_all(&resource_dir).unwrap();
        let stale = resource_dir.join("part-00000000.parquet.tmp");
        std::fs::write(&stale, b"half a shard").unwrap();

        let writer = ShardWriter::<BlockRecord>::open(dir.path(), "blocks", 10)
            .await
            .unwrap();
        assert!(!stale.exists());
        assert!(writer.committed_shards().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shard_contents_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::<TradeRecord>::open(dir.path(), "trades", 10)
            .await
            .unwrap();
        writer.append(trade("0xabc:3")).await.unwrap();
        let shard = writer.flush().await.unwrap().unwrap();

        let df = read_shard(&shard.path).unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(TradeRecord::keys_from_frame(&df).unwrap(), vec!["0xabc:3"]);
        assert_eq!(shard.sha256.len(), 64);
    }
}

//! Durable per-resource checkpoints
//!
//! One JSON document per resource under `{root}/_checkpoints/`. Writes go
//! to a temporary file that is synced and renamed over the old document,
//! so readers see either the previous checkpoint or the new one.

use chrono::{DateTime, Utc};
use pmd_common::checksum::{checksum_bytes, verify_checksum};
use pmd_common::types::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::types::Position;
use crate::error::{IngestError, IngestResult};

/// Version tag written into every checkpoint document
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Directory (under the data root) holding checkpoint documents
pub const CHECKPOINT_DIR: &str = "_checkpoints";

/// Persisted checkpoint document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub format_version: u32,
    pub resource: String,
    pub position: Position,
    pub updated_at: DateTime<Utc>,
    /// SHA-256 of the serialized position
    pub checksum: String,
}

impl CheckpointDocument {
    fn new(resource: &str, position: Position) -> IngestResult<Self> {
        let checksum = position_checksum(resource, &position)?;
        Ok(Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            resource: resource.to_string(),
            position,
            updated_at: Utc::now(),
            checksum,
        })
    }
}

fn position_checksum(resource: &str, position: &Position) -> IngestResult<String> {
    let bytes = serde_json::to_vec(position).map_err(|e| IngestError::storage(resource, e))?;
    Ok(checksum_bytes(&bytes, ChecksumAlgorithm::Sha256))
}

/// Checkpoint store rooted at the ingestion data directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            dir: data_root.as_ref().join(CHECKPOINT_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, resource: &str) -> PathBuf {
        self.dir.join(format!("{}.json", resource))
    }

    /// Load the last committed position, or `None` for a fresh resource
    ///
    /// Unreadable, malformed, or tampered documents are
    /// [`IngestError::CheckpointCorrupt`]; they are never treated as absent.
    pub async fn load(&self, resource: &str) -> IngestResult<Option<Position>> {
        Ok(self.load_document(resource).await?.map(|doc| doc.position))
    }

    pub async fn load_document(&self, resource: &str) -> IngestResult<Option<CheckpointDocument>> {
        let path = self.path_for(resource);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupt(resource, format!("unreadable {}: {}", path.display(), e))),
        };

        let doc = parse_document(resource, &bytes)?;
        debug!(resource, position = %doc.position, "Loaded checkpoint");
        Ok(Some(doc))
    }

    /// Persist `position` for `resource`
    ///
    /// Rejects a position that orders strictly before the stored one.
    pub async fn save(&self, resource: &str, position: &Position) -> IngestResult<()> {
        if let Some(current) = self.load(resource).await? {
            if current.partial_cmp(position) == Some(Ordering::Greater) {
                return Err(IngestError::CheckpointRegression {
                    resource: resource.to_string(),
                    current,
                    proposed: position.clone(),
                });
            }
        }

        self.write(resource, position).await?;
        debug!(resource, position = %position, "Checkpoint advanced");
        Ok(())
    }

    /// Operator override: replace or remove a checkpoint without the
    /// monotonicity check
    pub async fn reset(&self, resource: &str, position: Option<&Position>) -> IngestResult<()> {
        match position {
            Some(position) => {
                self.write(resource, position).await?;
                warn!(resource, position = %position, "Checkpoint reset by operator");
            }
            None => match tokio::fs::remove_file(self.path_for(resource)).await {
                Ok(()) => warn!(resource, "Checkpoint removed by operator"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(IngestError::storage(resource, e)),
            },
        }
        Ok(())
    }

    /// Every persisted checkpoint, ordered by resource name
    pub async fn list(&self) -> IngestResult<Vec<CheckpointDocument>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IngestError::storage(CHECKPOINT_DIR, e)),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::storage(CHECKPOINT_DIR, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(resource) = name.strip_suffix(".json") {
                if let Some(doc) = self.load_document(resource).await? {
                    docs.push(doc);
                }
            }
        }

        docs.sort_by(|a, b| a.resource.cmp(&b.resource));
        Ok(docs)
    }

    async fn write(&self, resource: &str, position: &Position) -> IngestResult<()> {
        let doc = CheckpointDocument::new(resource, position.clone())?;
        let json = serde_json::to_vec_pretty(&doc).map_err(|e| IngestError::storage(resource, e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| IngestError::storage(resource, e))?;

        let path = self.path_for(resource);
        let tmp_path = path.with_extension("json.tmp");

        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %tmp_path.display(), error = %cleanup, "Could not remove partial checkpoint");
                }
            }
            return Err(IngestError::storage(
                resource,
                format!("checkpoint write to {} failed: {}", path.display(), e),
            ));
        }

        // persist the rename itself
        let synced = async { tokio::fs::File::open(&self.dir).await?.sync_all().await }.await;
        if let Err(e) = synced {
            warn!(dir = %self.dir.display(), error = %e, "Could not sync checkpoint directory");
        }

        info!(resource, position = %position, "Checkpoint saved");
        Ok(())
    }
}

fn corrupt(resource: &str, reason: impl Into<String>) -> IngestError {
    IngestError::CheckpointCorrupt {
        resource: resource.to_string(),
        reason: reason.into(),
    }
}

fn parse_document(resource: &str, bytes: &[u8]) -> IngestResult<CheckpointDocument> {
    let doc: CheckpointDocument = serde_json::from_slice(bytes)
        .map_err(|e| corrupt(resource, format!("malformed document: {}", e)))?;

    if doc.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(corrupt(
            resource,
            format!("unsupported format version {}", doc.format_version),
        ));
    }
    if doc.resource != resource {
        return Err(corrupt(
            resource,
            format!("document belongs to resource '{}'", doc.resource),
        ));
    }

    let position_bytes =
        serde_json::to_vec(&doc.position).map_err(|e| corrupt(resource, e.to_string()))?;
    verify_checksum(&position_bytes, &doc.checksum, ChecksumAlgorithm::Sha256)
        .map_err(|e| corrupt(resource, e.to_string()))?;

    Ok(doc)
}

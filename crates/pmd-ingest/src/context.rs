//! Shared ingestion context
//!
//! Built once at startup and handed by reference to every adapter and
//! orchestrator. Holds the configuration, the pooled HTTP client, the
//! checkpoint store, and the stop signal.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult};
use crate::framework::checkpoint::CheckpointStore;

#[derive(Clone)]
pub struct IngestContext {
    config: Arc<IngestConfig>,
    http: reqwest::Client,
    checkpoints: CheckpointStore,
    cancel: CancellationToken,
}

impl IngestContext {
    pub fn new(config: IngestConfig) -> IngestResult<Self> {
        config
            .validate()
            .map_err(|e| IngestError::Config(e.to_string()))?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))?;

        let checkpoints = CheckpointStore::new(&config.data_dir);

        info!(
            data_dir = %config.data_dir.display(),
            shard_size = config.shard_size,
            concurrency = config.concurrency,
            "Ingestion context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            http,
            checkpoints,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Token observed by every run; cancel it to stop ingestion
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request a cooperative stop of all runs sharing this context
    pub fn shutdown(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

//! Source registry
//!
//! Explicit map from resource name to an ingestion job, populated once at
//! startup. Jobs are type-erased orchestrators, so resources with different
//! record types live side by side.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::context::IngestContext;
use crate::error::{IngestError, IngestResult};
use crate::framework::orchestrator::Orchestrator;
use crate::framework::source::SourceAdapter;
use crate::framework::types::RunReport;
use crate::{kalshi, polymarket};

pub const KALSHI_TRADES: &str = "kalshi-trades";
pub const KALSHI_MARKETS: &str = "kalshi-markets";
pub const POLYMARKET_MARKETS: &str = "polymarket-markets";
pub const POLYMARKET_CTF_TRADES: &str = "polymarket-ctf-trades";
pub const POLYMARKET_LEGACY_TRADES: &str = "polymarket-legacy-trades";
pub const POLYMARKET_BLOCKS: &str = "polymarket-blocks";

/// A runnable ingestion target
#[async_trait]
pub trait IngestJob: Send + Sync {
    fn resource(&self) -> &str;

    async fn run(&self) -> IngestResult<RunReport>;
}

#[async_trait]
impl<S> IngestJob for Orchestrator<S>
where
    S: SourceAdapter + 'static,
{
    fn resource(&self) -> &str {
        Orchestrator::resource(self)
    }

    async fn run(&self) -> IngestResult<RunReport> {
        Orchestrator::run(self).await
    }
}

/// Resource name to job
#[derive(Default)]
pub struct SourceRegistry {
    jobs: BTreeMap<String, Box<dyn IngestJob>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in resource
    pub fn standard(ctx: &IngestContext) -> Self {
        let mut registry = Self::new();
        registry.register(Orchestrator::new(KALSHI_TRADES, kalshi::trades_adapter(ctx), ctx));
        registry.register(Orchestrator::new(KALSHI_MARKETS, kalshi::markets_adapter(ctx), ctx));
        registry.register(Orchestrator::new(
            POLYMARKET_MARKETS,
            polymarket::markets_adapter(ctx),
            ctx,
        ));
        registry.register(Orchestrator::new(
            POLYMARKET_CTF_TRADES,
            polymarket::ctf_trades_adapter(ctx),
            ctx,
        ));
        registry.register(Orchestrator::new(
            POLYMARKET_LEGACY_TRADES,
            polymarket::legacy_trades_adapter(ctx),
            ctx,
        ));
        registry.register(Orchestrator::new(
            POLYMARKET_BLOCKS,
            polymarket::blocks_adapter(ctx),
            ctx,
        ));
        registry
    }

    /// Add a job under its resource name, replacing any previous one
    pub fn register<J: IngestJob + 'static>(&mut self, job: J) -> Option<Box<dyn IngestJob>> {
        let name = job.resource().to_string();
        let previous = self.jobs.insert(name.clone(), Box::new(job));
        if previous.is_some() {
            warn!(resource = %name, "Replacing registered resource");
        }
        previous
    }

    pub fn names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run one resource by name
    pub async fn run(&self, name: &str) -> IngestResult<RunReport> {
        let job = self
            .jobs
            .get(name)
            .ok_or_else(|| IngestError::UnknownResource(name.to_string()))?;
        job.run().await
    }

    /// Run every resource concurrently; one failure does not stop the others
    pub async fn run_all(&self) -> BTreeMap<String, IngestResult<RunReport>> {
        info!(resources = self.jobs.len(), "Running all resources");
        let runs = self.jobs.iter().map(|(name, job)| async move {
            let result = job.run().await;
            (name.clone(), result)
        });
        join_all(runs).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;

    #[test]
    fn test_standard_registry_has_six_resources() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = IngestContext::new(IngestConfig::default().with_data_dir(dir.path())).unwrap();
        let registry = SourceRegistry::standard(&ctx);
        assert_eq!(
            registry.names(),
            vec![
                KALSHI_MARKETS,
                KALSHI_TRADES,
                POLYMARKET_BLOCKS,
                POLYMARKET_CTF_TRADES,
                POLYMARKET_LEGACY_TRADES,
                POLYMARKET_MARKETS,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = IngestContext::new(IngestConfig::default().with_data_dir(dir.path())).unwrap();
        let registry = SourceRegistry::standard(&ctx);
        let err = registry.run("betfair-trades").await.unwrap_err();
        assert!(matches!(err, IngestError::UnknownResource(name) if name == "betfair-trades"));
    }
}

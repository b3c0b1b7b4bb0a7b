//! Ingestion error taxonomy
//!
//! `SourceError` covers everything an upstream can do to a single call;
//! `IngestError` is what a resource run reports when it stops for good.

use std::time::Duration;
use thiserror::Error;

use crate::framework::types::Position;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Failure of one upstream call (HTTP request or JSON-RPC call)
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// Network error or node-side hiccup
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// HTTP 5xx, optionally with a `Retry-After` hint
    #[error("upstream server error ({status}): {message}")]
    ServerError {
        status: u16,
        retry_after: Option<Duration>,
        message: String,
    },

    /// HTTP 429, optionally with a `Retry-After` hint
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Per-call timeout elapsed
    #[error("upstream call timed out: {0}")]
    Timeout(String),

    /// RPC node refused the block window as too large
    #[error("response too large for block window {from}..{to}: {message}")]
    ResponseTooLarge { from: u64, to: u64, message: String },

    /// Non-retryable rejection (4xx other than 429, RPC invalid params)
    #[error("upstream rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The page as a whole could not be decoded
    #[error("malformed upstream response: {0}")]
    Malformed(String),

    /// Adapter-level retries exhausted
    #[error("source unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: String },
}

impl SourceError {
    /// Whether the retry policy may try the call again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_)
                | SourceError::ServerError { .. }
                | SourceError::RateLimited { .. }
                | SourceError::Timeout(_)
        )
    }

    /// Upstream-supplied delay hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after }
            | SourceError::ServerError { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether the orchestrator may requeue the fetch unit later
    pub fn is_requeueable(&self) -> bool {
        self.is_retryable() || matches!(self, SourceError::Unavailable { .. })
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            classify_status(status.as_u16(), None, err.to_string())
        } else {
            SourceError::Transient(err.to_string())
        }
    }
}

/// Map an HTTP status to the error taxonomy
pub fn classify_status(status: u16, retry_after: Option<Duration>, message: String) -> SourceError {
    match status {
        429 => SourceError::RateLimited { retry_after },
        500..=599 => SourceError::ServerError {
            status,
            retry_after,
            message,
        },
        408 => SourceError::Timeout(format!("HTTP 408: {}", message)),
        _ => SourceError::Rejected { status, message },
    }
}

/// Terminal failure of a resource run
#[derive(Error, Debug)]
pub enum IngestError {
    /// Checkpoint document unreadable or inconsistent; needs an operator
    #[error("checkpoint for '{resource}' is corrupt: {reason}")]
    CheckpointCorrupt { resource: String, reason: String },

    /// Attempt to move a checkpoint backwards through `save`
    #[error("checkpoint for '{resource}' would regress from {current} to {proposed}")]
    CheckpointRegression {
        resource: String,
        current: Position,
        proposed: Position,
    },

    /// Shard or checkpoint file IO / encoding failure
    #[error(
        "storage failure for '{resource}' (last good checkpoint: {}): {message}",
        .last_checkpoint.as_deref().unwrap_or("unknown")
    )]
    Storage {
        resource: String,
        message: String,
        /// Filled in by the orchestrator once the run knows it
        last_checkpoint: Option<String>,
    },

    /// A fetch unit kept failing after every orchestrator-level requeue
    #[error(
        "resource '{resource}' failed at {unit} after {requeues} requeues \
         (last good checkpoint: {last_checkpoint}): {source}"
    )]
    RetriesExhausted {
        resource: String,
        unit: String,
        requeues: u32,
        last_checkpoint: String,
        #[source]
        source: SourceError,
    },

    /// Non-retryable upstream failure
    #[error("resource '{resource}' stopped (last good checkpoint: {last_checkpoint}): {source}")]
    Source {
        resource: String,
        last_checkpoint: String,
        #[source]
        source: SourceError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

impl IngestError {
    pub(crate) fn storage(resource: &str, message: impl std::fmt::Display) -> Self {
        IngestError::Storage {
            resource: resource.to_string(),
            message: message.to_string(),
            last_checkpoint: None,
        }
    }

    /// Record the last good checkpoint on a storage failure that lacks one
    pub(crate) fn at_checkpoint(self, checkpoint: String) -> Self {
        match self {
            IngestError::Storage {
                resource,
                message,
                last_checkpoint: None,
            } => IngestError::Storage {
                resource,
                message,
                last_checkpoint: Some(checkpoint),
            },
            other => other,
        }
    }

    /// Resource the failure belongs to, when there is one
    pub fn resource(&self) -> Option<&str> {
        match self {
            IngestError::CheckpointCorrupt { resource, .. }
            | IngestError::CheckpointRegression { resource, .. }
            | IngestError::Storage { resource, .. }
            | IngestError::RetriesExhausted { resource, .. }
            | IngestError::Source { resource, .. } => Some(resource),
            IngestError::UnknownResource(name) => Some(name),
            IngestError::Config(_) => None,
        }
    }
}

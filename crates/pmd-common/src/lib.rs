//! PMD Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the prediction-market data
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `PmdError` and the `Result` alias
//! - **Checksums**: integrity digests for persisted documents
//! - **Logging**: `tracing` subscriber setup shared by every entry point
//! - **Types**: venue tags and other small shared enums
//!
//! # Example
//!
//! ```no_run
//! use pmd_common::checksum::checksum_bytes;
//! use pmd_common::types::ChecksumAlgorithm;
//!
//! let digest = checksum_bytes(b"{\"next\":145}", ChecksumAlgorithm::Sha256);
//! assert_eq!(digest.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{PmdError, Result};

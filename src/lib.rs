//! # vcs-ingest - Concurrent VCS History Extraction and Ingestion
//!
//! Walks a directory tree of cloned (or tar-packed) repositories, reads the
//! commit history of each one through a version-control backend and loads the
//! normalized commits into a relational store, or writes them out as JSON
//! documents.
//!
//! ## Key Features
//!
//! - **Bounded fan-out**: a locator feeds a bounded queue drained by a pool of
//!   extraction workers
//! - **Archive support**: small `.tar` archives have only their VCS metadata
//!   unpacked into a scratch directory that is always removed afterwards
//! - **Pluggable backends**: Git through `git2`; other systems are detected and
//!   can be served by registering a backend
//! - **Idempotent loads**: every commit carries a content fingerprint, unique
//!   per repository in the store
//! - **Bulk copy**: an alternative loader that relaxes the commit table's
//!   constraints for the length of the load and restores them on every exit
//!
//! ## Architecture
//!
//! ```text
//!  Locator ──paths──▶ worker × N ──commits──▶ TransactionalLoader (per repo)
//!                        │                 └─▶ BulkLoader (one task)
//!                        │                 └─▶ <owner>/<name>.json documents
//!                  Materializer → detect → HistoryExtractor
//! ```
//!
//! ## Modules
//!
//! - [`locator`]: enumerates candidate repositories at a fixed depth
//! - [`archive`]: materializes archives into scratch directories
//! - [`detect`]: classifies candidates by their metadata directory
//! - [`history`]: backend traits, the Git backend and commit fingerprints
//! - [`store`]: SQLite schema, lookups and both loaders
//! - [`ingest`]: the run coordinator
//! - [`output`]: JSON document rendering
//! - [`config`]: configuration with environment overrides
//!
//! ## Usage Example
//!
//! ```no_run
//! use vcs_ingest::config::{Config, LoaderStrategy};
//! use vcs_ingest::ingest::{Coordinator, Destination};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let summary = Coordinator::new(config, Destination::Database(LoaderStrategy::Transactional))
//!         .run("/srv/repos".as_ref(), 1)
//!         .await?;
//!     println!("{} repositories loaded", summary.succeeded);
//!     Ok(())
//! }
//! ```

/// Archive materialization into scratch directories
pub mod archive;

/// Configuration management with environment variable overrides
pub mod config;

/// Structural detection of version-control systems
pub mod detect;

/// Error types and utilities
pub mod error;

/// History backends, extraction and commit fingerprints
pub mod history;

/// Run coordination across workers and loaders
pub mod ingest;

/// Candidate repository enumeration
pub mod locator;

/// JSON documents for extracted repositories
pub mod output;

/// Platform-specific default locations
pub mod paths;

/// SQLite store, schema and loaders
pub mod store;

/// Canonical repository and commit records
pub mod types;

#[cfg(test)]
mod test_support;

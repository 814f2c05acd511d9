//! Commit history extraction behind a backend-neutral boundary
//!
//! A [`HistoryBackend`] opens a repository and hands back a [`HistoryHandle`]
//! exposing the handful of capabilities extraction needs. The
//! [`HistoryExtractor`] turns those into canonical [`Commit`] records.

pub mod fingerprint;
pub mod git;

pub use fingerprint::{Fingerprint, fingerprint};
pub use git::GitBackend;

use crate::error::HistoryError;
use crate::types::{Commit, DiffDelta, Developer, Repository, VcsKind};
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// What to fetch besides commit metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataPolicy {
    /// Attach per-file deltas to every commit
    pub deltas: bool,
    /// Attach patch text to every delta (requires `deltas`)
    pub patches: bool,
    /// Ask the backend to detect renames and copies
    pub detect_renames: bool,
}

/// Options for a single diff computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffRequest {
    pub with_deltas: bool,
    pub with_patches: bool,
    pub detect_renames: bool,
}

impl From<DataPolicy> for DiffRequest {
    fn from(policy: DataPolicy) -> Self {
        Self {
            with_deltas: policy.deltas,
            with_patches: policy.deltas && policy.patches,
            detect_renames: policy.detect_renames,
        }
    }
}

/// Commit metadata as the backend reports it
#[derive(Debug, Clone)]
pub struct NativeCommit {
    pub id: String,
    pub message: String,
    pub author: Developer,
    pub committer: Developer,
    pub author_date: DateTime<FixedOffset>,
    pub commit_date: DateTime<FixedOffset>,
    /// `None` for root commits
    pub first_parent: Option<String>,
}

/// Aggregate line and file counts of a diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// Result of diffing a commit against its first parent
#[derive(Debug, Clone, Default)]
pub struct NativeDiff {
    pub stats: DiffStats,
    /// Empty unless deltas were requested
    pub deltas: Vec<DiffDelta>,
}

/// A VCS that can open repositories of one kind
pub trait HistoryBackend: Send + Sync {
    fn kind(&self) -> VcsKind;

    fn open(&self, path: &Path) -> Result<Box<dyn HistoryHandle>, HistoryError>;
}

/// An open repository
pub trait HistoryHandle {
    /// URL the repository was cloned from
    fn clone_url(&self) -> Result<String, HistoryError>;

    /// Name of the branch currently checked out
    fn active_reference(&self) -> Result<String, HistoryError>;

    /// Ids of every commit reachable from `reference`, descendants first
    fn walk(&self, reference: &str) -> Result<Vec<String>, HistoryError>;

    fn commit(&self, id: &str) -> Result<NativeCommit, HistoryError>;

    fn diff(&self, parent: &str, id: &str, request: DiffRequest)
    -> Result<NativeDiff, HistoryError>;
}

/// Maps each VCS kind to the backend that reads it
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<VcsKind, Arc<dyn HistoryBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend this crate ships
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GitBackend));
        registry
    }

    pub fn register(&mut self, backend: Arc<dyn HistoryBackend>) {
        self.backends.insert(backend.kind(), backend);
    }

    pub fn get(&self, kind: VcsKind) -> Result<Arc<dyn HistoryBackend>, HistoryError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or_else(|| HistoryError::Unsupported(kind.to_string()))
    }
}

/// Normalizes backend history into canonical commits
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryExtractor {
    policy: DataPolicy,
}

impl HistoryExtractor {
    pub fn new(policy: DataPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DataPolicy {
        self.policy
    }

    /// Extract every non-root commit reachable from `reference`.
    ///
    /// Commits keep the backend's traversal order. The first commit that
    /// cannot be read or diffed aborts the whole extraction.
    pub fn extract(
        &self,
        handle: &dyn HistoryHandle,
        reference: &str,
    ) -> Result<Vec<Commit>, HistoryError> {
        let request = DiffRequest::from(self.policy);
        let ids = handle.walk(reference)?;
        let mut commits = Vec::with_capacity(ids.len());

        for id in &ids {
            let native = handle.commit(id)?;

            // Root commits have nothing to diff against.
            let Some(parent) = native.first_parent.as_deref() else {
                tracing::debug!("Skipping root commit {}", native.id);
                continue;
            };

            let diff = handle.diff(parent, &native.id, request)?;
            commits.push(Commit {
                vcs_id: native.id,
                message: native.message,
                author: native.author,
                committer: native.committer,
                author_date: native.author_date,
                commit_date: native.commit_date,
                diff_delta: request.with_deltas.then_some(diff.deltas),
                file_changed_count: diff.stats.files_changed,
                insertions_count: diff.stats.insertions,
                deletions_count: diff.stats.deletions,
            });
        }

        tracing::debug!(
            "Extracted {} commits from {} ({} visited)",
            commits.len(),
            reference,
            ids.len()
        );
        Ok(commits)
    }

    /// Read repository metadata and history into a [`Repository`]
    pub fn repository(
        &self,
        handle: &dyn HistoryHandle,
        kind: VcsKind,
        name: &str,
        clone_path: &Path,
    ) -> Result<Repository, HistoryError> {
        let clone_url = handle.clone_url()?;
        let default_branch = handle.active_reference()?;
        let commits = self.extract(handle, &default_branch)?;

        Ok(Repository {
            name: name.to_string(),
            vcs: kind,
            clone_url,
            clone_path: clone_path.to_path_buf(),
            default_branch,
            commits,
        })
    }
}

use super::lock::{LockMode, SchemaLockGuard};
use super::{Lookups, Store};
use crate::error::StoreError;
use crate::history::fingerprint;
use crate::types::Repository;
use rusqlite::{OptionalExtension, params};
use std::sync::Arc;

const INSERT_COMMIT: &str = "INSERT INTO commits(
        repository_id, author_id, committer_id, hash, vcs_id, message,
        author_date, commit_date, file_changed_count, insertions_count, deletions_count)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT DO NOTHING
    RETURNING id";

const INSERT_DELTA: &str = "INSERT INTO commit_diff_deltas(
        commit_id, file_status, is_file_binary, similarity, old_file_path, new_file_path, patch)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// Outcome of loading one repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    /// Commits whose fingerprint was already stored for the repository
    pub duplicates: usize,
    pub deltas: usize,
}

/// Loads each repository's commits and deltas in a single transaction
#[derive(Debug, Clone)]
pub struct TransactionalLoader {
    store: Store,
    lookups: Arc<Lookups>,
}

impl TransactionalLoader {
    pub fn new(store: Store, lookups: Arc<Lookups>) -> Self {
        Self { store, lookups }
    }

    /// Insert every commit of `repo` or none of them.
    ///
    /// Commits already present (same repository and fingerprint) are counted
    /// as duplicates and leave the rest of the load untouched.
    pub fn load(&self, repo: &Repository) -> Result<LoadReport, StoreError> {
        let repository_id = self.lookups.require_repository(&repo.clone_url)?;

        let _lock = SchemaLockGuard::acquire_blocking(
            self.store.path(),
            LockMode::Shared,
            self.store.busy_timeout(),
        )?;
        let mut conn = self.store.connect()?;

        let failed = |e: rusqlite::Error| StoreError::TransactionFailed {
            repository: repo.clone_url.clone(),
            reason: e.to_string(),
        };

        let tx = conn.transaction().map_err(failed)?;
        let mut report = LoadReport::default();
        {
            let mut commit_stmt = tx.prepare(INSERT_COMMIT).map_err(failed)?;
            let mut delta_stmt = tx.prepare(INSERT_DELTA).map_err(failed)?;

            for commit in &repo.commits {
                let hash = fingerprint(commit).to_hex();
                let commit_id: Option<i64> = commit_stmt
                    .query_row(
                        params![
                            repository_id,
                            self.lookups.user_id(&commit.author.email),
                            self.lookups.user_id(&commit.committer.email),
                            hash,
                            commit.vcs_id,
                            commit.message,
                            commit.author_date.to_rfc3339(),
                            commit.commit_date.to_rfc3339(),
                            commit.file_changed_count as i64,
                            commit.insertions_count as i64,
                            commit.deletions_count as i64,
                        ],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(failed)?;

                let Some(commit_id) = commit_id else {
                    tracing::debug!(
                        "Commit {} of {} already stored",
                        commit.vcs_id,
                        repo.clone_url
                    );
                    report.duplicates += 1;
                    continue;
                };
                report.inserted += 1;

                for delta in commit.diff_delta.iter().flatten() {
                    delta_stmt
                        .execute(params![
                            commit_id,
                            delta.status.as_str(),
                            delta.binary,
                            delta.similarity,
                            delta.old_file_path,
                            delta.new_file_path,
                            delta.patch,
                        ])
                        .map_err(failed)?;
                    report.deltas += 1;
                }
            }
        }
        tx.commit().map_err(failed)?;

        Ok(report)
    }
}

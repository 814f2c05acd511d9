//! High-throughput commit loading with relaxed constraints
//!
//! The [`BulkLoader`] streams [`CommitRow`]s into a [`CopyTarget`] in
//! fixed-size batches while a [`ConstraintWindow`] keeps the target's
//! indexes dropped and foreign keys unenforced. The window restores the
//! schema when it goes out of scope, whatever happened in between.

use super::lock::{LockMode, SchemaLockGuard};
use super::{Lookups, Store, schema};
use crate::error::StoreError;
use crate::history::{Fingerprint, fingerprint};
use crate::types::Commit;
use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

/// A commit with its fingerprint and store identifiers resolved
#[derive(Debug, Clone)]
pub struct CommitRow {
    pub repository_id: i64,
    pub author_id: Option<i64>,
    pub committer_id: Option<i64>,
    pub fingerprint: Fingerprint,
    pub commit: Commit,
}

impl CommitRow {
    pub fn resolve(commit: Commit, repository_id: i64, lookups: &Lookups) -> Self {
        Self {
            repository_id,
            author_id: lookups.user_id(&commit.author.email),
            committer_id: lookups.user_id(&commit.committer.email),
            fingerprint: fingerprint(&commit),
            commit,
        }
    }
}

/// Destination of a bulk load
pub trait CopyTarget {
    /// Drop indexes and stop enforcing foreign keys
    fn relax(&mut self) -> Result<(), StoreError>;

    /// Rebuild what `relax` removed
    fn restore(&mut self) -> Result<(), StoreError>;

    fn begin(&mut self) -> Result<(), StoreError>;

    fn write_row(&mut self, row: &CommitRow) -> Result<(), StoreError>;

    /// Whether the batch opened by `begin` is still open. A target that
    /// abandons the whole batch on a row error reports `false` afterwards.
    fn in_batch(&self) -> bool {
        true
    }

    fn commit(&mut self) -> Result<(), StoreError>;

    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Scoped constraint relaxation on a [`CopyTarget`].
///
/// Opening relaxes the target; closing or dropping restores it exactly once.
pub struct ConstraintWindow<'a, T: CopyTarget> {
    target: &'a mut T,
    open: bool,
}

impl<'a, T: CopyTarget> ConstraintWindow<'a, T> {
    pub fn open(target: &'a mut T) -> Result<Self, StoreError> {
        if let Err(e) = target.relax() {
            // Put back whatever was already dropped
            if let Err(restore) = target.restore() {
                tracing::error!("Failed to restore constraints after relax error: {}", restore);
            }
            return Err(e);
        }
        tracing::info!("Constraint window opened");
        Ok(Self { target, open: true })
    }

    /// Restore the target, reporting failure to the caller
    pub fn close(mut self) -> Result<(), StoreError> {
        self.open = false;
        let result = self.target.restore();
        if result.is_ok() {
            tracing::info!("Constraint window closed");
        }
        result
    }
}

impl<T: CopyTarget> Deref for ConstraintWindow<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T: CopyTarget> DerefMut for ConstraintWindow<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: CopyTarget> Drop for ConstraintWindow<'_, T> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.target.restore() {
            Ok(()) => tracing::info!("Constraint window closed after an interrupted load"),
            Err(e) => tracing::error!("Failed to restore constraints: {}", e),
        }
    }
}

/// Row accounting for a bulk load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub rows_written: usize,
    /// Rows skipped because a required field was empty
    pub malformed: usize,
    /// Rows the target refused to write
    pub failed_rows: usize,
    /// Rows repeating a (repository, fingerprint) pair seen earlier in the run
    pub duplicates: usize,
    pub batches: usize,
    /// Batch commits that failed and were replayed
    pub retries: usize,
}

/// Streams commit rows into a target in fixed-size batches
pub struct BulkLoader<T: CopyTarget> {
    target: T,
    batch_size: usize,
    max_retries: usize,
}

impl<T: CopyTarget> BulkLoader<T> {
    pub fn new(target: T, batch_size: usize, max_retries: usize) -> Self {
        Self {
            target,
            batch_size: batch_size.max(1),
            max_retries,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    /// Load every row from `rows`.
    ///
    /// Constraints are relaxed for the duration of the call and restored on
    /// every exit path. A batch whose commit still fails after the configured
    /// retries aborts the load.
    pub fn run<I>(&mut self, rows: I) -> Result<BulkReport, StoreError>
    where
        I: IntoIterator<Item = CommitRow>,
    {
        let batch_size = self.batch_size;
        let max_retries = self.max_retries;
        let mut window = ConstraintWindow::open(&mut self.target)?;
        let mut report = BulkReport::default();
        let mut seen: HashSet<(i64, Fingerprint)> = HashSet::new();
        let mut batch: Vec<CommitRow> = Vec::with_capacity(batch_size);

        for row in rows {
            if !row.commit.is_well_formed() {
                tracing::warn!("Skipping malformed commit {:?}", row.commit.vcs_id);
                report.malformed += 1;
                continue;
            }
            if !seen.insert((row.repository_id, row.fingerprint)) {
                report.duplicates += 1;
                continue;
            }

            batch.push(row);
            if batch.len() >= batch_size {
                flush(&mut *window, &mut batch, &mut report, max_retries)?;
            }
        }

        if !batch.is_empty() {
            flush(&mut *window, &mut batch, &mut report, max_retries)?;
        }

        window.close()?;

        tracing::info!(
            "Bulk load wrote {} rows in {} batches ({} malformed, {} failed, {} duplicates)",
            report.rows_written,
            report.batches,
            report.malformed,
            report.failed_rows,
            report.duplicates
        );
        Ok(report)
    }
}

/// Write `batch` as one transaction, replaying it on commit failure
fn flush<T: CopyTarget>(
    target: &mut T,
    batch: &mut Vec<CommitRow>,
    report: &mut BulkReport,
    max_retries: usize,
) -> Result<(), StoreError> {
    let batch_number = report.batches + 1;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let mut written = 0;
        let mut failed = 0;

        let result = target.begin().and_then(|()| {
            for row in batch.iter() {
                match target.write_row(row) {
                    Ok(()) => written += 1,
                    // Rows after this point would land outside any batch
                    Err(e) if !target.in_batch() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Skipping commit {}: {}", row.commit.vcs_id, e);
                        failed += 1;
                    }
                }
            }
            target.commit()
        });

        match result {
            Ok(()) => {
                report.rows_written += written;
                report.failed_rows += failed;
                report.batches += 1;
                batch.clear();
                tracing::debug!("Committed batch {} ({} rows)", batch_number, written);
                return Ok(());
            }
            Err(e) => {
                if let Err(rollback) = target.rollback() {
                    tracing::warn!("Rollback of batch {} failed: {}", batch_number, rollback);
                }
                if attempts > max_retries {
                    return Err(StoreError::BatchFailed {
                        batch: batch_number,
                        attempts,
                        reason: e.to_string(),
                    });
                }
                report.retries += 1;
                tracing::warn!(
                    "Batch {} failed (attempt {}), replaying: {}",
                    batch_number,
                    attempts,
                    e
                );
            }
        }
    }
}

const COPY_COMMIT: &str = "INSERT INTO commits(
        repository_id, author_id, committer_id, hash, vcs_id, message,
        author_date, commit_date, file_changed_count, insertions_count, deletions_count)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

/// Bulk-copy target backed by the SQLite store.
///
/// Holds the schema lock exclusively for its whole lifetime.
pub struct SqliteCopyTarget {
    conn: Connection,
    _lock: SchemaLockGuard,
}

impl SqliteCopyTarget {
    pub fn open(store: &Store) -> Result<Self, StoreError> {
        let lock = SchemaLockGuard::try_acquire(store.path(), LockMode::Exclusive)?
            .ok_or_else(|| StoreError::LockBusy(store.path().display().to_string()))?;
        let conn = store.connect()?;
        Ok(Self { conn, _lock: lock })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl CopyTarget for SqliteCopyTarget {
    fn relax(&mut self) -> Result<(), StoreError> {
        // foreign_keys is a no-op inside a transaction, so set it first
        self.conn.pragma_update(None, "foreign_keys", false)?;
        schema::drop_commit_indexes(&self.conn)?;
        Ok(())
    }

    fn restore(&mut self) -> Result<(), StoreError> {
        let rebuilt = schema::create_commit_indexes(&self.conn);

        let orphans: rusqlite::Result<i64> = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_foreign_key_check('commits')",
            [],
            |row| row.get(0),
        );
        match orphans {
            Ok(0) => {}
            Ok(n) => tracing::warn!("{} commit rows reference missing rows", n),
            Err(e) => tracing::warn!("Foreign key check failed: {}", e),
        }

        let enforced = self.conn.pragma_update(None, "foreign_keys", true);

        rebuilt.map_err(|e| StoreError::RestoreFailed(e.to_string()))?;
        enforced.map_err(|e| StoreError::RestoreFailed(e.to_string()))?;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn write_row(&mut self, row: &CommitRow) -> Result<(), StoreError> {
        let commit = &row.commit;
        let mut stmt = self.conn.prepare_cached(COPY_COMMIT)?;
        stmt.execute(params![
            row.repository_id,
            row.author_id,
            row.committer_id,
            row.fingerprint.to_hex(),
            commit.vcs_id,
            commit.message,
            commit.author_date.to_rfc3339(),
            commit.commit_date.to_rfc3339(),
            commit.file_changed_count as i64,
            commit.insertions_count as i64,
            commit.deletions_count as i64,
        ])?;
        Ok(())
    }

    fn in_batch(&self) -> bool {
        // SQLite rolls the transaction back by itself on some errors
        !self.conn.is_autocommit()
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

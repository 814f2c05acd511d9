use super::{DiffRequest, DiffStats, HistoryBackend, HistoryHandle, NativeCommit, NativeDiff};
use crate::error::HistoryError;
use crate::types::{DeltaStatus, Developer, DiffDelta, VcsKind};
use chrono::{DateTime, FixedOffset};
use git2::{Delta, DiffFindOptions, DiffOptions, Oid, Patch, Repository, Signature, Sort};
use std::path::{Path, PathBuf};

/// Reads history through libgit2
#[derive(Debug, Clone, Copy, Default)]
pub struct GitBackend;

impl HistoryBackend for GitBackend {
    fn kind(&self) -> VcsKind {
        VcsKind::Git
    }

    fn open(&self, path: &Path) -> Result<Box<dyn HistoryHandle>, HistoryError> {
        Ok(Box::new(GitHandle::open(path)?))
    }
}

/// An open git repository
pub struct GitHandle {
    repo: Repository,
    path: PathBuf,
}

impl GitHandle {
    /// Open the repository whose `.git` directory lives under `path`
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let repo = Repository::open(path).map_err(|e| HistoryError::OpenFailed {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })?;

        tracing::debug!("Opened git repository at: {}", path.display());

        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn find_commit(&self, id: &str) -> Result<git2::Commit<'_>, HistoryError> {
        let oid = Oid::from_str(id).map_err(|e| commit_error(id, e))?;
        self.repo.find_commit(oid).map_err(|e| commit_error(id, e))
    }
}

impl HistoryHandle for GitHandle {
    fn clone_url(&self) -> Result<String, HistoryError> {
        if let Ok(remote) = self.repo.find_remote("origin")
            && let Some(url) = remote.url()
        {
            return Ok(url.to_string());
        }

        let names = self.repo.remotes().map_err(|e| HistoryError::OpenFailed {
            path: self.path.display().to_string(),
            reason: e.message().to_string(),
        })?;

        for name in names.iter().flatten() {
            if let Ok(remote) = self.repo.find_remote(name)
                && let Some(url) = remote.url()
            {
                return Ok(url.to_string());
            }
        }

        Err(HistoryError::NoCloneUrl)
    }

    fn active_reference(&self) -> Result<String, HistoryError> {
        let head = self
            .repo
            .find_reference("HEAD")
            .map_err(|e| walk_error("HEAD", e))?;

        match head.symbolic_target() {
            Some(target) => Ok(target
                .strip_prefix("refs/heads/")
                .unwrap_or(target)
                .to_string()),
            None => Err(HistoryError::DetachedHead),
        }
    }

    fn walk(&self, reference: &str) -> Result<Vec<String>, HistoryError> {
        let full_ref = if reference.starts_with("refs/") {
            reference.to_string()
        } else {
            format!("refs/heads/{}", reference)
        };

        let mut revwalk = self.repo.revwalk().map_err(|e| walk_error(reference, e))?;
        revwalk
            .set_sorting(Sort::TOPOLOGICAL)
            .map_err(|e| walk_error(reference, e))?;
        revwalk
            .push_ref(&full_ref)
            .map_err(|e| walk_error(reference, e))?;

        revwalk
            .map(|oid| oid.map(|oid| oid.to_string()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| walk_error(reference, e))
    }

    fn commit(&self, id: &str) -> Result<NativeCommit, HistoryError> {
        let commit = self.find_commit(id)?;
        let author = commit.author();
        let committer = commit.committer();

        let author_date = to_datetime(author.when()).ok_or_else(|| HistoryError::CommitFailed {
            id: id.to_string(),
            reason: "author timestamp out of range".to_string(),
        })?;
        let commit_date =
            to_datetime(committer.when()).ok_or_else(|| HistoryError::CommitFailed {
                id: id.to_string(),
                reason: "commit timestamp out of range".to_string(),
            })?;

        Ok(NativeCommit {
            id: commit.id().to_string(),
            message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
            author: developer(&author),
            committer: developer(&committer),
            author_date,
            commit_date,
            first_parent: commit.parent_id(0).ok().map(|oid| oid.to_string()),
        })
    }

    fn diff(
        &self,
        parent: &str,
        id: &str,
        request: DiffRequest,
    ) -> Result<NativeDiff, HistoryError> {
        let tree = self
            .find_commit(id)?
            .tree()
            .map_err(|e| diff_error(id, e))?;
        let parent_tree = self
            .find_commit(parent)?
            .tree()
            .map_err(|e| diff_error(id, e))?;

        let mut opts = DiffOptions::new();
        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&parent_tree), Some(&tree), Some(&mut opts))
            .map_err(|e| diff_error(id, e))?;

        if request.detect_renames {
            let mut find = DiffFindOptions::new();
            find.renames(true).copies(true);
            diff.find_similar(Some(&mut find))
                .map_err(|e| diff_error(id, e))?;
        }

        // Computing stats loads blob content, which settles the binary flags.
        let stats = diff.stats().map_err(|e| diff_error(id, e))?;
        let stats = DiffStats {
            files_changed: stats.files_changed(),
            insertions: stats.insertions(),
            deletions: stats.deletions(),
        };

        if !request.with_deltas {
            return Ok(NativeDiff {
                stats,
                deltas: Vec::new(),
            });
        }

        let mut deltas = Vec::with_capacity(diff.deltas().len());
        for (idx, delta) in diff.deltas().enumerate() {
            let mut binary = delta.flags().is_binary();
            let patch = if request.with_patches {
                match Patch::from_diff(&diff, idx).map_err(|e| diff_error(id, e))? {
                    Some(mut patch) => {
                        binary |= patch.delta().flags().is_binary();
                        let buf = patch.to_buf().map_err(|e| diff_error(id, e))?;
                        Some(String::from_utf8_lossy(&buf).into_owned())
                    }
                    None => None,
                }
            } else {
                None
            };

            deltas.push(DiffDelta {
                status: map_status(delta.status()),
                binary,
                // libgit2 does not surface the similarity score
                similarity: None,
                old_file_path: delta
                    .old_file()
                    .path()
                    .map(|p| p.to_string_lossy().into_owned()),
                new_file_path: delta
                    .new_file()
                    .path()
                    .map(|p| p.to_string_lossy().into_owned()),
                patch,
            });
        }

        Ok(NativeDiff { stats, deltas })
    }
}

fn map_status(status: Delta) -> DeltaStatus {
    match status {
        Delta::Added => DeltaStatus::Added,
        Delta::Deleted => DeltaStatus::Deleted,
        Delta::Modified => DeltaStatus::Modified,
        Delta::Renamed => DeltaStatus::Renamed,
        Delta::Copied => DeltaStatus::Copied,
        _ => DeltaStatus::Unclassified,
    }
}

fn developer(signature: &Signature<'_>) -> Developer {
    Developer {
        name: String::from_utf8_lossy(signature.name_bytes()).into_owned(),
        email: String::from_utf8_lossy(signature.email_bytes()).into_owned(),
    }
}

/// Convert a git timestamp, keeping the offset it was recorded with
fn to_datetime(time: git2::Time) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60)?;
    DateTime::from_timestamp(time.seconds(), 0).map(|utc| utc.with_timezone(&offset))
}

fn walk_error(reference: &str, err: git2::Error) -> HistoryError {
    HistoryError::WalkFailed {
        reference: reference.to_string(),
        reason: err.message().to_string(),
    }
}

fn commit_error(id: &str, err: git2::Error) -> HistoryError {
    HistoryError::CommitFailed {
        id: id.to_string(),
        reason: err.message().to_string(),
    }
}

fn diff_error(id: &str, err: git2::Error) -> HistoryError {
    HistoryError::DiffFailed {
        id: id.to_string(),
        reason: err.message().to_string(),
    }
}

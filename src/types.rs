//! Canonical records produced by history extraction
//!
//! These types are what the loaders persist and what the `export` command
//! serializes as a JSON document.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Version-control systems the detector can recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
    Mercurial,
    Subversion,
    Bazaar,
    Cvs,
}

impl VcsKind {
    /// Every kind, in detection order
    pub const ALL: [VcsKind; 5] = [
        VcsKind::Git,
        VcsKind::Mercurial,
        VcsKind::Subversion,
        VcsKind::Bazaar,
        VcsKind::Cvs,
    ];

    /// Name of the metadata directory at the root of a working tree
    pub fn metadata_dir(&self) -> &'static str {
        match self {
            VcsKind::Git => ".git",
            VcsKind::Mercurial => ".hg",
            VcsKind::Subversion => ".svn",
            VcsKind::Bazaar => ".bzr",
            VcsKind::Cvs => "CVS",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Mercurial => "mercurial",
            VcsKind::Subversion => "subversion",
            VcsKind::Bazaar => "bazaar",
            VcsKind::Cvs => "cvs",
        }
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source code repository and the commits of its active branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Final path component of the clone path
    pub name: String,
    pub vcs: VcsKind,
    /// URL the repository was cloned from; the global identity key
    pub clone_url: String,
    /// Where the working tree lives (for archives, the archive path without
    /// its extension)
    pub clone_path: PathBuf,
    /// Branch HEAD pointed to when history was extracted
    pub default_branch: String,
    /// Commits in traversal order
    #[serde(default)]
    pub commits: Vec<Commit>,
}

/// Someone who authored or committed a change
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Developer {
    pub name: String,
    pub email: String,
}

impl Developer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.email.is_empty()
    }
}

/// A commit normalized from the VCS backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    /// Identifier assigned by the VCS (the SHA for git)
    pub vcs_id: String,
    pub message: String,
    pub author: Developer,
    pub committer: Developer,
    pub author_date: DateTime<FixedOffset>,
    pub commit_date: DateTime<FixedOffset>,
    /// Per-file changes; only present when delta fetching is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_delta: Option<Vec<DiffDelta>>,
    pub file_changed_count: usize,
    pub insertions_count: usize,
    pub deletions_count: usize,
}

impl Commit {
    /// Whether every identifying field is present.
    ///
    /// Strings coming out of the backend are already valid UTF-8 (lossy
    /// conversion happens at extraction), so only emptiness is checked.
    pub fn is_well_formed(&self) -> bool {
        !self.vcs_id.is_empty()
            && !self.message.is_empty()
            && self.author.is_well_formed()
            && self.committer.is_well_formed()
    }
}

/// Status of a file touched by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    /// Unmodified, ignored, untracked, type changes and anything else the
    /// backend reports
    Unclassified,
}

impl DeltaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaStatus::Added => "added",
            DeltaStatus::Deleted => "deleted",
            DeltaStatus::Modified => "modified",
            DeltaStatus::Renamed => "renamed",
            DeltaStatus::Copied => "copied",
            DeltaStatus::Unclassified => "unclassified",
        }
    }
}

/// Change to a single file between a commit and its first parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffDelta {
    pub status: DeltaStatus,
    pub binary: bool,
    /// 0-100, only meaningful for renames and copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

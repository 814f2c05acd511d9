//! Content fingerprints for commits
//!
//! The hex form is stored in `commits.hash` and, with the repository id,
//! identifies a commit across runs.

use crate::types::Commit;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest identifying a commit's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Lowercase hex rendering, 64 characters
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Compute the fingerprint of a commit.
///
/// Every field is written as a little-endian u64 length followed by its
/// bytes, so no two distinct field sequences share an encoding.
pub fn fingerprint(commit: &Commit) -> Fingerprint {
    let mut hasher = Sha256::new();

    let author_date = render_date(&commit.author_date);
    let commit_date = render_date(&commit.commit_date);
    let files_changed = commit.file_changed_count.to_string();
    let insertions = commit.insertions_count.to_string();
    let deletions = commit.deletions_count.to_string();

    let fields: [&str; 11] = [
        &commit.vcs_id,
        &commit.message,
        &commit.author.name,
        &commit.author.email,
        &commit.committer.name,
        &commit.committer.email,
        &author_date,
        &commit_date,
        &files_changed,
        &insertions,
        &deletions,
    ];

    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }

    Fingerprint(hasher.finalize().into())
}

fn render_date(date: &DateTime<FixedOffset>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, false)
}

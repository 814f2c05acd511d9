//! Structural discovery of candidate repositories under a root directory

use crate::error::LocateError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::{DirEntry, WalkDir};

/// File extension of packed repositories
pub const ARCHIVE_EXTENSION: &str = "tar";

/// Lazily yields candidate repository paths found `depth` levels below the
/// root.
///
/// At the frontier every subdirectory and every `.tar` regular file is a
/// candidate. Above it only directories are descended into. Symbolic links
/// are never followed and siblings are visited in file-name order.
pub struct Locator {
    root: PathBuf,
    depth: usize,
    entries: walkdir::IntoIter,
    cancelled: Option<Arc<AtomicBool>>,
}

impl Locator {
    pub fn new(root: impl AsRef<Path>, depth: usize) -> Self {
        let root = root.as_ref().to_path_buf();
        let frontier = depth + 1;
        let entries = WalkDir::new(&root)
            .min_depth(frontier)
            .max_depth(frontier)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Self {
            root,
            depth,
            entries,
            cancelled: None,
        }
    }

    /// Stop yielding candidates once `cancelled` is set
    pub fn with_cancellation_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(cancelled);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Iterator for Locator {
    type Item = Result<PathBuf, LocateError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.is_cancelled() {
                tracing::debug!("Locator under {} cancelled", self.root.display());
                return None;
            }

            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .unwrap_or(&self.root)
                        .display()
                        .to_string();
                    return Some(Err(LocateError::Unreadable {
                        path,
                        reason: err.to_string(),
                    }));
                }
            };

            if is_candidate(&entry) {
                return Some(Ok(entry.into_path()));
            }
            tracing::debug!("Not a candidate: {}", entry.path().display());
        }
    }
}

fn is_candidate(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    file_type.is_dir() || (file_type.is_file() && is_archive(entry.path()))
}

/// Whether `path` names a packed repository
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == ARCHIVE_EXTENSION)
}

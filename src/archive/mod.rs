//! Turns candidate paths into on-disk history roots
//!
//! Working directories are used in place. Small enough `.tar` archives have
//! only their VCS metadata subtree unpacked into a scratch directory; larger
//! ones are assumed to have been unpacked next to the archive already.

use crate::config::ScratchConfig;
use crate::detect::detect_archive;
use crate::error::ArchiveError;
use crate::locator::is_archive;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

/// Bytes in a (decimal) gigabyte
pub const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Prefix of every scratch directory this crate creates
pub const SCRATCH_PREFIX: &str = "vcs-ingest-";

/// A candidate ready for detection and history extraction
#[derive(Debug)]
pub struct Materialized {
    /// Directory whose root holds the VCS metadata
    pub history_root: PathBuf,
    /// Path reported as the repository's clone path
    pub clone_path: PathBuf,
    /// Final component of the clone path
    pub name: String,
    scratch: Option<TempDir>,
}

impl Materialized {
    /// Whether the history root is a scratch directory owned by this value
    pub fn is_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Remove the scratch directory now, surfacing any I/O error.
    ///
    /// Dropping the value removes it too, silently.
    pub fn cleanup(self) -> io::Result<()> {
        match self.scratch {
            Some(scratch) => scratch.close(),
            None => Ok(()),
        }
    }
}

/// Applies the scratch size policy to candidate paths
#[derive(Debug, Clone)]
pub struct Materializer {
    scratch_dir: PathBuf,
    limit_gb: f64,
}

impl Materializer {
    pub fn new(scratch_dir: impl Into<PathBuf>, limit_gb: f64) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            limit_gb,
        }
    }

    pub fn from_config(config: &ScratchConfig) -> Self {
        Self::new(config.dir.clone(), config.effective_limit_gb())
    }

    pub fn materialize(&self, path: &Path) -> Result<Materialized, ArchiveError> {
        if !is_archive(path) {
            return Ok(Materialized {
                history_root: path.to_path_buf(),
                clone_path: path.to_path_buf(),
                name: final_component(path),
                scratch: None,
            });
        }

        let clone_path = path.with_extension("");
        let name = final_component(&clone_path);

        let size = fs::metadata(path)
            .map_err(|e| ArchiveError::OpenFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .len();
        let size_gb = size as f64 / BYTES_PER_GB;

        if size_gb > self.limit_gb {
            tracing::debug!(
                "Archive {} is {:.3} GB (limit {} GB), using {}",
                path.display(),
                size_gb,
                self.limit_gb,
                clone_path.display()
            );
            return Ok(Materialized {
                history_root: clone_path.clone(),
                clone_path,
                name,
                scratch: None,
            });
        }

        let kind = detect_archive(path)
            .map_err(|e| ArchiveError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| ArchiveError::NotRecognized(path.display().to_string()))?;

        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_dir)
            .map_err(|e| ArchiveError::ScratchFailed {
                dir: self.scratch_dir.display().to_string(),
                reason: e.to_string(),
            })?;

        // On error `scratch` is dropped here, taking partial output with it.
        let extracted = extract_subtree(path, &name, kind.metadata_dir(), scratch.path())?;

        tracing::debug!(
            "Extracted {} {} entries from {} into {}",
            extracted,
            kind,
            path.display(),
            scratch.path().display()
        );

        Ok(Materialized {
            history_root: scratch.path().to_path_buf(),
            clone_path,
            name,
            scratch: Some(scratch),
        })
    }
}

fn final_component(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Unpack entries under `<root>/<subtree>` into `dest`, dropping `<root>`.
/// Returns the number of entries written.
fn extract_subtree(
    archive_path: &Path,
    root: &str,
    subtree: &str,
    dest: &Path,
) -> Result<usize, ArchiveError> {
    let read_error = |e: io::Error| ArchiveError::ReadFailed {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    };

    let file = File::open(archive_path).map_err(|e| ArchiveError::OpenFailed {
        path: archive_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut archive = tar::Archive::new(file);
    let mut written = 0;

    for entry in archive.entries().map_err(read_error)? {
        let mut entry = entry.map_err(read_error)?;
        let entry_path = entry.path().map_err(read_error)?.into_owned();

        let Some(relative) = subtree_relative(&entry_path, root, subtree)? else {
            continue;
        };
        ensure_no_symlinks(dest, &relative)?;
        let target = dest.join(&relative);
        let write_error = |e: io::Error| ArchiveError::WriteFailed {
            entry: entry_path.display().to_string(),
            reason: e.to_string(),
        };

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(write_error)?;
        } else if entry_type.is_symlink() || entry_type.is_file() || entry_type.is_contiguous() {
            create_parent(&target).map_err(write_error)?;
            // Replaces whatever an earlier entry left at `target`
            entry.unpack(&target).map_err(write_error)?;
        } else {
            tracing::debug!("Skipping {:?} entry {}", entry_type, entry_path.display());
            continue;
        }
        written += 1;
    }

    Ok(written)
}

/// Path of `entry_path` relative to `<root>`, if it lies under
/// `<root>/<subtree>`. Absolute entries and `..` components are rejected.
fn subtree_relative(
    entry_path: &Path,
    root: &str,
    subtree: &str,
) -> Result<Option<PathBuf>, ArchiveError> {
    let mut components = Vec::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => components.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafeEntry(entry_path.display().to_string()));
            }
        }
    }

    match components.as_slice() {
        [first, second, ..] if *first == root && *second == subtree => {
            Ok(Some(components[1..].iter().collect()))
        }
        _ => Ok(None),
    }
}

/// Refuse to write through a symlink created by an earlier entry.
///
/// Only directories are checked; a link at the final component is replaced
/// by the entry rather than followed.
fn ensure_no_symlinks(dest: &Path, relative: &Path) -> Result<(), ArchiveError> {
    let mut current = dest.to_path_buf();
    let mut components = relative.components().peekable();

    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if let Ok(meta) = fs::symlink_metadata(&current)
            && meta.file_type().is_symlink()
        {
            return Err(ArchiveError::UnsafeEntry(relative.display().to_string()));
        }
    }
    Ok(())
}

fn create_parent(target: &Path) -> io::Result<()> {
    match target.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests;

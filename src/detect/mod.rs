//! Structural VCS detection
//!
//! Only the name of the metadata directory at the root of a candidate
//! matters; repository internals are never opened here.

use crate::types::VcsKind;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Component, Path};

/// Classify a working directory by its root-level metadata directory
pub fn detect_dir(path: &Path) -> Option<VcsKind> {
    VcsKind::ALL
        .into_iter()
        .find(|kind| path.join(kind.metadata_dir()).is_dir())
}

/// Classify a tar archive by scanning its entry list for
/// `<root>/<metadata-dir>` directory entries, where `<root>` is the archive's
/// file name without `.tar`
pub fn detect_archive(path: &Path) -> io::Result<Option<VcsKind>> {
    let Some(root) = path.file_stem() else {
        return Ok(None);
    };
    let file = File::open(path)?;
    let mut archive = tar::Archive::new(file);

    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_dir() {
            continue;
        }
        let entry_path = entry.path()?;
        if let Some(kind) = metadata_kind(&entry_path, root) {
            return Ok(Some(kind));
        }
    }

    Ok(None)
}

/// Recognize `<root>/<metadata-dir>` (trailing separator ignored)
pub(crate) fn metadata_kind(entry_path: &Path, root: &OsStr) -> Option<VcsKind> {
    let mut components = entry_path
        .components()
        .filter(|c| !matches!(c, Component::CurDir));

    if components.next()?.as_os_str() != root {
        return None;
    }
    let name = components.next()?;
    if components.next().is_some() {
        return None;
    }

    VcsKind::ALL
        .into_iter()
        .find(|kind| name.as_os_str() == kind.metadata_dir())
}

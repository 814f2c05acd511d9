//! JSON documents describing extracted repositories

use crate::error::IngestError;
use crate::types::Repository;
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Key under which a repository is embedded in an analysis document
pub const REPO_KEY: &str = "repo";

/// Source name that reads the analysis document from standard input
pub const STDIN_SOURCE: &str = "stdin";

/// Read an analysis document from a file, or from standard input when
/// `source` is `stdin`
pub fn read_analysis(source: &str) -> Result<Value, IngestError> {
    let raw = if source == STDIN_SOURCE {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(source)?
    };
    Ok(serde_json::from_str(&raw)?)
}

/// Embed `repo` into `analysis` under the `repo` key, replacing any
/// existing value
pub fn merge_into_analysis(mut analysis: Value, repo: &Repository) -> Result<Value, IngestError> {
    let Some(object) = analysis.as_object_mut() else {
        return Err(IngestError::other(
            "analysis document must be a JSON object",
        ));
    };
    object.insert(REPO_KEY.to_string(), serde_json::to_value(repo)?);
    Ok(analysis)
}

/// Document path for a repository cloned at `clone_path`, relative to the
/// output directory.
///
/// Mirrors the layout below `root`: `alice/parser` maps to
/// `alice/parser.json`. A clone path outside `root` falls back to its final
/// component.
pub fn document_path(root: &Path, clone_path: &Path) -> PathBuf {
    let relative = match clone_path.strip_prefix(root) {
        Ok(relative) if relative.components().next().is_some() => relative.to_path_buf(),
        _ => clone_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("repository")),
    };
    let mut file = relative.into_os_string();
    file.push(".json");
    PathBuf::from(file)
}

/// Write `repo` to `<out_dir>/<relative>` and return the file path
pub fn write_document(
    out_dir: &Path,
    relative: &Path,
    repo: &Repository,
) -> Result<PathBuf, IngestError> {
    let path = out_dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(repo)?;
    fs::write(&path, json)?;
    tracing::debug!("Wrote {}", path.display());
    Ok(path)
}

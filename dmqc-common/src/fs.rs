//! File-system helpers for QC artifacts
//!
//! Artifacts whose mere existence marks work as done are written atomically:
//! content goes to `<name>.tmp` in the same directory and is renamed over the
//! target only after a successful flush.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Result;

/// Temporary sibling path used while writing `target`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write `contents` to `target` via temp file + rename
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    let temp = temp_path_for(target);

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    Ok(result?)
}

/// Create `dir` (and parents) if missing
pub fn define_folder(dir: &Path) -> Result<&Path> {
    if !dir.is_dir() {
        fs::create_dir_all(dir)?;
        tracing::debug!(path = %dir.display(), "Created folder");
    }
    Ok(dir)
}

/// Remove zero-byte files directly inside `dir`, returning what was removed
///
/// A tool killed mid-write can leave an empty artifact behind that would
/// otherwise satisfy a presence check.
pub fn remove_empty_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() && metadata.len() == 0 {
            let path = entry.path();
            fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "Removed empty file");
            removed.push(path);
        }
    }
    Ok(removed)
}

/// True when `dir` exists and holds at least one entry
pub fn dir_has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

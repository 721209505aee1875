//! Technologist notes lookup
//!
//! Notes are PDFs stored with each session's resources. All repeat sessions of
//! a subject are searched so the report can link every one of them.

use std::path::{Path, PathBuf};

use dmqc_common::ScanId;
use walkdir::WalkDir;

/// A notes PDF and the repeat session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechNote {
    pub session: String,
    pub path: PathBuf,
}

/// Notes for every session folder `<resources_root>/<full_id>*`
///
/// Folders without a repeat number are skipped.
pub fn find_all_tech_notes(resources_root: &Path, id: &ScanId) -> Vec<TechNote> {
    let prefix = id.full_id();

    let mut folders: Vec<(String, PathBuf)> = match std::fs::read_dir(resources_root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
            .filter(|(name, path)| name.starts_with(&prefix) && path.is_dir())
            .collect(),
        Err(e) => {
            tracing::debug!(path = %resources_root.display(), "Cannot read resources: {}", e);
            return Vec::new();
        }
    };
    folders.sort();

    folders
        .into_iter()
        .filter_map(|(name, path)| {
            let session = ScanId::parse(&name).ok()?.session?;
            let notes = find_tech_notes(&path)?;
            Some(TechNote {
                session,
                path: notes,
            })
        })
        .collect()
}

/// First PDF under `dir`, unless several exist and one is named "technotes"
pub fn find_tech_notes(dir: &Path) -> Option<PathBuf> {
    let pdfs: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().contains(".pdf"))
        .map(|e| e.into_path())
        .collect();

    if pdfs.len() > 1 {
        let named = pdfs.iter().find(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains("technotes"))
                .unwrap_or(false)
        });
        if let Some(named) = named {
            return Some(named.clone());
        }
    }

    pdfs.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_prefers_technotes_name() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("scans")).unwrap();
        fs::write(dir.path().join("a_protocol.pdf"), "x").unwrap();
        fs::write(dir.path().join("scans/CMH_TechNotes.pdf"), "x").unwrap();

        assert_eq!(
            find_tech_notes(dir.path()),
            Some(dir.path().join("scans/CMH_TechNotes.pdf"))
        );
    }

    #[test]
    fn test_single_pdf_is_used() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("scan.pdf"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(find_tech_notes(dir.path()), Some(dir.path().join("scan.pdf")));
    }

    #[test]
    fn test_all_sessions_are_searched() {
        let dir = TempDir::new().unwrap();
        for session in ["SPN01_CMH_0001_01_01", "SPN01_CMH_0001_01_02"] {
            let folder = dir.path().join(session);
            fs::create_dir_all(&folder).unwrap();
            fs::write(folder.join("technotes.pdf"), "x").unwrap();
        }
        // no repeat number
        fs::create_dir_all(dir.path().join("SPN01_CMH_0001_01")).unwrap();
        fs::write(dir.path().join("SPN01_CMH_0001_01/technotes.pdf"), "x").unwrap();
        fs::create_dir_all(dir.path().join("SPN01_CMH_0002_01_01")).unwrap();

        let id = ScanId::parse("SPN01_CMH_0001_01_01").unwrap();
        let notes = find_all_tech_notes(dir.path(), &id);

        let sessions: Vec<&str> = notes.iter().map(|n| n.session.as_str()).collect();
        assert_eq!(sessions, vec!["01", "02"]);
    }

    #[test]
    fn test_missing_resources_root() {
        let id = ScanId::parse("SPN01_CMH_0001_01_01").unwrap();
        assert!(find_all_tech_notes(Path::new("/does/not/exist"), &id).is_empty());
    }
}

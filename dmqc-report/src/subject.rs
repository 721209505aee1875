//! Subject sessions and their acquired files
//!
//! A [`Subject`] is built fresh for every invocation by listing the session's
//! `nii` and `dcm` folders. Nothing is cached between runs.

use std::path::{Path, PathBuf};

use dmqc_common::config::{PathRole, StudyConfig};
use dmqc_common::{ScanFileName, ScanId};
use walkdir::WalkDir;

use crate::error::QcResult;

const NIFTI_EXTENSIONS: [&str; 2] = [".nii.gz", ".nii"];
const DICOM_EXTENSION: &str = ".dcm";

/// One acquired series file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFile {
    pub path: PathBuf,
    /// Scan type code
    pub tag: String,
    /// Acquisition sequence number
    pub series: u32,
    /// File name without extension
    pub base_name: String,
}

impl AcquiredFile {
    /// Build from a path whose file name follows the datman convention
    pub fn from_path(path: &Path) -> dmqc_common::Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = ScanFileName::parse(&file_name)?;

        Ok(Self {
            path: path.to_path_buf(),
            tag: parsed.tag.clone(),
            series: parsed.series,
            base_name: parsed.stem().to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path next to this file with the same base name and another extension
    pub fn sibling(&self, ext: &str) -> PathBuf {
        self.path
            .with_file_name(format!("{}{}", self.base_name, ext))
    }
}

/// One session's identity, locations and discovered files
#[derive(Debug, Clone)]
pub struct Subject {
    pub id: ScanId,
    /// Session folder name, e.g. `SPN01_CMH_0001_01_01`
    pub name: String,
    pub nii_path: PathBuf,
    pub dcm_path: PathBuf,
    pub qc_path: PathBuf,
    /// Root holding every session's resources, if the study defines one
    pub resources_root: Option<PathBuf>,
    pub niftis: Vec<AcquiredFile>,
    pub dicoms: Vec<AcquiredFile>,
}

impl Subject {
    /// Resolve the session's folders without touching the file system
    pub fn new(identifier: &str, config: &StudyConfig) -> QcResult<Self> {
        let id = ScanId::parse(identifier)?;
        let name = id.to_string();

        Ok(Self {
            nii_path: config.path(PathRole::Nii)?.join(&name),
            dcm_path: config.path(PathRole::Dcm)?.join(&name),
            qc_path: config.path(PathRole::Qc)?.join(&name),
            resources_root: config
                .path(PathRole::Resources)
                .ok()
                .map(Path::to_path_buf),
            id,
            name,
            niftis: Vec::new(),
            dicoms: Vec::new(),
        })
    }

    pub fn is_phantom(&self) -> bool {
        self.id.is_phantom()
    }

    pub fn site(&self) -> &str {
        &self.id.site
    }

    pub fn full_id(&self) -> String {
        self.id.full_id()
    }

    /// `qc_<full_id>.html` inside the QC folder
    pub fn report_path(&self) -> PathBuf {
        self.qc_path.join(report_file_name(&self.full_id()))
    }

    pub fn header_diff_path(&self) -> PathBuf {
        self.qc_path.join("header-diff.log")
    }

    /// List the `nii` and `dcm` folders
    pub fn scan_files(&mut self) {
        self.niftis = list_series(&self.nii_path, &NIFTI_EXTENSIONS);
        self.dicoms = list_series(&self.dcm_path, &[DICOM_EXTENSION]);
        tracing::debug!(
            subject = %self.name,
            niftis = self.niftis.len(),
            dicoms = self.dicoms.len(),
            "Scanned session folders"
        );
    }

    pub fn tagged_niftis<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a AcquiredFile> {
        self.niftis.iter().filter(move |f| f.tag == tag)
    }

    /// Matching `.dcm` header for a nifti
    pub fn dicom_for(&self, nifti: &AcquiredFile) -> PathBuf {
        self.dcm_path
            .join(format!("{}{}", nifti.base_name, DICOM_EXTENSION))
    }
}

/// Report file name for a subject's full identifier
pub fn report_file_name(full_id: &str) -> String {
    format!("qc_{}.html", full_id)
}

fn list_series(dir: &Path, extensions: &[&str]) -> Vec<AcquiredFile> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !extensions.iter().any(|ext| name.ends_with(ext)) {
            continue;
        }

        match AcquiredFile::from_path(entry.path()) {
            Ok(file) => files.push(file),
            Err(e) => tracing::warn!(path = %entry.path().display(), "Skipping misnamed file: {}", e),
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> StudyConfig {
        let toml = format!(
            "[paths]\ndcm = \"{0}/dcm\"\nnii = \"{0}/nii\"\nqc = \"{0}/qc\"\nstd = \"{0}/std\"\nlog = \"{0}/log\"\nmeta = \"{0}/meta\"\n",
            root.display()
        );
        StudyConfig::from_toml_str(&toml, "SPN01").unwrap()
    }

    #[test]
    fn test_acquired_file_from_path() {
        let file = AcquiredFile::from_path(Path::new(
            "/nii/SPN01_CMH_0001_01_01/SPN01_CMH_0001_01_01_DTI60_05_Ax-DTI.nii.gz",
        ))
        .unwrap();
        assert_eq!(file.tag, "DTI60");
        assert_eq!(file.series, 5);
        assert_eq!(file.base_name, "SPN01_CMH_0001_01_01_DTI60_05_Ax-DTI");
        assert_eq!(
            file.sibling(".bvec"),
            PathBuf::from("/nii/SPN01_CMH_0001_01_01/SPN01_CMH_0001_01_01_DTI60_05_Ax-DTI.bvec")
        );
    }

    #[test]
    fn test_subject_paths() {
        let dir = TempDir::new().unwrap();
        let config = config_for(dir.path());
        let subject = Subject::new("SPN01_CMH_0001_01_01", &config).unwrap();

        assert!(!subject.is_phantom());
        assert_eq!(subject.site(), "CMH");
        assert_eq!(subject.nii_path, dir.path().join("nii/SPN01_CMH_0001_01_01"));
        assert_eq!(
            subject.report_path(),
            dir.path().join("qc/SPN01_CMH_0001_01_01/qc_SPN01_CMH_0001_01.html")
        );
        assert_eq!(subject.resources_root, None);
    }

    #[test]
    fn test_subject_rejects_bad_identifier() {
        let dir = TempDir::new().unwrap();
        let config = config_for(dir.path());
        assert!(Subject::new("not-a-session", &config).is_err());
    }

    #[test]
    fn test_scan_files_filters_by_extension_and_name() {
        let dir = TempDir::new().unwrap();
        let config = config_for(dir.path());
        let mut subject = Subject::new("SPN01_CMH_0001_01_01", &config).unwrap();
        fs::create_dir_all(&subject.nii_path).unwrap();
        fs::create_dir_all(&subject.dcm_path).unwrap();

        for name in [
            "SPN01_CMH_0001_01_01_T1_02_SagT1.nii.gz",
            "SPN01_CMH_0001_01_01_DTI60_05_Ax-DTI.nii.gz",
            "SPN01_CMH_0001_01_01_DTI60_05_Ax-DTI.bvec",
            "garbage.nii.gz",
        ] {
            fs::write(subject.nii_path.join(name), "x").unwrap();
        }
        fs::write(
            subject.dcm_path.join("SPN01_CMH_0001_01_01_T1_02_SagT1.dcm"),
            "x",
        )
        .unwrap();

        subject.scan_files();

        let tags: Vec<&str> = subject.niftis.iter().map(|f| f.tag.as_str()).collect();
        assert_eq!(tags, vec!["DTI60", "T1"]);
        assert_eq!(subject.dicoms.len(), 1);
        assert_eq!(subject.tagged_niftis("T1").count(), 1);
        assert_eq!(
            subject.dicom_for(&subject.niftis[1]),
            subject.dcm_path.join("SPN01_CMH_0001_01_01_T1_02_SagT1.dcm")
        );
    }

    #[test]
    fn test_scan_missing_folders_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_for(dir.path());
        let mut subject = Subject::new("SPN01_CMH_PHA_FBN0001", &config).unwrap();
        subject.scan_files();
        assert!(subject.is_phantom());
        assert!(subject.niftis.is_empty());
    }
}

//! Gold-standard DICOM header comparison
//!
//! Each subject dicom is compared against the site's gold standard for its tag
//! by the external `qc-headers` tool, which appends differences to the
//! session's `header-diff.log`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dmqc_common::config::ExpectedSchedule;
use dmqc_common::{QcStrategy, ScanFileName};

use crate::services::command_runner::{shell_join, CommandRunner};
use crate::subject::Subject;

/// Gold standards for one site, keyed by tag
pub fn load_standards(std_dir: &Path, site: &str) -> HashMap<String, PathBuf> {
    let mut standards = HashMap::new();
    let mut misnamed = Vec::new();

    let mut entries: Vec<PathBuf> = match std::fs::read_dir(std_dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            tracing::warn!(path = %std_dir.display(), "Cannot read standards folder: {}", e);
            return standards;
        }
    };
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // .bvec/.bval files share the naming scheme but are not headers
        if !name.contains(".dcm") {
            continue;
        }

        match ScanFileName::parse(&name) {
            Ok(parsed) if parsed.id.site == site => {
                standards.insert(parsed.tag, path);
            }
            Ok(_) => {}
            Err(_) => misnamed.push(path.display().to_string()),
        }
    }

    if !misnamed.is_empty() {
        tracing::error!("Standards files misnamed, ignoring:\n{}", misnamed.join("\n"));
    }

    standards
}

/// Compare every dicom that has a standard, appending to `log_file`
pub async fn run_header_qc(
    subject: &Subject,
    std_dir: &Path,
    log_file: &Path,
    schedule: &ExpectedSchedule,
    runner: &dyn CommandRunner,
) {
    if subject.dicoms.is_empty() {
        tracing::debug!(path = %subject.dcm_path.display(), "No dicoms found");
        return;
    }

    let standards = load_standards(std_dir, subject.site());

    for dicom in &subject.dicoms {
        let Some(standard) = standards.get(&dicom.tag) else {
            tracing::debug!(tag = %dicom.tag, "No standard found for tag");
            continue;
        };

        let is_dti = schedule
            .get(&dicom.tag)
            .and_then(|spec| spec.qc_type)
            .is_some_and(|strategy| strategy == QcStrategy::Dti);

        let mut argv = vec![
            "qc-headers".to_string(),
            dicom.path.display().to_string(),
            standard.display().to_string(),
            log_file.display().to_string(),
        ];
        if is_dti {
            argv.push("--dti".to_string());
        }

        tracing::debug!(tag = %dicom.tag, dti = is_dti, "Comparing header");
        match runner.run(&shell_join(&argv)).await {
            Ok(out) if !out.success() => {
                tracing::error!(file = %dicom.file_name(), status = out.status, "qc-headers failed: {}", out.output.trim());
            }
            Ok(_) => {}
            Err(e) => tracing::error!(file = %dicom.file_name(), "Failed to launch qc-headers: {}", e),
        }
    }

    if !log_file.exists() {
        tracing::error!(
            subject = %subject.full_id(),
            "header-diff.log not generated. Check that gold standards are present for this site."
        );
    }
}

/// Log lines mentioning `file_stem`, with the leading `<field>:` stripped
pub fn header_differences(log_file: &Path, file_stem: &str) -> Vec<String> {
    let content = match std::fs::read_to_string(log_file) {
        Ok(content) => content,
        Err(_) => {
            tracing::info!("header-diff.log not found. Generating page without it.");
            return Vec::new();
        }
    };

    content
        .lines()
        .filter(|line| line.contains(file_stem))
        .map(|line| match line.split_once(':') {
            Some((_, rest)) => rest.trim_start_matches(' ').to_string(),
            None => line.to_string(),
        })
        .collect()
}

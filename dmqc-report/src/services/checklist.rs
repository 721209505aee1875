//! Study checklist bookkeeping
//!
//! `<meta>/checklist.csv` holds one line per generated report. Reviewers add
//! their sign-off after the report name on the same line.

use std::path::Path;

use dmqc_common::fs::write_atomic;

use crate::error::QcResult;
use crate::subject::report_file_name;

pub const CHECKLIST_FILE: &str = "checklist.csv";

/// Add the subject's report to the checklist if it is not listed yet
///
/// Returns whether a line was added.
pub fn update_checklist(meta_dir: &Path, full_id: &str) -> QcResult<bool> {
    let checklist = meta_dir.join(CHECKLIST_FILE);
    let entry = report_file_name(full_id);

    let mut content = match std::fs::read_to_string(&checklist) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let listed = content
        .lines()
        .any(|line| line.split_whitespace().next() == Some(entry.as_str()));
    if listed {
        tracing::debug!(subject = %full_id, "Already in checklist");
        return Ok(false);
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&entry);
    content.push('\n');

    write_atomic(&checklist, content.as_bytes())?;
    tracing::info!(subject = %full_id, "Added to checklist");
    Ok(true)
}

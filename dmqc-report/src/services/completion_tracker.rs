//! Decides which sessions still need QC
//!
//! The population is every folder under the `nii` root. A human session is
//! finished once `qc_<full_id>.html` exists in its QC folder; a phantom once
//! its QC folder has content. The dashboard can reopen a finished session when
//! a repeat session has arrived since the report was written.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dmqc_common::config::{PathRole, PhantomCompletion, StudyConfig};
use dmqc_common::fs::dir_has_entries;
use dmqc_common::ScanId;

use crate::error::QcResult;
use crate::services::dashboard::Dashboard;
use crate::subject::report_file_name;

/// Phantom session names carry `_PHA_`
pub fn is_phantom_name(name: &str) -> bool {
    name.contains("_PHA_")
}

/// Read-only view over the `nii` and `qc` roots
pub struct CompletionTracker {
    nii_root: PathBuf,
    qc_root: PathBuf,
    phantom_completion: PhantomCompletion,
    dashboard: Arc<dyn Dashboard>,
}

impl CompletionTracker {
    pub fn new(
        nii_root: impl Into<PathBuf>,
        qc_root: impl Into<PathBuf>,
        phantom_completion: PhantomCompletion,
        dashboard: Arc<dyn Dashboard>,
    ) -> Self {
        Self {
            nii_root: nii_root.into(),
            qc_root: qc_root.into(),
            phantom_completion,
            dashboard,
        }
    }

    pub fn from_config(config: &StudyConfig, dashboard: Arc<dyn Dashboard>) -> QcResult<Self> {
        Ok(Self::new(
            config.path(PathRole::Nii)?,
            config.path(PathRole::Qc)?,
            config.qc.phantom_completion,
            dashboard,
        ))
    }

    /// Session folder names under the `nii` root, sorted
    pub fn list_sessions(&self) -> QcResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.nii_root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Completion artifact check, ignoring the dashboard
    pub fn is_finished(&self, name: &str) -> bool {
        let qc_dir = self.qc_root.join(name);

        if is_phantom_name(name) {
            return match self.phantom_completion {
                PhantomCompletion::AnyContent => dir_has_entries(&qc_dir),
                PhantomCompletion::RequiresOutputs => has_stats_output(&qc_dir),
            };
        }

        match ScanId::parse(name) {
            Ok(id) => qc_dir.join(report_file_name(&id.full_id())).is_file(),
            Err(_) => false,
        }
    }

    /// True when the dashboard has seen sessions the report does not cover
    ///
    /// Lookup failures are logged and count as no repeat.
    pub async fn repeat_session_pending(&self, full_id: &str) -> bool {
        match self.dashboard.get_subject(full_id).await {
            Ok(Some(subject)) => subject.repeat_pending(),
            Ok(None) => {
                tracing::debug!(subject = %full_id, "Subject not found in dashboard");
                false
            }
            Err(e) => {
                tracing::warn!(subject = %full_id, "Dashboard lookup failed: {}", e);
                false
            }
        }
    }

    /// Sessions without a completion artifact, every session when `rewrite`
    /// is set, plus finished sessions whose dashboard record is behind
    pub async fn subjects_needing_qc(&self, rewrite: bool) -> QcResult<Vec<String>> {
        let sessions = self.list_sessions()?;
        let mut pending = Vec::new();

        for name in sessions {
            let id = match ScanId::parse(&name) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(session = %name, "Skipping unrecognised folder: {}", e);
                    continue;
                }
            };

            if rewrite || !self.is_finished(&name) {
                pending.push(name);
                continue;
            }

            if self.repeat_session_pending(&id.full_id()).await {
                tracing::info!(session = %name, "Repeat session found, regenerating QC");
                pending.push(name);
            }
        }

        tracing::debug!(count = pending.len(), "Sessions needing QC");
        Ok(pending)
    }
}

fn has_stats_output(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().ends_with(".csv"))
        })
        .unwrap_or(false)
}

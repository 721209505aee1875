//! Bulk and single-session QC control flow
//!
//! Bulk mode filters the study's sessions down to those needing QC and
//! submits one job per session to the scheduler, re-invoking this binary in
//! single-session mode. Single-session mode runs everything in-process, one
//! external tool at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dmqc_common::config::{PathRole, SiteConfig, StudyConfig};
use dmqc_common::fs::{define_folder, remove_empty_files};

use crate::error::{QcError, QcResult};
use crate::services::checklist::update_checklist;
use crate::services::command_runner::{shell_join, CommandRunner};
use crate::services::completion_tracker::{is_phantom_name, CompletionTracker};
use crate::services::dashboard::Dashboard;
use crate::services::header_qc::{header_differences, run_header_qc};
use crate::services::job_dispatcher::{DispatchedJob, JobDispatcher, Scheduler, SubmissionMode};
use crate::services::pipeline_selector::PipelineSelector;
use crate::services::reconciliation::{reconcile, ReconciliationTable};
use crate::services::step_runner::IdempotentStepRunner;
use crate::services::tech_notes::find_all_tech_notes;
use crate::report::ReportAssembler;
use crate::subject::{AcquiredFile, Subject};
use crate::RunOptions;

/// Jobs submitted by one bulk run
#[derive(Debug, Default)]
pub struct BulkSummary {
    pub human: Vec<DispatchedJob>,
    pub phantom: Vec<DispatchedJob>,
}

/// A session ready for in-process QC
#[derive(Debug)]
pub struct PreparedScan {
    pub subject: Subject,
    /// Requested rewrite, or forced by a repeat session
    pub rewrite: bool,
}

/// Runs QC for one study
pub struct Orchestrator {
    config: StudyConfig,
    options: RunOptions,
    runner: Arc<dyn CommandRunner>,
    dashboard: Arc<dyn Dashboard>,
    scheduler: Arc<dyn Scheduler>,
    /// Executable re-invoked by submitted jobs
    program: PathBuf,
}

impl Orchestrator {
    pub fn new(
        config: StudyConfig,
        options: RunOptions,
        runner: Arc<dyn CommandRunner>,
        dashboard: Arc<dyn Dashboard>,
        scheduler: Arc<dyn Scheduler>,
        program: PathBuf,
    ) -> Self {
        Self {
            config,
            options,
            runner,
            dashboard,
            scheduler,
            program,
        }
    }

    pub async fn run(&self, session: Option<&str>) -> QcResult<()> {
        match session {
            Some(session) => self.qc_single_scan(session).await.map(|_| ()),
            None => self.qc_all_scans().await.map(|_| ()),
        }
    }

    fn tracker(&self) -> QcResult<CompletionTracker> {
        CompletionTracker::from_config(&self.config, self.dashboard.clone())
    }

    /// Command line that runs QC for one session as a scheduler job
    pub fn make_qc_command(&self, session: &str) -> String {
        let mut argv = vec![
            self.program.display().to_string(),
            self.config.key.clone(),
            session.to_string(),
        ];
        argv.extend(self.options.verbosity.flags().into_iter().map(String::from));
        if self.options.log_to_server {
            argv.push("--log-to-server".to_string());
        }
        if self.options.rewrite {
            argv.push("--rewrite".to_string());
        }
        shell_join(&argv)
    }

    /// Submit a job for every session still needing QC
    ///
    /// Phantom jobs are chained so license-limited pipelines run one at a time.
    pub async fn qc_all_scans(&self) -> QcResult<BulkSummary> {
        let pending = self.tracker()?.subjects_needing_qc(self.options.rewrite).await?;

        let (phantoms, humans): (Vec<String>, Vec<String>) =
            pending.into_iter().partition(|name| is_phantom_name(name));
        let human_commands: Vec<String> = humans.iter().map(|s| self.make_qc_command(s)).collect();
        let phantom_commands: Vec<String> =
            phantoms.iter().map(|s| self.make_qc_command(s)).collect();

        let dispatcher = JobDispatcher::new(self.scheduler.clone(), &self.config.qc.scratch_dir);
        let mut summary = BulkSummary::default();

        if !human_commands.is_empty() {
            tracing::debug!(count = human_commands.len(), "Submitting human QC jobs");
            summary.human = dispatcher
                .dispatch(&human_commands, SubmissionMode::Independent)
                .await;
        }
        if !phantom_commands.is_empty() {
            tracing::debug!(count = phantom_commands.len(), "Submitting phantom QC jobs");
            summary.phantom = dispatcher
                .dispatch(&phantom_commands, SubmissionMode::Chained)
                .await;
        }

        Ok(summary)
    }

    /// Resolve the session, check inputs and tidy its QC folder
    pub async fn prepare_scan(&self, session: &str) -> QcResult<PreparedScan> {
        let mut subject = Subject::new(session, &self.config)?;

        let mut rewrite = self.options.rewrite;
        // Phantom pipelines honor the same dashboard-driven rewrite
        if self.tracker()?.repeat_session_pending(&subject.full_id()).await {
            tracing::info!(subject = %subject.full_id(), "New repeat session, regenerating QC outputs");
            rewrite = true;
        }

        let missing: Vec<PathBuf> = [&subject.nii_path, &subject.dcm_path]
            .into_iter()
            .filter(|p| !p.exists())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(QcError::MissingInputPaths(missing));
        }

        define_folder(&subject.qc_path)?;
        remove_empty_files(&subject.qc_path)?;
        subject.scan_files();

        Ok(PreparedScan { subject, rewrite })
    }

    /// QC one session, returning the report path when one was written
    pub async fn qc_single_scan(&self, session: &str) -> QcResult<Option<PathBuf>> {
        let PreparedScan { subject, rewrite } = self.prepare_scan(session).await?;

        if subject.is_phantom() {
            tracing::info!(path = %subject.nii_path.display(), "QC phantom");
            self.qc_phantom(&subject, rewrite).await?;
            return Ok(None);
        }

        tracing::info!(path = %subject.nii_path.display(), "QC subject");
        self.qc_subject(&subject, rewrite).await
    }

    async fn qc_subject(&self, subject: &Subject, rewrite: bool) -> QcResult<Option<PathBuf>> {
        let report_path = subject.report_path();
        let header_diffs = subject.header_diff_path();

        if report_path.is_file() {
            if !rewrite {
                tracing::debug!(report = %report_path.display(), "Report exists, skipping");
                return Ok(None);
            }
            std::fs::remove_file(&report_path)?;
            match std::fs::remove_file(&header_diffs) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        let site = self.config.site(subject.site())?;

        if !header_diffs.exists() {
            run_header_qc(
                subject,
                self.config.path(PathRole::Std)?,
                &header_diffs,
                &site.schedule,
                self.runner.as_ref(),
            )
            .await;
        }

        let table = reconcile(&subject.niftis, &site.schedule);

        // Checklist is updated even if report generation fails
        if let Err(e) = update_checklist(self.config.path(PathRole::Meta)?, &subject.full_id()) {
            tracing::error!(subject = %subject.full_id(), "Error adding to checklist: {}", e);
        }

        match self.generate_report(subject, site, &table, &report_path).await {
            Ok(path) => {
                self.update_dashboard(subject, &path).await;
                Ok(Some(path))
            }
            Err(e) => {
                tracing::error!(
                    subject = %subject.full_id(),
                    "Report generation failed, no report written: {}",
                    e
                );
                Ok(None)
            }
        }
    }

    async fn generate_report(
        &self,
        subject: &Subject,
        site: &SiteConfig,
        table: &ReconciliationTable,
        report_path: &Path,
    ) -> QcResult<PathBuf> {
        let selector = PipelineSelector::new(&site.schedule, &subject.dcm_path, &subject.qc_path);
        let steps = IdempotentStepRunner::new(self.runner.clone());
        let header_diffs = subject.header_diff_path();

        let mut report = ReportAssembler::new(report_path, &subject.full_id());
        report.write_table(table);

        if site.uses_technotes {
            let notes = subject
                .resources_root
                .as_deref()
                .map(|root| find_all_tech_notes(root, &subject.id))
                .unwrap_or_default();
            report.write_tech_notes(&notes);
        }

        // Sections follow acquisition order, the table follows protocol order
        let mut sections: Vec<(&str, &AcquiredFile)> = table
            .matched_rows()
            .filter_map(|row| Some((row.bookmark.as_deref()?, row.file.as_ref()?)))
            .collect();
        sections.sort_by_key(|(_, file)| file.series);

        for (bookmark, series) in sections {
            tracing::info!(file = %series.path.display(), "QC scan");
            report.start_section(bookmark, &series.file_name());

            let Some(strategy) = selector.strategy_for(&series.tag, false) else {
                continue;
            };

            report.add_header_diffs(
                &series.base_name,
                &header_differences(&header_diffs, &series.base_name),
            );

            for file in series_to_add(series, subject) {
                let Some(plan) = selector.plan_human_as(strategy, &file) else {
                    continue;
                };
                match steps.run_all(&plan.steps).await {
                    Ok(_) => {
                        for image in &plan.images {
                            report.add_image(image);
                        }
                    }
                    Err(e) => {
                        tracing::error!(file = %file.file_name(), strategy = %strategy, "QC failed: {}", e);
                    }
                }
                report.end_series();
            }
        }

        report.finish()
    }

    async fn update_dashboard(&self, subject: &Subject, report: &Path) {
        let full_id = subject.full_id();
        let record = match self.dashboard.get_subject(&full_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::warn!(
                    subject = %full_id,
                    "Cannot find subject in dashboard database. It may be missing or the database inaccessible."
                );
                return;
            }
            Err(e) => {
                tracing::warn!(subject = %full_id, "Dashboard lookup failed: {}", e);
                return;
            }
        };

        let report = report.display().to_string();
        if let Err(e) = self
            .dashboard
            .record_report(&full_id, &report, record.session_count)
            .await
        {
            tracing::error!(subject = %full_id, "Dashboard update failed: {}", e);
        }
    }

    /// Run every phantom pipeline; `rewrite` re-runs those with outputs
    async fn qc_phantom(&self, subject: &Subject, rewrite: bool) -> QcResult<()> {
        let site = self.config.site(subject.site())?;
        let selector = PipelineSelector::new(&site.schedule, &subject.dcm_path, &subject.qc_path);
        let steps = IdempotentStepRunner::new(self.runner.clone()).with_overwrite(rewrite);

        tracing::debug!(subject = %subject.name, "QC phantom scans");
        for nifti in &subject.niftis {
            let Some(plan) = selector.plan_phantom(nifti) else {
                continue;
            };
            if let Err(e) = steps.run_all(&plan.steps).await {
                tracing::error!(file = %nifti.file_name(), strategy = %plan.strategy, "Phantom QC failed: {}", e);
            }
        }
        Ok(())
    }
}

/// PDT2 series are shown as their split T2 and, when present, PD images
pub fn series_to_add(series: &AcquiredFile, subject: &Subject) -> Vec<AcquiredFile> {
    if series.tag != "PDT2" {
        return vec![series.clone()];
    }

    let split = |tag: &str| {
        subject
            .tagged_niftis(tag)
            .filter(|f| f.series == series.series)
            .last()
            .cloned()
    };

    let Some(t2) = split("T2") else {
        tracing::error!(file = %series.path.display(), "Can't add PDT2 to QC page: no split T2 found");
        return Vec::new();
    };

    let mut files = vec![t2];
    // A PDT2 may be a plain T2 with no PD half
    if let Some(pd) = split("PD") {
        files.push(pd);
    }
    files
}

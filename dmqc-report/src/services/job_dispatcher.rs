//! Batch scheduler submission
//!
//! Each command becomes a one-line job script submitted with `qsub`. In
//! chained mode every job after the first holds on its predecessor, so jobs
//! that need a scarce license run one at a time. Submission never waits for
//! jobs to run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use dmqc_common::fs::write_atomic;
use dmqc_common::time::{date_stamp, now, random_token};
use thiserror::Error;

use crate::services::command_runner::{shell_join, CommandRunner};

const JOB_PREFIX: &str = "qc_report";
const TOKEN_LEN: usize = 5;

/// How a batch of commands is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// No dependencies between jobs
    Independent,
    /// Job `i` holds on job `i-1`
    Chained,
}

/// One scheduler job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub command: String,
    /// Predecessor job name, chained mode only
    pub hold_for: Option<String>,
    pub log_path: PathBuf,
    pub err_path: PathBuf,
    pub script_path: PathBuf,
}

impl Job {
    fn new(name: String, command: String, hold_for: Option<String>, scratch_dir: &Path) -> Self {
        Self {
            log_path: scratch_dir.join(format!("{}.log", name)),
            err_path: scratch_dir.join(format!("{}.err", name)),
            script_path: scratch_dir.join(&name),
            name,
            command,
            hold_for,
        }
    }

    pub fn script(&self) -> String {
        format!("#!/bin/bash\n{}", self.command)
    }
}

/// Submission failures; logged, never retried
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to write job script {path}: {source}")]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: dmqc_common::Error,
    },

    #[error("Failed to launch scheduler client: {0}")]
    Launch(#[from] std::io::Error),

    #[error("Scheduler rejected job (status {status}): {output}")]
    Rejected { status: i32, output: String },
}

/// Batch scheduler client
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit one job, returning the scheduler's output
    async fn submit(&self, job: &Job) -> Result<String, DispatchError>;
}

/// Sun Grid Engine style `qsub` client
pub struct QsubScheduler {
    runner: Arc<dyn CommandRunner>,
    queue: String,
}

impl QsubScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>, queue: impl Into<String>) -> Self {
        Self {
            runner,
            queue: queue.into(),
        }
    }

    /// `qsub -V -q <queue> [-hold_jid <prev>] -o <log> -e <err> -N <name> <script>`
    pub fn submit_command(&self, job: &Job) -> String {
        let mut argv = vec!["qsub".to_string(), "-V".to_string(), "-q".to_string(), self.queue.clone()];
        if let Some(prev) = &job.hold_for {
            argv.push("-hold_jid".to_string());
            argv.push(prev.clone());
        }
        argv.extend([
            "-o".to_string(),
            job.log_path.display().to_string(),
            "-e".to_string(),
            job.err_path.display().to_string(),
            "-N".to_string(),
            job.name.clone(),
            job.script_path.display().to_string(),
        ]);
        shell_join(&argv)
    }
}

#[async_trait]
impl Scheduler for QsubScheduler {
    async fn submit(&self, job: &Job) -> Result<String, DispatchError> {
        write_atomic(&job.script_path, job.script().as_bytes()).map_err(|source| {
            DispatchError::ScriptWrite {
                path: job.script_path.clone(),
                source,
            }
        })?;

        let output = self.runner.run(&self.submit_command(job)).await?;
        if !output.success() {
            return Err(DispatchError::Rejected {
                status: output.status,
                output: output.output,
            });
        }
        Ok(output.output)
    }
}

/// A planned job and whether it reached the scheduler
#[derive(Debug)]
pub struct DispatchedJob {
    pub job: Job,
    pub status: Result<String, DispatchError>,
}

impl DispatchedJob {
    pub fn submitted(&self) -> bool {
        self.status.is_ok()
    }
}

/// Fans commands out to the scheduler
pub struct JobDispatcher {
    scheduler: Arc<dyn Scheduler>,
    scratch_dir: PathBuf,
}

impl JobDispatcher {
    pub fn new(scheduler: Arc<dyn Scheduler>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scheduler,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Name and link jobs without submitting anything
    pub fn plan(&self, commands: &[String], mode: SubmissionMode) -> Vec<Job> {
        plan_jobs(commands, mode, &self.scratch_dir, &now())
    }

    /// Submit every command in order
    ///
    /// A failed submission is logged and the rest are still submitted. In
    /// chained mode the successor keeps holding on the failed job's name.
    pub async fn dispatch(&self, commands: &[String], mode: SubmissionMode) -> Vec<DispatchedJob> {
        let jobs = self.plan(commands, mode);
        let mut dispatched = Vec::with_capacity(jobs.len());

        for job in jobs {
            tracing::debug!(job = %job.name, hold_for = ?job.hold_for, "Submitting: {}", job.command);

            let status = self.scheduler.submit(&job).await;
            match &status {
                Ok(out) if !out.trim().is_empty() => {
                    tracing::debug!(job = %job.name, "{}", out.trim());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(job = %job.name, "Job submission failed: {}", e);
                }
            }
            dispatched.push(DispatchedJob { job, status });
        }

        dispatched
    }
}

/// `qc_report_<YYYYMMDD>_<token>_<index>`
pub fn job_name(date: &DateTime<Local>, token: &str, index: usize) -> String {
    format!("{}_{}_{}_{}", JOB_PREFIX, date_stamp(date), token, index)
}

fn plan_jobs(
    commands: &[String],
    mode: SubmissionMode,
    scratch_dir: &Path,
    date: &DateTime<Local>,
) -> Vec<Job> {
    let mut jobs: Vec<Job> = Vec::with_capacity(commands.len());

    for (index, command) in commands.iter().enumerate() {
        let hold_for = match mode {
            SubmissionMode::Chained => jobs.last().map(|prev| prev.name.clone()),
            SubmissionMode::Independent => None,
        };
        let name = job_name(date, &random_token(TOKEN_LEN), index);
        jobs.push(Job::new(name, command.clone(), hold_for, scratch_dir));
    }

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::command_runner::CommandOutput;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn commands(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("dm-qc-report SPN01 SPN01_CMH_PHA_FBN000{}", i))
            .collect()
    }

    #[test]
    fn test_job_name_format() {
        let date = Local.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(job_name(&date, "AB1C2", 3), "qc_report_20240307_AB1C2_3");
    }

    #[test]
    fn test_chained_plan_links_predecessors() {
        let date = Local.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let jobs = plan_jobs(&commands(4), SubmissionMode::Chained, Path::new("/tmp"), &date);

        let names: HashSet<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names.len(), 4);
        assert_eq!(jobs[0].hold_for, None);
        for i in 1..jobs.len() {
            assert_eq!(jobs[i].hold_for.as_deref(), Some(jobs[i - 1].name.as_str()));
        }
        assert!(jobs[2].name.ends_with("_2"));
    }

    #[test]
    fn test_independent_plan_has_no_dependencies() {
        let date = Local.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let jobs = plan_jobs(&commands(3), SubmissionMode::Independent, Path::new("/tmp"), &date);
        assert!(jobs.iter().all(|j| j.hold_for.is_none()));
    }

    #[test]
    fn test_job_paths_and_script() {
        let date = Local.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let jobs = plan_jobs(&commands(1), SubmissionMode::Independent, Path::new("/scratch"), &date);
        let job = &jobs[0];

        assert_eq!(job.script_path, Path::new("/scratch").join(&job.name));
        assert_eq!(job.log_path, Path::new("/scratch").join(format!("{}.log", job.name)));
        assert_eq!(job.err_path, Path::new("/scratch").join(format!("{}.err", job.name)));
        assert_eq!(job.script(), "#!/bin/bash\ndm-qc-report SPN01 SPN01_CMH_PHA_FBN0000");
    }

    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        status: i32,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                status: self.status,
                output: "Your job 1 has been submitted".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_qsub_writes_script_and_builds_command() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
            status: 0,
        });
        let scheduler = QsubScheduler::new(runner.clone(), "main.q");
        let job = Job::new(
            "qc_report_20240307_AB1C2_1".to_string(),
            "dm-qc-report SPN01 SPN01_CMH_PHA_FBN0001".to_string(),
            Some("qc_report_20240307_ZZZZZ_0".to_string()),
            dir.path(),
        );

        scheduler.submit(&job).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&job.script_path).unwrap(),
            "#!/bin/bash\ndm-qc-report SPN01 SPN01_CMH_PHA_FBN0001"
        );
        let calls = runner.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            format!(
                "qsub -V -q main.q -hold_jid qc_report_20240307_ZZZZZ_0 -o {} -e {} -N qc_report_20240307_AB1C2_1 {}",
                job.log_path.display(),
                job.err_path.display(),
                job.script_path.display()
            )
        );
    }

    #[tokio::test]
    async fn test_qsub_rejection_is_an_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner {
            calls: Mutex::new(Vec::new()),
            status: 1,
        });
        let scheduler = QsubScheduler::new(runner, "main.q");
        let job = Job::new("j".to_string(), "true".to_string(), None, dir.path());

        let err = scheduler.submit(&job).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { status: 1, .. }));
    }
}

//! Test doubles and study fixtures
//!
//! The fake runner stands in for the external analysis tools: it records each
//! command line and creates the files the real tool would leave behind.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dmqc_common::config::StudyConfig;
use dmqc_report::services::command_runner::{CommandOutput, CommandRunner};
use dmqc_report::services::dashboard::{Dashboard, DashboardError, DashboardSubject};
use dmqc_report::services::job_dispatcher::{DispatchError, Job, Scheduler};
use tempfile::TempDir;

pub const STUDY: &str = "SPN01";
pub const HUMAN: &str = "SPN01_CMH_0001_01_01";
pub const HUMAN_FULL_ID: &str = "SPN01_CMH_0001_01";
pub const PHANTOM: &str = "SPN01_CMH_PHA_FBN0001";

/// Records commands and fakes tool outputs
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    failing_tools: Vec<String>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runner whose given tools exit non-zero without producing anything
    pub fn failing(tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing_tools: tools.iter().map(|t| t.to_string()).collect(),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tools(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.split_whitespace().next().map(str::to_string))
            .collect()
    }

    pub fn count(&self, tool: &str) -> usize {
        self.tools().iter().filter(|t| t.as_str() == tool).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn fake_outputs(argv: &[&str]) -> std::io::Result<()> {
        let touch = |path: &str| fs::write(path, "output");
        let last = argv.last().copied().unwrap_or_default();

        match argv[0] {
            "slicer" | "qc-scanlength" => touch(last),
            "qc-fmri" => {
                for suffix in ["_stats.csv", "_sfnr.nii.gz", "_corr.nii.gz"] {
                    touch(&format!("{}{}", last, suffix))?;
                }
                Ok(())
            }
            "qc-dti" => touch(&format!("{}_stats.csv", last)),
            "qc-spikecount" => touch(argv[2]),
            "qc-headers" => {
                let mut log = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(argv[3])?;
                writeln!(log, "{}: EchoTime differs", argv[1])
            }
            "qc-adni" | "qc-fbirn-fmri" | "qc-fbirn-dti" | "qa-dti" | "qc_abcd_fmri" => {
                touch(&format!("{}_stats.csv", last))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.to_string());
        let argv: Vec<&str> = command.split_whitespace().collect();

        if self.failing_tools.iter().any(|t| t == argv[0]) {
            return Ok(CommandOutput {
                status: 1,
                output: format!("{} crashed", argv[0]),
            });
        }

        Self::fake_outputs(&argv)?;
        Ok(CommandOutput {
            status: 0,
            output: String::new(),
        })
    }
}

/// Records submitted jobs; rejects those whose command mentions `reject`
#[derive(Default)]
pub struct FakeScheduler {
    jobs: Mutex<Vec<Job>>,
    reject: Option<String>,
}

impl FakeScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting(pattern: &str) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(Vec::new()),
            reject: Some(pattern.to_string()),
        })
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn submit(&self, job: &Job) -> Result<String, DispatchError> {
        self.jobs.lock().unwrap().push(job.clone());
        match &self.reject {
            Some(pattern) if job.command.contains(pattern.as_str()) => Err(DispatchError::Rejected {
                status: 1,
                output: "queue full".to_string(),
            }),
            _ => Ok(format!("Your job {} has been submitted", job.name)),
        }
    }
}

/// In-memory dashboard
#[derive(Default)]
pub struct FakeDashboard {
    subjects: Mutex<HashMap<String, DashboardSubject>>,
    updates: Mutex<Vec<(String, String, u32)>>,
}

impl FakeDashboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_subject(full_id: &str, last_generated: u32, sessions: u32) -> Arc<Self> {
        let dashboard = Self::default();
        dashboard.subjects.lock().unwrap().insert(
            full_id.to_string(),
            DashboardSubject {
                last_qc_repeat_generated: last_generated,
                session_count: sessions,
            },
        );
        Arc::new(dashboard)
    }

    pub fn updates(&self) -> Vec<(String, String, u32)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dashboard for FakeDashboard {
    async fn get_subject(&self, full_id: &str) -> Result<Option<DashboardSubject>, DashboardError> {
        Ok(self.subjects.lock().unwrap().get(full_id).copied())
    }

    async fn record_report(
        &self,
        full_id: &str,
        report: &str,
        session_count: u32,
    ) -> Result<(), DashboardError> {
        self.updates
            .lock()
            .unwrap()
            .push((full_id.to_string(), report.to_string(), session_count));
        if let Some(subject) = self.subjects.lock().unwrap().get_mut(full_id) {
            subject.last_qc_repeat_generated = session_count;
        }
        Ok(())
    }
}

/// A study laid out in a temporary directory
pub struct StudyFixture {
    pub dir: TempDir,
    pub config: StudyConfig,
}

impl StudyFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for sub in ["dcm", "nii", "qc", "std", "log", "meta", "resources", "scratch"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }

        let toml = format!(
            r#"
study_name = "SPINS"

[paths]
dcm = "{0}/dcm"
nii = "{0}/nii"
qc = "{0}/qc"
std = "{0}/std"
log = "{0}/log"
meta = "{0}/meta"
resources = "{0}/resources"

[qc]
scratch_dir = "{0}/scratch"

[sites.CMH]
uses_technotes = true

[sites.CMH.tags.T1]
count = 1
order = [0]
qc_type = "anat"

[sites.CMH.tags.DTI60]
count = 2
order = [1, 3]
qc_type = "dti"
qc_pha = "qa_dti"

[sites.CMH.tags.RST]
count = 1
order = [2]
qc_type = "fmri"

[sites.CMH.tags.PDT2]
count = 1
order = 4
qc_type = "anat"
"#,
            root.display()
        );
        let config = StudyConfig::from_toml_str(&toml, STUDY).unwrap();

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn nii(&self, session: &str) -> PathBuf {
        self.root().join("nii").join(session)
    }

    pub fn dcm(&self, session: &str) -> PathBuf {
        self.root().join("dcm").join(session)
    }

    pub fn qc(&self, session: &str) -> PathBuf {
        self.root().join("qc").join(session)
    }

    /// Create a session's nii and dcm folders with the given series files
    ///
    /// Each name is `<TAG>_<SERIES>_<DESCRIPTION>`; a nifti and a dicom are
    /// written for each, plus `.bvec`/`.bval` for diffusion series.
    pub fn add_session(&self, session: &str, series: &[&str]) {
        let nii = self.nii(session);
        let dcm = self.dcm(session);
        fs::create_dir_all(&nii).unwrap();
        fs::create_dir_all(&dcm).unwrap();

        for s in series {
            let base = format!("{}_{}", session, s);
            fs::write(nii.join(format!("{}.nii.gz", base)), "nii").unwrap();
            fs::write(dcm.join(format!("{}.dcm", base)), "dcm").unwrap();
            if s.starts_with("DTI") {
                fs::write(nii.join(format!("{}.bvec", base)), "bvec").unwrap();
                fs::write(nii.join(format!("{}.bval", base)), "bval").unwrap();
            }
        }
    }

    pub fn add_standard(&self, name: &str) {
        fs::write(self.root().join("std").join(name), "gold").unwrap();
    }

    pub fn add_tech_notes(&self, session: &str) {
        let folder = self.root().join("resources").join(session);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("TechNotes.pdf"), "pdf").unwrap();
    }

    pub fn mark_report_done(&self, session: &str, full_id: &str) {
        let qc = self.qc(session);
        fs::create_dir_all(&qc).unwrap();
        fs::write(qc.join(format!("qc_{}.html", full_id)), "<html>").unwrap();
    }
}

//! Idempotent analysis steps
//!
//! Each step is one external tool invocation with a declared output artifact.
//! If the artifact is already on disk the step is skipped without launching
//! anything. The check is presence-only: content, size and input changes are
//! not considered.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::services::command_runner::{shell_join, CommandRunner};

/// Step failures, reported per file without retry
#[derive(Debug, Error)]
pub enum StepError {
    /// A required input is not on disk
    #[error("{tool}: missing input {path}")]
    MissingInput { tool: String, path: PathBuf },

    /// The tool could not be started
    #[error("{tool}: failed to launch: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited non-zero
    #[error("{tool}: exited with status {status}: {output}")]
    ToolFailed {
        tool: String,
        status: i32,
        output: String,
    },
}

/// How a step's output is recognised on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactCheck {
    /// This exact file
    Exact(PathBuf),
    /// Any file named `<prefix file name>*<suffix>` next to `prefix`
    Prefixed { prefix: PathBuf, suffix: String },
}

impl ArtifactCheck {
    pub fn is_present(&self) -> bool {
        match self {
            ArtifactCheck::Exact(path) => path.is_file(),
            ArtifactCheck::Prefixed { prefix, suffix } => {
                let Some(dir) = prefix.parent() else {
                    return false;
                };
                let stem = prefix
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let Ok(entries) = std::fs::read_dir(dir) else {
                    return false;
                };
                entries.filter_map(|e| e.ok()).any(|entry| {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    name.starts_with(&stem) && name.ends_with(suffix.as_str())
                })
            }
        }
    }
}

/// One external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStep {
    /// Executable name
    pub tool: String,
    /// Arguments after the executable
    pub args: Vec<String>,
    /// Files that must exist before launching
    pub inputs: Vec<PathBuf>,
    pub artifact: ArtifactCheck,
}

impl ToolStep {
    pub fn new(tool: &str, args: Vec<String>, inputs: Vec<PathBuf>, artifact: ArtifactCheck) -> Self {
        Self {
            tool: tool.to_string(),
            args,
            inputs,
            artifact,
        }
    }

    pub fn command_line(&self) -> String {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.tool.clone());
        argv.extend(self.args.iter().cloned());
        shell_join(&argv)
    }
}

/// What happened to a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Artifact already present
    Skipped,
    Ran,
}

/// Runs steps, skipping those whose artifact exists
pub struct IdempotentStepRunner {
    runner: Arc<dyn CommandRunner>,
    overwrite: bool,
}

impl IdempotentStepRunner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            overwrite: false,
        }
    }

    /// Re-run steps even when their artifact exists
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub async fn run(&self, step: &ToolStep) -> Result<StepOutcome, StepError> {
        if !self.overwrite && step.artifact.is_present() {
            tracing::debug!(tool = %step.tool, artifact = ?step.artifact, "Output exists, skipping");
            return Ok(StepOutcome::Skipped);
        }

        if let Some(missing) = step.inputs.iter().find(|p| !p.exists()) {
            return Err(StepError::MissingInput {
                tool: step.tool.clone(),
                path: missing.clone(),
            });
        }

        let command = step.command_line();
        tracing::info!(tool = %step.tool, "Running {}", command);

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|source| StepError::Launch {
                tool: step.tool.clone(),
                source,
            })?;

        if !output.success() {
            return Err(StepError::ToolFailed {
                tool: step.tool.clone(),
                status: output.status,
                output: output.output.trim().to_string(),
            });
        }

        Ok(StepOutcome::Ran)
    }

    /// Run steps in order, stopping at the first failure
    pub async fn run_all(&self, steps: &[ToolStep]) -> Result<Vec<StepOutcome>, StepError> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            outcomes.push(self.run(step).await?);
        }
        Ok(outcomes)
    }
}

/// `<dir>/<base_name><suffix>`
pub fn output_path(dir: &Path, base_name: &str, suffix: &str) -> PathBuf {
    dir.join(format!("{}{}", base_name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::command_runner::CommandOutput;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records commands; optionally creates a file to stand in for the tool's output
    struct FakeTool {
        calls: Mutex<Vec<String>>,
        creates: Option<PathBuf>,
        status: i32,
    }

    impl FakeTool {
        fn new(creates: Option<PathBuf>, status: i32) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                creates,
                status,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeTool {
        async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(command.to_string());
            if let Some(path) = &self.creates {
                fs::write(path, "stats")?;
            }
            Ok(CommandOutput {
                status: self.status,
                output: "tool said no".to_string(),
            })
        }
    }

    fn step(input: &Path, artifact: ArtifactCheck) -> ToolStep {
        ToolStep::new(
            "qc-fmri",
            vec![input.display().to_string()],
            vec![input.to_path_buf()],
            artifact,
        )
    }

    #[tokio::test]
    async fn test_second_run_is_skipped() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.nii.gz");
        fs::write(&input, "nii").unwrap();
        let artifact = dir.path().join("scan_stats.csv");
        let tool = FakeTool::new(Some(artifact.clone()), 0);
        let runner = IdempotentStepRunner::new(tool.clone());
        let step = step(&input, ArtifactCheck::Exact(artifact.clone()));

        assert_eq!(runner.run(&step).await.unwrap(), StepOutcome::Ran);
        let before = fs::read_dir(dir.path()).unwrap().count();

        assert_eq!(runner.run(&step).await.unwrap(), StepOutcome::Skipped);
        assert_eq!(tool.calls().len(), 1);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), before);
        assert_eq!(fs::read_to_string(&artifact).unwrap(), "stats");
    }

    #[tokio::test]
    async fn test_overwrite_reruns() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.nii.gz");
        fs::write(&input, "nii").unwrap();
        let artifact = dir.path().join("scan_stats.csv");
        fs::write(&artifact, "old").unwrap();
        let tool = FakeTool::new(None, 0);
        let runner = IdempotentStepRunner::new(tool.clone()).with_overwrite(true);

        let outcome = runner
            .run(&step(&input, ArtifactCheck::Exact(artifact)))
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Ran);
        assert_eq!(tool.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_failure_is_propagated() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.nii.gz");
        fs::write(&input, "nii").unwrap();
        let tool = FakeTool::new(None, 2);
        let runner = IdempotentStepRunner::new(tool.clone());

        let err = runner
            .run(&step(&input, ArtifactCheck::Exact(dir.path().join("out.csv"))))
            .await
            .unwrap_err();

        match err {
            StepError::ToolFailed { status, output, .. } => {
                assert_eq!(status, 2);
                assert_eq!(output, "tool said no");
            }
            other => panic!("Expected ToolFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_input_launches_nothing() {
        let dir = TempDir::new().unwrap();
        let tool = FakeTool::new(None, 0);
        let runner = IdempotentStepRunner::new(tool.clone());

        let err = runner
            .run(&step(
                &dir.path().join("absent.nii.gz"),
                ArtifactCheck::Exact(dir.path().join("out.csv")),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::MissingInput { .. }));
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_all_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("scan.nii.gz");
        fs::write(&input, "nii").unwrap();
        let tool = FakeTool::new(None, 1);
        let runner = IdempotentStepRunner::new(tool.clone());
        let steps = vec![
            step(&input, ArtifactCheck::Exact(dir.path().join("a.csv"))),
            step(&input, ArtifactCheck::Exact(dir.path().join("b.csv"))),
        ];

        assert!(runner.run_all(&steps).await.is_err());
        assert_eq!(tool.calls().len(), 1);
    }

    #[test]
    fn test_prefixed_artifact_check() {
        let dir = TempDir::new().unwrap();
        let check = ArtifactCheck::Prefixed {
            prefix: dir.path().join("SPN01_CMH_PHA_FBN0001_RST_04_Rest"),
            suffix: ".csv".to_string(),
        };
        assert!(!check.is_present());

        fs::write(dir.path().join("SPN01_CMH_PHA_FBN0001_RST_04_Rest_stats.png"), "x").unwrap();
        assert!(!check.is_present());

        fs::write(dir.path().join("SPN01_CMH_PHA_FBN0001_RST_04_Rest_stats.csv"), "x").unwrap();
        assert!(check.is_present());
    }

    #[test]
    fn test_command_line() {
        let step = ToolStep::new(
            "slicer",
            vec!["/nii/a.nii.gz".into(), "-S".into(), "5".into(), "1600".into(), "/qc/a.png".into()],
            Vec::new(),
            ArtifactCheck::Exact(PathBuf::from("/qc/a.png")),
        );
        assert_eq!(step.command_line(), "slicer /nii/a.nii.gz -S 5 1600 /qc/a.png");
    }
}

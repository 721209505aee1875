//! Service modules for per-session QC
//!
//! Leaf services first: external commands, strategy selection, idempotent
//! steps and reconciliation. Scheduling, completion tracking and the
//! dashboard client sit above them.

pub mod checklist;
pub mod command_runner;
pub mod completion_tracker;
pub mod dashboard;
pub mod header_qc;
pub mod job_dispatcher;
pub mod pipeline_selector;
pub mod reconciliation;
pub mod step_runner;
pub mod tech_notes;

pub use command_runner::{CommandOutput, CommandRunner, ShellRunner};
pub use completion_tracker::CompletionTracker;
pub use dashboard::{Dashboard, DashboardError, DashboardSubject, HttpDashboard, NoDashboard};
pub use job_dispatcher::{DispatchError, Job, JobDispatcher, QsubScheduler, Scheduler, SubmissionMode};
pub use pipeline_selector::{PipelineSelector, Selection, StrategyPlan};
pub use reconciliation::{reconcile, Position, ReconciliationRow, ReconciliationTable, RowNote};
pub use step_runner::{ArtifactCheck, IdempotentStepRunner, StepError, StepOutcome, ToolStep};

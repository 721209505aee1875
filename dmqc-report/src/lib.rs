//! dmqc-report library interface
//!
//! Exposes the QC orchestration engine for the `dm-qc-report` binary and for
//! integration testing.

pub mod error;
pub mod logging;
pub mod nifti;
pub mod orchestrator;
pub mod report;
pub mod services;
pub mod subject;

pub use crate::error::{QcError, QcResult};
pub use crate::orchestrator::Orchestrator;

use crate::logging::Verbosity;

/// Per-invocation options, passed explicitly to everything that needs them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Treat every session as new and regenerate existing outputs
    pub rewrite: bool,
    pub verbosity: Verbosity,
    /// Forward logs to the study's log server
    pub log_to_server: bool,
}

//! Error types for dmqc-report

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while orchestrating QC
#[derive(Debug, Error)]
pub enum QcError {
    /// Configuration, identifier or shared I/O failure
    #[error(transparent)]
    Common(#[from] dmqc_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Subject input directories that must exist before QC can run
    #[error("The following path(s) required for input do not exist: {}", display_paths(.0))]
    MissingInputPaths(Vec<PathBuf>),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for QC operations
pub type QcResult<T> = Result<T, QcError>;

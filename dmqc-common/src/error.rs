//! Common error types for dmqc

use thiserror::Error;

/// Common result type for dmqc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the dmqc crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required path role is not defined for the study
    #[error("Path {role} not found for project: {study}")]
    MissingPath { role: String, study: String },

    /// Session or file name does not follow the datman naming convention
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

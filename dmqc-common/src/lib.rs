//! # dmqc Common Library
//!
//! Shared code for the QC report tooling:
//! - Study configuration loading and validation
//! - Datman-style session and file name parsing
//! - QC strategy vocabulary
//! - Atomic file writes and artifact cleanup
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod fs;
pub mod scanid;
pub mod strategy;
pub mod time;

pub use error::{Error, Result};
pub use scanid::{ScanFileName, ScanId};
pub use strategy::QcStrategy;

//! Datman identifier parsing
//!
//! Sessions are named `<STUDY>_<SITE>_<SUBJECT>_<TIMEPOINT>[_<SESSION>]`.
//! Phantoms replace subject and timepoint with `PHA_<TYPE><ID>`.
//! Acquired files extend the session name with `_<TAG>_<SERIES>_<DESCRIPTION>.<ext>`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result};

static SESSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<study>[^_]+)_(?P<site>[^_]+)_(?P<subject>[^_]+)_(?P<timepoint>[^_]+)(?:_(?P<session>[^_]+))?$",
    )
    .expect("session regex is valid")
});

static PHANTOM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<study>[^_]+)_(?P<site>[^_]+)_(?P<subject>PHA_[^_]+)$")
        .expect("phantom regex is valid")
});

static FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<id>[^_]+_[^_]+_[^_]+_[^_]+_[^_]+)_(?P<tag>[^_]+)_(?P<series>\d+)_(?P<description>[^.]*)(?P<ext>\..*)?$",
    )
    .expect("file regex is valid")
});

static PHANTOM_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<id>[^_]+_[^_]+_PHA_[^_]+)_(?P<tag>[^_]+)_(?P<series>\d+)_(?P<description>[^.]*)(?P<ext>\..*)?$",
    )
    .expect("phantom file regex is valid")
});

/// Parsed session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanId {
    pub study: String,
    pub site: String,
    /// Subject code, `PHA_<...>` for phantoms
    pub subject: String,
    /// Empty for phantoms
    pub timepoint: String,
    /// Repeat number, absent for phantoms and for some resource folders
    pub session: Option<String>,
}

impl ScanId {
    /// Parse a session identifier such as `SPN01_CMH_0001_01_01` or `SPN01_CMH_PHA_FBN0001`
    pub fn parse(identifier: &str) -> Result<Self> {
        if let Some(caps) = PHANTOM_RE.captures(identifier) {
            return Ok(Self {
                study: caps["study"].to_string(),
                site: caps["site"].to_string(),
                subject: caps["subject"].to_string(),
                timepoint: String::new(),
                session: None,
            });
        }

        let caps = SESSION_RE
            .captures(identifier)
            .ok_or_else(|| Error::InvalidIdentifier(identifier.to_string()))?;

        Ok(Self {
            study: caps["study"].to_string(),
            site: caps["site"].to_string(),
            subject: caps["subject"].to_string(),
            timepoint: caps["timepoint"].to_string(),
            session: caps.name("session").map(|m| m.as_str().to_string()),
        })
    }

    pub fn is_phantom(&self) -> bool {
        self.subject.starts_with("PHA_")
    }

    /// `<STUDY>_<SITE>_<SUBJECT>_<TIMEPOINT>`, the identifier shared by all repeat sessions
    pub fn full_id(&self) -> String {
        if self.is_phantom() {
            format!("{}_{}_{}", self.study, self.site, self.subject)
        } else {
            format!(
                "{}_{}_{}_{}",
                self.study, self.site, self.subject, self.timepoint
            )
        }
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => write!(f, "{}_{}", self.full_id(), session),
            None => f.write_str(&self.full_id()),
        }
    }
}

/// Parsed acquisition file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFileName {
    pub id: ScanId,
    /// Scan type code, e.g. `T1`, `DTI60-1000`
    pub tag: String,
    /// Acquisition sequence number
    pub series: u32,
    pub description: String,
    /// Extension including the leading dot, e.g. `.nii.gz`
    pub ext: String,
    stem: String,
}

impl ScanFileName {
    /// Parse a file name (no directory component)
    pub fn parse(file_name: &str) -> Result<Self> {
        let caps = PHANTOM_FILE_RE
            .captures(file_name)
            .or_else(|| FILE_RE.captures(file_name))
            .ok_or_else(|| Error::InvalidIdentifier(file_name.to_string()))?;

        let id = ScanId::parse(&caps["id"])?;
        let series = caps["series"]
            .parse::<u32>()
            .map_err(|_| Error::InvalidIdentifier(file_name.to_string()))?;

        let ext = caps
            .name("ext")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let stem = file_name[..file_name.len() - ext.len()].to_string();

        Ok(Self {
            id,
            tag: caps["tag"].to_string(),
            series,
            description: caps["description"].to_string(),
            ext,
            stem,
        })
    }

    /// File name without its extension
    pub fn stem(&self) -> &str {
        &self.stem
    }
}

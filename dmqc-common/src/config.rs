//! Study configuration loading and validation
//!
//! Study files are TOML documents named `<STUDY>.toml`. The directory holding
//! them is resolved in priority order:
//! 1. `DMQC_CONFIG_DIR` environment variable
//! 2. `~/.config/dmqc`
//! 3. `/etc/dmqc`
//!
//! The raw document is deserialized into `Raw*` structs and then validated into
//! [`StudyConfig`]: strategy names are checked against [`QcStrategy`] and
//! series-description patterns are compiled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::{Error, QcStrategy, Result};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "DMQC_CONFIG_DIR";

/// Default TCP port for remote log forwarding
pub const DEFAULT_LOG_SERVER_PORT: u16 = 9020;

/// Named directory roles a study defines under `[paths]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRole {
    /// Raw DICOM headers, one folder per session
    Dcm,
    /// Converted NIfTI images, one folder per session
    Nii,
    /// QC outputs, one folder per session
    Qc,
    /// Gold-standard DICOM headers
    Std,
    Log,
    /// Study metadata (checklist)
    Meta,
    /// Session resources such as tech notes (optional)
    Resources,
}

impl PathRole {
    /// Roles that must be defined, and exist, for every study
    pub const REQUIRED: [PathRole; 6] = [
        PathRole::Dcm,
        PathRole::Nii,
        PathRole::Qc,
        PathRole::Std,
        PathRole::Log,
        PathRole::Meta,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            PathRole::Dcm => "dcm",
            PathRole::Nii => "nii",
            PathRole::Qc => "qc",
            PathRole::Std => "std",
            PathRole::Log => "log",
            PathRole::Meta => "meta",
            PathRole::Resources => "resources",
        }
    }
}

/// How a phantom's QC directory is judged finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhantomCompletion {
    /// Any entry in the directory counts
    #[default]
    AnyContent,
    /// At least one `.csv` statistics artifact must be present
    RequiresOutputs,
}

/// Orchestration settings from the `[qc]` table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QcSettings {
    pub phantom_completion: PhantomCompletion,
    pub scheduler_queue: String,
    /// Job scripts and scheduler log sinks
    pub scratch_dir: PathBuf,
}

impl Default for QcSettings {
    fn default() -> Self {
        Self {
            phantom_completion: PhantomCompletion::default(),
            scheduler_queue: "main.q".to_string(),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Protocol display position(s) for a tag
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Ordering {
    /// Every occurrence shares one position
    Fixed(u32),
    /// Positions handed out first-in-first-out
    Queue(Vec<u32>),
}

impl Default for Ordering {
    fn default() -> Self {
        Ordering::Queue(vec![0])
    }
}

/// Expected acquisition of one tag at one site
#[derive(Debug, Clone)]
pub struct ExpectedScanSpec {
    pub tag: String,
    /// Series-description rules used by the exporter
    pub patterns: Vec<Regex>,
    pub count: u32,
    pub order: Ordering,
    /// Strategy for human subjects, `None` when `qc_type` is absent
    pub qc_type: Option<QcStrategy>,
    /// Phantom override, `None` when absent or `"default"`
    pub qc_pha: Option<QcStrategy>,
}

/// Per-site expected schedule, in declaration order
#[derive(Debug, Clone, Default)]
pub struct ExpectedSchedule {
    tags: IndexMap<String, ExpectedScanSpec>,
}

impl ExpectedSchedule {
    pub fn get(&self, tag: &str) -> Option<&ExpectedScanSpec> {
        self.tags.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExpectedScanSpec> {
        self.tags.values()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<ExpectedScanSpec> for ExpectedSchedule {
    fn from_iter<I: IntoIterator<Item = ExpectedScanSpec>>(iter: I) -> Self {
        Self {
            tags: iter
                .into_iter()
                .map(|spec| (spec.tag.clone(), spec))
                .collect(),
        }
    }
}

/// Settings for one scanning site
#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub uses_technotes: bool,
    pub schedule: ExpectedSchedule,
}

/// Validated study configuration
#[derive(Debug, Clone)]
pub struct StudyConfig {
    /// Name the study file was loaded under, `<key>.toml`
    pub key: String,
    pub study_name: String,
    paths: HashMap<String, PathBuf>,
    /// `host[:port]` of the remote log collector
    pub log_server: Option<String>,
    pub dashboard_url: Option<String>,
    pub qc: QcSettings,
    sites: IndexMap<String, SiteConfig>,
}

impl StudyConfig {
    /// Load `<STUDY>.toml` from the resolved config directory
    pub fn load(study: &str) -> Result<Self> {
        let dir = resolve_config_dir()?;
        Self::from_file(&dir.join(format!("{}.toml", study)), study)
    }

    pub fn from_file(path: &Path, study: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot find configuration info for study {} ({}): {}",
                study,
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content, study)
    }

    pub fn from_toml_str(content: &str, study: &str) -> Result<Self> {
        let raw: RawStudyConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed for {}: {}", study, e)))?;

        let mut sites = IndexMap::new();
        for (site_name, raw_site) in raw.sites {
            let mut specs = Vec::with_capacity(raw_site.tags.len());
            for (tag, raw_tag) in raw_site.tags {
                specs.push(raw_tag.validate(&site_name, tag)?);
            }
            sites.insert(
                site_name,
                SiteConfig {
                    uses_technotes: raw_site.uses_technotes,
                    schedule: specs.into_iter().collect(),
                },
            );
        }

        Ok(Self {
            key: study.to_string(),
            study_name: raw.study_name.unwrap_or_else(|| study.to_string()),
            paths: raw.paths,
            log_server: raw.log_server,
            dashboard_url: raw.dashboard_url,
            qc: raw.qc,
            sites,
        })
    }

    /// Directory for a path role
    pub fn path(&self, role: PathRole) -> Result<&Path> {
        self.paths
            .get(role.key())
            .map(PathBuf::as_path)
            .ok_or_else(|| Error::MissingPath {
                role: role.key().to_string(),
                study: self.study_name.clone(),
            })
    }

    /// Fail on the first required role that is undefined or does not exist
    pub fn require_paths(&self) -> Result<()> {
        for role in PathRole::REQUIRED {
            let path = self.path(role)?;
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Path {} for {} does not exist: {}",
                    role.key(),
                    self.study_name,
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn site(&self, site: &str) -> Result<&SiteConfig> {
        self.sites
            .get(site)
            .ok_or_else(|| Error::Config(format!("Site {} not defined for {}", site, self.study_name)))
    }

    /// `(host, port)` of the log server, with the default port filled in
    pub fn log_server_addr(&self) -> Option<(String, u16)> {
        let server = self.log_server.as_deref()?.trim();
        if server.is_empty() {
            return None;
        }
        match server.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => Some((host.to_string(), port)),
                Err(_) => Some((server.to_string(), DEFAULT_LOG_SERVER_PORT)),
            },
            None => Some((server.to_string(), DEFAULT_LOG_SERVER_PORT)),
        }
    }
}

/// Resolve the directory holding study config files
pub fn resolve_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let user_dir = dirs::config_dir().map(|d| d.join("dmqc"));
    if let Some(dir) = user_dir {
        if dir.is_dir() {
            return Ok(dir);
        }
    }

    let system_dir = PathBuf::from("/etc/dmqc");
    if system_dir.is_dir() {
        return Ok(system_dir);
    }

    Err(Error::Config(format!(
        "No config directory found (set {} or create ~/.config/dmqc)",
        CONFIG_DIR_ENV
    )))
}

#[derive(Debug, Deserialize)]
struct RawStudyConfig {
    study_name: Option<String>,
    #[serde(default)]
    paths: HashMap<String, PathBuf>,
    log_server: Option<String>,
    dashboard_url: Option<String>,
    #[serde(default)]
    qc: QcSettings,
    #[serde(default)]
    sites: IndexMap<String, RawSiteConfig>,
}

#[derive(Debug, Deserialize)]
struct RawSiteConfig {
    #[serde(default)]
    uses_technotes: bool,
    #[serde(default)]
    tags: IndexMap<String, RawTagSettings>,
}

#[derive(Debug, Deserialize)]
struct RawTagSettings {
    #[serde(default)]
    pattern: Vec<String>,
    count: u32,
    #[serde(default)]
    order: Ordering,
    qc_type: Option<String>,
    qc_pha: Option<String>,
}

impl RawTagSettings {
    fn validate(self, site: &str, tag: String) -> Result<ExpectedScanSpec> {
        let context = |e: Error| Error::Config(format!("Site {} tag {}: {}", site, tag, e));

        let patterns = self
            .pattern
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::Config(format!("Site {} tag {}: invalid pattern '{}': {}", site, tag, p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let qc_type = self
            .qc_type
            .as_deref()
            .map(str::parse::<QcStrategy>)
            .transpose()
            .map_err(context)?;

        let qc_pha = match self.qc_pha.as_deref() {
            None | Some("default") => None,
            Some(name) => Some(name.parse::<QcStrategy>().map_err(context)?),
        };

        Ok(ExpectedScanSpec {
            tag,
            patterns,
            count: self.count,
            order: self.order,
            qc_type,
            qc_pha,
        })
    }
}

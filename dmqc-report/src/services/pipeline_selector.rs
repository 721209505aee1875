//! Strategy selection and per-strategy step plans
//!
//! A scan's tag is looked up in the site's expected schedule to find its QC
//! strategy. The strategy determines which input files must exist and which
//! external tool steps produce its artifacts.

use std::path::{Path, PathBuf};

use dmqc_common::config::ExpectedSchedule;
use dmqc_common::QcStrategy;

use crate::services::step_runner::{output_path, ArtifactCheck, ToolStep};
use crate::subject::AcquiredFile;

/// Gap between montage slices
pub const SLICER_GAP: u32 = 2;
/// Montage width for anatomical and diffusion images
pub const SLICER_RES: u32 = 1600;
/// Montage width for functional images
pub const SLICER_FMRI_RES: u32 = 600;
const SLICER_ANAT_GAP: u32 = 5;

/// A scan matched to its strategy and required inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub strategy: QcStrategy,
    /// Files that must exist before any step runs, nifti first
    pub inputs: Vec<PathBuf>,
    /// `<qc_dir>/<base_name>`
    pub output_prefix: PathBuf,
}

/// Image embedded in a report section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportImage {
    pub path: PathBuf,
    pub title: Option<String>,
}

impl ReportImage {
    fn new(path: PathBuf, title: Option<&str>) -> Self {
        Self {
            path,
            title: title.map(str::to_string),
        }
    }
}

/// Ordered steps for one scan and the images they leave behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPlan {
    pub strategy: QcStrategy,
    pub steps: Vec<ToolStep>,
    pub images: Vec<ReportImage>,
}

/// Maps scans of one session to strategies
pub struct PipelineSelector<'a> {
    schedule: &'a ExpectedSchedule,
    dcm_dir: &'a Path,
    qc_dir: &'a Path,
}

impl<'a> PipelineSelector<'a> {
    pub fn new(schedule: &'a ExpectedSchedule, dcm_dir: &'a Path, qc_dir: &'a Path) -> Self {
        Self {
            schedule,
            dcm_dir,
            qc_dir,
        }
    }

    /// Strategy for a tag; phantoms honour the `qc_pha` override
    pub fn strategy_for(&self, tag: &str, is_phantom: bool) -> Option<QcStrategy> {
        let Some(spec) = self.schedule.get(tag) else {
            tracing::info!(tag, "Tag not defined for site, skipping");
            return None;
        };

        let strategy = if is_phantom {
            spec.qc_pha.or(spec.qc_type)
        } else {
            spec.qc_type
        };

        if strategy.is_none() {
            tracing::info!(tag, "No QC strategy configured for tag, skipping");
        }
        strategy
    }

    pub fn select(&self, file: &AcquiredFile, is_phantom: bool) -> Option<Selection> {
        let strategy = self.strategy_for(&file.tag, is_phantom)?;
        Some(self.selection(strategy, file))
    }

    fn selection(&self, strategy: QcStrategy, file: &AcquiredFile) -> Selection {
        Selection {
            strategy,
            inputs: required_inputs(strategy, file, self.dcm_dir),
            output_prefix: self.qc_dir.join(&file.base_name),
        }
    }

    /// Steps for a human scan under a given strategy; `None` when the
    /// strategy has no human pipeline
    ///
    /// Split series (the T2 and PD halves of a PDT2) are run with the
    /// strategy of the tag they were split from.
    pub fn plan_human_as(&self, strategy: QcStrategy, file: &AcquiredFile) -> Option<StrategyPlan> {
        let selection = self.selection(strategy, file);
        let plan = human_plan(&selection, file, self.qc_dir);
        if plan.is_none() {
            tracing::warn!(
                strategy = %strategy,
                file = %file.file_name(),
                "No human QC pipeline for strategy, skipping"
            );
        }
        plan
    }

    /// Steps for a phantom scan; `None` when the strategy has no phantom pipeline
    pub fn plan_phantom(&self, file: &AcquiredFile) -> Option<StrategyPlan> {
        let selection = self.select(file, true)?;
        let plan = phantom_plan(&selection, file);
        if plan.is_none() {
            tracing::info!(
                strategy = %selection.strategy,
                file = %file.file_name(),
                "No phantom QC pipeline for strategy, skipping"
            );
        }
        plan
    }
}

/// Input files each strategy reads
pub fn required_inputs(strategy: QcStrategy, file: &AcquiredFile, dcm_dir: &Path) -> Vec<PathBuf> {
    match strategy {
        QcStrategy::Ignore => Vec::new(),
        QcStrategy::Anat | QcStrategy::Fmri | QcStrategy::DmapFmri | QcStrategy::DmapDmri => {
            vec![file.path.clone()]
        }
        QcStrategy::Dti | QcStrategy::QaDti => vec![
            file.path.clone(),
            file.sibling(".bvec"),
            file.sibling(".bval"),
        ],
        QcStrategy::AbcdFmri => vec![
            file.path.clone(),
            dcm_dir.join(format!("{}.dcm", file.base_name)),
            file.sibling(".json"),
        ],
    }
}

fn slicer(input: &Path, image: PathBuf, gap: u32, width: u32) -> ToolStep {
    ToolStep::new(
        "slicer",
        vec![
            input.display().to_string(),
            "-S".to_string(),
            gap.to_string(),
            width.to_string(),
            image.display().to_string(),
        ],
        vec![input.to_path_buf()],
        ArtifactCheck::Exact(image),
    )
}

fn human_plan(selection: &Selection, file: &AcquiredFile, qc_dir: &Path) -> Option<StrategyPlan> {
    let base = file.base_name.as_str();
    let nifti = file.path.as_path();
    let prefix = selection.output_prefix.display().to_string();

    let (steps, images) = match selection.strategy {
        QcStrategy::Ignore => (Vec::new(), Vec::new()),

        QcStrategy::Anat | QcStrategy::DmapFmri | QcStrategy::DmapDmri => {
            let image = output_path(qc_dir, base, ".png");
            (
                vec![slicer(nifti, image.clone(), SLICER_ANAT_GAP, SLICER_RES)],
                vec![ReportImage::new(image, None)],
            )
        }

        QcStrategy::Fmri => {
            let scanlengths = output_path(qc_dir, base, "_scanlengths.csv");
            let stats = output_path(qc_dir, base, "_stats.csv");
            let raw = output_path(qc_dir, base, "_raw.png");
            let sfnr = output_path(qc_dir, base, "_sfnr.png");
            let corr = output_path(qc_dir, base, "_corr.png");

            let steps = vec![
                ToolStep::new(
                    "qc-scanlength",
                    vec![nifti.display().to_string(), scanlengths.display().to_string()],
                    selection.inputs.clone(),
                    ArtifactCheck::Exact(scanlengths),
                ),
                ToolStep::new(
                    "qc-fmri",
                    vec![nifti.display().to_string(), prefix],
                    selection.inputs.clone(),
                    ArtifactCheck::Exact(stats),
                ),
                slicer(nifti, raw.clone(), SLICER_GAP, SLICER_FMRI_RES),
                slicer(
                    &output_path(qc_dir, base, "_sfnr.nii.gz"),
                    sfnr.clone(),
                    SLICER_GAP,
                    SLICER_FMRI_RES,
                ),
                slicer(
                    &output_path(qc_dir, base, "_corr.nii.gz"),
                    corr.clone(),
                    SLICER_GAP,
                    SLICER_FMRI_RES,
                ),
            ];
            let images = vec![
                ReportImage::new(raw, Some("BOLD montage")),
                ReportImage::new(sfnr, Some("SFNR map")),
                ReportImage::new(corr, Some("correlation map")),
            ];
            (steps, images)
        }

        QcStrategy::Dti => {
            let bvec = file.sibling(".bvec").display().to_string();
            let bval = file.sibling(".bval").display().to_string();
            let stats = output_path(qc_dir, base, "_stats.csv");
            let spikecount = output_path(qc_dir, base, "_spikecount.csv");
            let b0 = output_path(qc_dir, base, "_b0.png");

            let steps = vec![
                ToolStep::new(
                    "qc-dti",
                    vec![nifti.display().to_string(), bvec, bval.clone(), prefix],
                    selection.inputs.clone(),
                    ArtifactCheck::Exact(stats),
                ),
                ToolStep::new(
                    "qc-spikecount",
                    vec![
                        nifti.display().to_string(),
                        spikecount.display().to_string(),
                        bval,
                    ],
                    selection.inputs.clone(),
                    ArtifactCheck::Exact(spikecount),
                ),
                slicer(nifti, b0.clone(), SLICER_GAP, SLICER_RES),
            ];
            let images = vec![
                ReportImage::new(b0, Some("b0 montage")),
                ReportImage::new(
                    output_path(qc_dir, base, "_directions.png"),
                    Some("bvec directions"),
                ),
            ];
            (steps, images)
        }

        QcStrategy::QaDti | QcStrategy::AbcdFmri => return None,
    };

    Some(StrategyPlan {
        strategy: selection.strategy,
        steps,
        images,
    })
}

fn phantom_plan(selection: &Selection, file: &AcquiredFile) -> Option<StrategyPlan> {
    let tool = match selection.strategy {
        QcStrategy::Anat => "qc-adni",
        QcStrategy::Fmri => "qc-fbirn-fmri",
        QcStrategy::Dti => "qc-fbirn-dti",
        QcStrategy::QaDti => "qa-dti",
        QcStrategy::AbcdFmri => "qc_abcd_fmri",
        QcStrategy::Ignore | QcStrategy::DmapFmri | QcStrategy::DmapDmri => return None,
    };

    let mut args: Vec<String> = selection
        .inputs
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    if selection.strategy == QcStrategy::QaDti && file.base_name.contains("NO") {
        args.push("--accel".to_string());
    }
    args.push(selection.output_prefix.display().to_string());

    Some(StrategyPlan {
        strategy: selection.strategy,
        steps: vec![ToolStep::new(
            tool,
            args,
            selection.inputs.clone(),
            ArtifactCheck::Prefixed {
                prefix: selection.output_prefix.clone(),
                suffix: ".csv".to_string(),
            },
        )],
        images: Vec::new(),
    })
}

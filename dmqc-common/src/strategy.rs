//! QC strategy names
//!
//! The `qc_type` and `qc_pha` keys of a site's tag settings name one of these
//! strategies. Unknown names are rejected when the study config is loaded, so
//! every strategy reaching the pipeline selector has a handler.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Named QC analysis strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QcStrategy {
    /// Structural montage
    Anat,
    /// BOLD statistics and montages
    Fmri,
    /// Diffusion statistics, spike count and b0 montage
    Dti,
    /// Declared in the protocol but never analysed
    Ignore,
    /// Field map for fMRI, displayed as a structural montage
    DmapFmri,
    /// Field map for DWI, displayed as a structural montage
    DmapDmri,
    /// Phantom-only diffusion pipeline (licensed)
    QaDti,
    /// Phantom-only ABCD fMRI pipeline
    AbcdFmri,
}

impl QcStrategy {
    pub const ALL: [QcStrategy; 8] = [
        QcStrategy::Anat,
        QcStrategy::Fmri,
        QcStrategy::Dti,
        QcStrategy::Ignore,
        QcStrategy::DmapFmri,
        QcStrategy::DmapDmri,
        QcStrategy::QaDti,
        QcStrategy::AbcdFmri,
    ];

    /// Configuration name of the strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            QcStrategy::Anat => "anat",
            QcStrategy::Fmri => "fmri",
            QcStrategy::Dti => "dti",
            QcStrategy::Ignore => "ignore",
            QcStrategy::DmapFmri => "dmap_fmri",
            QcStrategy::DmapDmri => "dmap_dmri",
            QcStrategy::QaDti => "qa_dti",
            QcStrategy::AbcdFmri => "abcd_fmri",
        }
    }
}

impl fmt::Display for QcStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QcStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QcStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| Error::Config(format!("Unknown QC strategy '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for strategy in QcStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<QcStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn test_unknown_name_is_config_error() {
        let err = "dwi_magic".parse::<QcStrategy>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("dwi_magic"));
    }
}

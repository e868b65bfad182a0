//! Error types for the efficiency pipeline

use std::fmt;

use thiserror::Error;

use crate::session::Stage;

/// The fit that failed to converge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitStage {
    Calibration,
    PeakShape,
    EfficiencyCurve,
}

impl fmt::Display for FitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Calibration => "calibration",
            Self::PeakShape => "peak shape",
            Self::EfficiencyCurve => "efficiency curve",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Ratio correlation could not identify enough literature lines, even after discarding
    /// every possible leading peak. Usually the wrong isotope was selected, or the search
    /// sensitivity needs adjusting.
    #[error("insufficient matches: at least {required} literature lines must be identified, best attempt found {best}")]
    InsufficientMatches { required: usize, best: usize },

    /// The decay correction is undefined for the supplied inputs
    #[error("degenerate activity: {0}")]
    DegenerateActivity(String),

    /// A fit failed to produce usable parameters. The caller may retry with new seeds, or
    /// supply a manual value.
    #[error("{stage} fit did not converge: {reason}")]
    FitNonConvergence { stage: FitStage, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The session was asked to do something its current stage does not allow
    #[error("operation requires stage {expected:?}, session is at {actual:?}")]
    InvalidState { expected: Stage, actual: Stage },

    #[error("isotope {0} is not present in the literature library")]
    UnknownIsotope(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn non_convergence(stage: FitStage, reason: impl fmt::Display) -> Self {
        Self::FitNonConvergence {
            stage,
            reason: reason.to_string(),
        }
    }
}

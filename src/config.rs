//! Run metadata and pipeline tuning, read from TOML
//!
//! ```toml
//! [run]
//! isotope = "60Co"
//! reference_activity = { value = 10000.0, uncertainty = 200.0 }
//! reference_date = "2021-11-01"
//! measurement_date = "2021-11-11"
//! run_time = { value = 3600.0, uncertainty = 1.0 }
//!
//! [pipeline.search]
//! sensitivity = 0.0005
//! ```
//!
//! Every `[pipeline]` table and field is optional.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::measurement::Measurement;
use crate::{Error, Result};

/// Run time uncertainty assumed when none is given, in seconds
pub const DEFAULT_RUN_TIME_UNCERTAINTY: f64 = 1.0;

/// Description of the calibration run, as entered by the operator
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RunMetadata {
    pub isotope: String,
    /// Certified source activity in Bq
    pub reference_activity: Measurement<f64>,
    /// Date the certified activity refers to
    pub reference_date: NaiveDate,
    /// Date of the calibration run
    pub measurement_date: NaiveDate,
    /// Live time of the calibration run in seconds
    pub run_time: Measurement<f64>,
}

impl RunMetadata {
    /// Run time, with a zero uncertainty replaced by [`DEFAULT_RUN_TIME_UNCERTAINTY`]
    pub fn effective_run_time(&self) -> Measurement<f64> {
        if self.run_time.uncertainty == 0.0 {
            Measurement::new(self.run_time.value, DEFAULT_RUN_TIME_UNCERTAINTY)
        } else {
            self.run_time
        }
    }

    /// # Errors
    /// Returns an error if the activity or run time are not positive.
    pub fn validate(&self) -> Result<()> {
        if self.reference_activity.value <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "reference activity must be positive, got {}",
                self.reference_activity.value
            )));
        }
        if self.run_time.value <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "run time must be positive, got {}",
                self.run_time.value
            )));
        }
        if self.reference_activity.uncertainty < 0.0 || self.run_time.uncertainty < 0.0 {
            return Err(Error::InvalidInput(
                "uncertainties must not be negative".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Smallest peak height as a fraction of the tallest, smaller finds more peaks
    pub sensitivity: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.0005,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Relative tolerance on the ratio of peak positions
    pub ratio_tolerance: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ratio_tolerance: 0.01,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PeakFitConfig {
    /// Channels either side of the candidate included in the fit
    pub half_window: f64,
    /// Initial Gaussian width in channels
    pub sigma_seed: f64,
}

impl Default for PeakFitConfig {
    fn default() -> Self {
        Self {
            half_window: 14.0,
            sigma_seed: 1.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EfficiencyConfig {
    /// Largest distance between a fitted centroid and a literature line, in keV
    pub energy_tolerance: f64,
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            energy_tolerance: 2.3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iters: u64,
    /// Convergence threshold on the change in cost between iterations
    pub tolerance: f64,
    /// Log every solver iteration to the terminal
    pub log_iterations: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: f64::EPSILON.sqrt(),
            log_iterations: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub search: SearchConfig,
    pub correlation: CorrelationConfig,
    pub peak_fit: PeakFitConfig,
    pub efficiency: EfficiencyConfig,
    pub solver: SolverConfig,
}

/// Everything needed to analyse one calibration run
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RunConfig {
    pub run: RunMetadata,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl RunConfig {
    /// # Errors
    /// Returns an error if the document is malformed or the run metadata is invalid.
    pub fn from_toml(document: &str) -> Result<Self> {
        let config: Self = toml::from_str(document)?;
        config.run.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if the file cannot be read, or its contents are invalid.
    pub fn from_file(filepath: &Path) -> Result<Self> {
        let document = fs::read_to_string(filepath)?;
        Self::from_toml(&document)
    }
}

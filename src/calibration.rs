//! Linear channel to energy calibration

use itertools::Itertools;
use tracing::info;

use crate::config::SolverConfig;
use crate::correlation::Correlation;
use crate::minimisation::{Bound, CurveFit, Model};
use crate::spectrum::Histogram;
use crate::{Error, FitStage, Result};

/// `energy = slope * channel + intercept`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub slope: f64,
    pub intercept: f64,
}

impl Calibration {
    pub fn energy(&self, channel: f64) -> f64 {
        self.slope.mul_add(channel, self.intercept)
    }

    /// Inverse of [`Calibration::energy`]
    pub fn channel(&self, energy: f64) -> f64 {
        (energy - self.intercept) / self.slope
    }

    /// A copy of `histogram` with its axis in energy
    pub fn rescale<H: Histogram>(&self, histogram: &H) -> H {
        histogram.rescaled(|channel| self.energy(channel))
    }
}

#[derive(Clone, Copy)]
struct Linear;

impl Model for Linear {
    fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        params[0].mul_add(x, params[1])
    }
}

/// Fit a calibration through matched `(channel, energy)` pairs
///
/// The slope is constrained to be non-negative.
///
/// # Errors
/// Returns an error if the slices differ in length, fewer than two distinct channels are given,
/// or the fit fails.
pub fn fit_linear(
    channels: &[f64],
    energies: &[f64],
    solver: &SolverConfig,
) -> Result<Calibration> {
    if channels.len() != energies.len() {
        return Err(Error::InvalidInput(format!(
            "{} channels paired with {} energies",
            channels.len(),
            energies.len()
        )));
    }
    let distinct = channels
        .iter()
        .map(|channel| channel.to_bits())
        .unique()
        .count();
    if distinct < 2 {
        return Err(Error::InvalidInput(
            "a calibration needs at least two distinct channels".to_owned(),
        ));
    }

    // Seed with the chord between the outermost matches
    let (first, last) = channels
        .iter()
        .copied()
        .zip(energies.iter().copied())
        .fold(
            ((f64::INFINITY, 0.), (f64::NEG_INFINITY, 0.)),
            |(low, high), point| {
                (
                    if point.0 < low.0 { point } else { low },
                    if point.0 > high.0 { point } else { high },
                )
            },
        );
    let initial_slope = ((last.1 - first.1) / (last.0 - first.0)).max(0.0);
    let initial_intercept = initial_slope.mul_add(-first.0, first.1);

    let fit = CurveFit::new(
        Linear,
        channels,
        energies,
        vec![initial_slope, initial_intercept],
    )
    .with_bound(0, Bound::AtLeast(0.0))
    .solve(solver, FitStage::Calibration)?;

    let calibration = Calibration {
        slope: fit.params[0],
        intercept: fit.params[1],
    };
    if calibration.slope <= 0.0 {
        return Err(Error::non_convergence(
            FitStage::Calibration,
            "matched peaks do not increase in energy with channel",
        ));
    }

    info!(
        slope = calibration.slope,
        intercept = calibration.intercept,
        first_channel = first.0,
        last_channel = last.0,
        "energy calibration"
    );
    Ok(calibration)
}

/// Fit a calibration through the matches of a ratio correlation
///
/// # Errors
/// See [`fit_linear`].
pub fn calibrate(correlation: &Correlation, solver: &SolverConfig) -> Result<Calibration> {
    fit_linear(&correlation.channels(), &correlation.energies(), solver)
}

//! Full-energy peak efficiency of the detector
//!
//! Each accepted photopeak gives one efficiency point, the fraction of photons emitted in the
//! identified line which were counted in the photopeak
//! $$
//!     \varepsilon = \frac{N}{A t Y}
//! $$
//! The points are then described by a log-quadratic amplitude gated by a smooth threshold,
//! with $z = \ln E$
//! $$
//!     \varepsilon(E) = \exp\left((p_0 + p_1 z + p_2 z^2) \frac{2}{\pi}
//!         \arctan\left(e^{p_3 + p_4 z + p_5 z^2}\right) - 25\right)
//! $$
//! The gate describes the low energy roll off, the amplitude the fall at high energy.

use std::f64::consts::FRAC_2_PI;

use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::activity::ActivityRecord;
use crate::config::{EfficiencyConfig, SolverConfig};
use crate::literature::Isotope;
use crate::math::polyfit;
use crate::measurement::{quadrature, Measurement};
use crate::minimisation::{Bound, CurveFit, FitResult, Model};
use crate::peak::FittedPeak;
use crate::{Error, FitStage, Result};

/// Number of parameters in the efficiency model
pub const NUM_PARAMS: usize = 6;

/// Constant offset of the model exponent
const OFFSET: f64 = 25.0;

/// Admissible range of the constant amplitude term
const AMPLITUDE_BOUND: (f64, f64) = (0.0, 1e5);

/// Initial gate parameters, a nearly open gate flat in energy
const GATE_SEED: [f64; 3] = [2.0, 0.0, 0.0];

/// Penalty on the gate parameters wandering from the amplitude-only solution
const GATE_DAMPING: f64 = 1e-3;

/// Efficiency measured at a single literature line
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EfficiencyPoint {
    /// Literature energy of the identified line
    pub energy: Measurement<f64>,
    pub efficiency: Measurement<f64>,
    /// Index of the fitted peak the point was computed from
    pub peak_index: usize,
    /// Index of the line in the isotope's line list
    pub line_index: usize,
}

/// Efficiency of a photopeak holding `area` counts
///
/// The counting variance of the area is taken as the area itself, all other inputs contribute
/// their relative uncertainty.
pub fn point_efficiency(
    area: f64,
    intensity: Measurement<f64>,
    run_time: Measurement<f64>,
    activity: Measurement<f64>,
) -> Measurement<f64> {
    let efficiency = area / (activity.value * run_time.value * intensity.value);
    let relative = quadrature([
        area.recip().sqrt(),
        intensity.relative_uncertainty(),
        run_time.relative_uncertainty(),
        activity.relative_uncertainty(),
    ]);
    Measurement::new(efficiency, (efficiency * relative).abs())
}

/// Efficiency points for every fitted peak identified with a literature line
///
/// A peak is identified with the first line of `isotope` within `tolerance` of its centroid.
/// Peaks with no such line, or identified with a line of zero yield, give no point.
pub fn efficiency_points(
    fitted: &[FittedPeak],
    isotope: &Isotope,
    activity: &ActivityRecord,
    run_time: Measurement<f64>,
    tolerance: f64,
) -> Vec<EfficiencyPoint> {
    fitted
        .iter()
        .enumerate()
        .filter_map(|(peak_index, peak)| {
            let Some((line_index, line)) = isotope.line_near(peak.centroid_energy, tolerance)
            else {
                debug!(
                    energy = peak.centroid_energy,
                    "fitted peak matches no literature line"
                );
                return None;
            };
            if line.intensity.value <= 0.0 {
                debug!(
                    energy = line.energy.value,
                    "literature line carries no yield"
                );
                return None;
            }
            if peak.area.value <= 0.0 {
                warn!(
                    energy = peak.centroid_energy,
                    area = peak.area.value,
                    "skipping peak without counts"
                );
                return None;
            }
            let efficiency =
                point_efficiency(peak.area.value, line.intensity, run_time, activity.activity);
            Some(EfficiencyPoint {
                energy: line.energy,
                efficiency,
                peak_index,
                line_index,
            })
        })
        .collect()
}

fn gate(params: &[f64], z: f64) -> f64 {
    FRAC_2_PI * params[5].mul_add(z * z, params[4].mul_add(z, params[3])).exp().atan()
}

fn amplitude(params: &[f64], z: f64) -> f64 {
    params[2].mul_add(z * z, params[1].mul_add(z, params[0]))
}

fn evaluate(params: &[f64], energy: f64) -> f64 {
    let z = energy.ln();
    amplitude(params, z).mul_add(gate(params, z), -OFFSET).exp()
}

#[derive(Clone, Copy)]
struct EfficiencyFunction;

impl Model for EfficiencyFunction {
    fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        evaluate(params, x)
    }
}

/// Fitted efficiency curve
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EfficiencyModel {
    params: [f64; NUM_PARAMS],
    energy_range: (f64, f64),
    chi_squared: f64,
}

impl EfficiencyModel {
    pub fn evaluate(&self, energy: f64) -> f64 {
        evaluate(&self.params, energy)
    }

    pub const fn params(&self) -> &[f64; NUM_PARAMS] {
        &self.params
    }

    /// Lowest and highest energy the model was fitted over
    ///
    /// Nothing is guaranteed about the model outside this range.
    pub const fn energy_range(&self) -> (f64, f64) {
        self.energy_range
    }

    pub const fn chi_squared(&self) -> f64 {
        self.chi_squared
    }
}

/// Fit the efficiency model to `points`, weighted by their uncertainties
///
/// The amplitude is seeded from a weighted polynomial fit of the logarithm of the efficiency
/// with the gate held at its seed, and refined with the gate fixed. The gate is then released.
/// Should that fit fail the fixed-gate solution is kept. Parameters beyond the number of distinct
/// energies are never released, repeated energies constrain nothing new.
///
/// # Errors
/// Returns an error if there are no points, a point has a non-positive efficiency or
/// uncertainty, or the fixed-gate fit fails.
pub fn fit_efficiency_curve(
    points: &[EfficiencyPoint],
    solver: &SolverConfig,
) -> Result<EfficiencyModel> {
    if points.is_empty() {
        return Err(Error::InvalidInput(
            "an efficiency curve needs at least one point".to_owned(),
        ));
    }
    if points
        .iter()
        .any(|p| !(p.efficiency.value > 0.0 && p.efficiency.uncertainty > 0.0))
    {
        return Err(Error::InvalidInput(
            "efficiencies and their uncertainties must be positive".to_owned(),
        ));
    }

    let energies = points.iter().map(|p| p.energy.value).collect::<Vec<_>>();
    let efficiencies = points.iter().map(|p| p.efficiency.value).collect::<Vec<_>>();
    let sigma = points
        .iter()
        .map(|p| p.efficiency.uncertainty)
        .collect::<Vec<_>>();
    let energy_range = energies
        .iter()
        .copied()
        .minmax()
        .into_option()
        .unwrap_or_default();

    // With the gate fixed, the log of the efficiency is a polynomial in log energy
    let mut seed = [0.0, 0.0, 0.0, GATE_SEED[0], GATE_SEED[1], GATE_SEED[2]];
    let open = gate(&seed, 0.0);
    let z = energies.iter().map(|e| e.ln()).collect::<Vec<_>>();
    let target = efficiencies
        .iter()
        .map(|eff| (eff.ln() + OFFSET) / open)
        .collect::<Vec<_>>();
    let weights = points
        .iter()
        .map(|p| open / p.efficiency.relative_uncertainty())
        .collect::<Vec<_>>();
    let distinct = energies.iter().map(|e| e.to_bits()).unique().count();
    let degree = distinct.min(3) - 1;
    for (param, value) in seed
        .iter_mut()
        .zip(polyfit(&z, &target, degree, Some(&weights))?)
    {
        *param = value;
    }
    debug!(?seed, "efficiency seed");

    let released = distinct.min(NUM_PARAMS);
    let fit = |free: usize, initial: Vec<f64>, damping: f64| {
        (free..NUM_PARAMS)
            .fold(
                CurveFit::new(EfficiencyFunction, &energies, &efficiencies, initial)
                    .with_uncertainties(&sigma)
                    .with_bound(
                        0,
                        Bound::Within(AMPLITUDE_BOUND.0, AMPLITUDE_BOUND.1),
                    )
                    .with_damping(damping),
                CurveFit::with_fixed,
            )
            .solve(solver, FitStage::EfficiencyCurve)
    };

    let mut result = fit(released.min(3), seed.to_vec(), 0.0)?;
    if released > 3 {
        let gated = fit(released, result.params.clone(), GATE_DAMPING);
        result = released_or_fixed(result, gated);
    }

    let mut params = [0.0; NUM_PARAMS];
    params.copy_from_slice(&result.params);
    let model = EfficiencyModel {
        params,
        energy_range,
        chi_squared: result.chi_squared,
    };
    info!(
        ?params,
        chi_squared = result.chi_squared,
        points = points.len(),
        "efficiency curve"
    );
    Ok(model)
}

/// The gate-released fit if it converged, otherwise the fixed-gate fit
fn released_or_fixed(fixed: FitResult, released: Result<FitResult>) -> FitResult {
    released.unwrap_or_else(|e| {
        warn!("keeping the efficiency gate fixed: {e}");
        fixed
    })
}

/// Efficiency points and the model fitted through them
#[derive(Clone, Debug, PartialEq)]
pub struct EfficiencyCurve {
    pub points: Vec<EfficiencyPoint>,
    pub model: EfficiencyModel,
}

/// Compute the efficiency of every identified photopeak and fit the efficiency model
///
/// # Errors
/// Returns an error if no fitted peak is identified with a literature line, or the model fit
/// fails.
pub fn compute_efficiency(
    fitted: &[FittedPeak],
    isotope: &Isotope,
    activity: &ActivityRecord,
    run_time: Measurement<f64>,
    config: &EfficiencyConfig,
    solver: &SolverConfig,
) -> Result<EfficiencyCurve> {
    let points = efficiency_points(fitted, isotope, activity, run_time, config.energy_tolerance);
    if points.is_empty() {
        return Err(Error::InvalidInput(format!(
            "none of the {} fitted peaks lies within {} of a line of {}",
            fitted.len(),
            config.energy_tolerance,
            isotope.name
        )));
    }
    for point in &points {
        debug!(
            energy = point.energy.value,
            efficiency = point.efficiency.value,
            uncertainty = point.efficiency.uncertainty,
            "efficiency point"
        );
    }
    let model = fit_efficiency_curve(&points, solver)?;
    Ok(EfficiencyCurve { points, model })
}

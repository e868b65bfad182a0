//! Photopeak shape fitting
//!
//! Each photopeak is described by a Gaussian sitting on a step-shaped background: the Compton
//! continuum of the line steps down across the peak, which is modelled by a complementary error
//! function centred on the peak
//! $$
//!     f(x) = h e^{-(x - c)^2 / 2\sigma^2} + a + b \operatorname{erfc}\left(\frac{x - c}{w}\right)
//! $$
//! The photopeak area is the integral of the model less the integral of the background over the
//! fit window, which is the integral of the Gaussian alone.

use std::f64::consts::{FRAC_PI_2, SQRT_2};

use statrs::function::erf::{erf, erfc};
use tracing::{debug, warn};

use crate::calibration::Calibration;
use crate::config::{PeakFitConfig, SolverConfig};
use crate::measurement::Measurement;
use crate::minimisation::{Bound, CurveFit, Model};
use crate::spectrum::Histogram;
use crate::{Error, FitStage, Result};

/// Smallest width admitted for the Gaussian and the background step, in channels
const MINIMUM_WIDTH: f64 = 0.05;

/// Penalty on the parameters leaving their seeds, settles the step width under a flat background
const SEED_DAMPING: f64 = 1e-3;

/// Parameters of the peak model, in channel units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakShape {
    pub height: f64,
    pub center: f64,
    pub sigma: f64,
    /// Background level well above the peak
    pub vertical_shift: f64,
    /// Width of the background step
    pub horizontal_stretch: f64,
    /// Half the height of the background step
    pub vertical_stretch: f64,
}

impl PeakShape {
    fn from_params(params: &[f64]) -> Self {
        Self {
            height: params[0],
            center: params[1],
            sigma: params[2],
            vertical_shift: params[3],
            horizontal_stretch: params[4],
            vertical_stretch: params[5],
        }
    }

    const fn to_params(self) -> [f64; 6] {
        [
            self.height,
            self.center,
            self.sigma,
            self.vertical_shift,
            self.horizontal_stretch,
            self.vertical_stretch,
        ]
    }

    pub fn gaussian(&self, x: f64) -> f64 {
        self.height * (-(x - self.center).powi(2) / (2. * self.sigma.powi(2))).exp()
    }

    pub fn background(&self, x: f64) -> f64 {
        self.vertical_stretch.mul_add(
            erfc((x - self.center) / self.horizontal_stretch),
            self.vertical_shift,
        )
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.gaussian(x) + self.background(x)
    }

    /// Integral of the Gaussian component over `low..high`
    pub fn gaussian_integral(&self, low: f64, high: f64) -> f64 {
        let scale = self.sigma.abs() * SQRT_2;
        self.height
            * self.sigma.abs()
            * FRAC_PI_2.sqrt()
            * (erf((high - self.center) / scale) - erf((low - self.center) / scale))
    }

    pub const fn background_seed(&self) -> BackgroundSeed {
        BackgroundSeed {
            vertical_shift: self.vertical_shift,
            horizontal_stretch: self.horizontal_stretch,
            vertical_stretch: self.vertical_stretch,
        }
    }
}

/// Starting values for the background parameters, carried from one peak fit to the next
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackgroundSeed {
    pub vertical_shift: f64,
    pub horizontal_stretch: f64,
    pub vertical_stretch: f64,
}

#[derive(Clone, Copy)]
struct GaussianOnStep;

impl Model for GaussianOnStep {
    fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        PeakShape::from_params(params).evaluate(x)
    }
}

/// Outcome of fitting a single photopeak
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakFit {
    pub shape: PeakShape,
    /// Fitted centre, in energy
    pub centroid_energy: f64,
    /// Background subtracted photopeak area in counts, with its counting uncertainty
    pub area: Measurement<f64>,
    /// Whether the area is usable: finite, positive and centred inside the window
    pub area_ok: bool,
    /// Channel range the fit was performed over
    pub window: (f64, f64),
    pub chi_squared: f64,
}

/// A photopeak accepted by the operator
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FittedPeak {
    /// Index of the matched peak this was fitted from
    pub match_index: usize,
    pub centroid_energy: f64,
    pub area: Measurement<f64>,
    /// The operator replaced the fitted area
    pub manual: bool,
}

/// Fit the photopeak near `approx_center`
///
/// Bins whose centres lie within `config.half_window` channels of `approx_center` are fitted.
/// The background parameters start from `seed` when given, otherwise from the counts at the
/// edges of the window.
///
/// # Errors
/// Returns an error if the window holds too few bins to constrain the model, or the fit fails to
/// converge.
pub fn fit_peak<H: Histogram>(
    histogram: &H,
    calibration: &Calibration,
    approx_center: f64,
    approx_height: f64,
    seed: Option<BackgroundSeed>,
    config: &PeakFitConfig,
    solver: &SolverConfig,
) -> Result<PeakFit> {
    let low = approx_center - config.half_window;
    let high = approx_center + config.half_window;

    let (x, y): (Vec<f64>, Vec<f64>) = (0..histogram.bin_count())
        .map(|bin| (histogram.bin_center(bin), histogram.bin_content(bin)))
        .filter(|(center, _)| (low..=high).contains(center))
        .unzip();
    if x.len() < 7 {
        return Err(Error::non_convergence(
            FitStage::PeakShape,
            format!("window around channel {approx_center} holds only {} bins", x.len()),
        ));
    }
    // Poisson standard deviation of each bin, empty bins weighted as a single count
    let sigma = y.iter().map(|counts| counts.max(1.0).sqrt()).collect::<Vec<_>>();

    let seed = seed.unwrap_or_else(|| edge_seed(&y, config));
    let initial = PeakShape {
        height: approx_height,
        center: approx_center,
        sigma: config.sigma_seed,
        vertical_shift: seed.vertical_shift,
        horizontal_stretch: seed.horizontal_stretch,
        vertical_stretch: seed.vertical_stretch,
    };

    let fit = CurveFit::new(GaussianOnStep, &x, &y, initial.to_params().to_vec())
        .with_uncertainties(&sigma)
        .with_bound(0, Bound::AtLeast(0.0))
        .with_bound(2, Bound::AtLeast(MINIMUM_WIDTH))
        .with_bound(4, Bound::AtLeast(MINIMUM_WIDTH))
        .with_damping(SEED_DAMPING)
        .solve(solver, FitStage::PeakShape)?;

    let shape = PeakShape::from_params(&fit.params);
    let area = shape.gaussian_integral(low, high);
    let area_ok = area.is_finite() && area > 0.0 && (low..=high).contains(&shape.center);
    if !area_ok {
        warn!(
            approx_center,
            center = shape.center,
            area,
            "peak fit produced an unusable area"
        );
    }

    let peak = PeakFit {
        shape,
        centroid_energy: calibration.energy(shape.center),
        area: Measurement::new(area, area.abs().sqrt()),
        area_ok,
        window: (low, high),
        chi_squared: fit.chi_squared,
    };
    debug!(
        center = shape.center,
        energy = peak.centroid_energy,
        sigma = shape.sigma,
        area,
        chi_squared = fit.chi_squared,
        "fitted photopeak"
    );
    Ok(peak)
}

/// Background seed from the mean counts in the outermost bins of the window
#[allow(clippy::cast_precision_loss)]
fn edge_seed(y: &[f64], config: &PeakFitConfig) -> BackgroundSeed {
    let edge = (y.len() / 5).max(1);
    let left = y[..edge].iter().sum::<f64>() / edge as f64;
    let right = y[y.len() - edge..].iter().sum::<f64>() / edge as f64;
    BackgroundSeed {
        vertical_shift: right,
        horizontal_stretch: 2.0 * config.sigma_seed,
        vertical_stretch: 0.5 * (left - right),
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::{fit_peak, BackgroundSeed, PeakShape};
    use crate::calibration::Calibration;
    use crate::config::{PeakFitConfig, SolverConfig};
    use crate::spectrum::Spectrum;
    use crate::{Error, FitStage};

    const CALIBRATION: Calibration = Calibration {
        slope: 0.5,
        intercept: 1.0,
    };

    fn synthetic(shapes: &[PeakShape], bins: usize) -> Spectrum {
        let counts = (0..bins)
            .map(|bin| {
                #[allow(clippy::cast_precision_loss)]
                let x = bin as f64;
                // Backgrounds are shared, only count the first
                shapes[0].background(x) + shapes.iter().map(|s| s.gaussian(x)).sum::<f64>()
            })
            .collect();
        Spectrum::from_channels(counts).unwrap()
    }

    fn injected() -> PeakShape {
        PeakShape {
            height: 1000.0,
            center: 512.3,
            sigma: 2.5,
            vertical_shift: 50.0,
            horizontal_stretch: 3.0,
            vertical_stretch: 20.0,
        }
    }

    #[test]
    fn injected_peak_is_recovered() {
        let truth = injected();
        let spectrum = synthetic(&[truth], 1024);

        let fit = fit_peak(
            &spectrum,
            &CALIBRATION,
            512.0,
            1070.0,
            None,
            &PeakFitConfig::default(),
            &SolverConfig::default(),
        )
        .unwrap();

        let expected_area = truth.height * truth.sigma * (2. * PI).sqrt();
        approx::assert_relative_eq!(fit.shape.center, truth.center, max_relative = 1e-3);
        approx::assert_relative_eq!(fit.area.value, expected_area, max_relative = 1e-2);
        approx::assert_relative_eq!(
            fit.centroid_energy,
            CALIBRATION.energy(truth.center),
            max_relative = 1e-3
        );
        approx::assert_relative_eq!(fit.area.uncertainty, fit.area.value.sqrt());
        assert!(fit.area_ok);
    }

    #[test]
    fn carried_background_seed_still_converges() {
        let truth = injected();
        let spectrum = synthetic(&[truth], 1024);
        let seed = BackgroundSeed {
            vertical_shift: 40.0,
            horizontal_stretch: 2.0,
            vertical_stretch: 10.0,
        };

        let fit = fit_peak(
            &spectrum,
            &CALIBRATION,
            512.0,
            1070.0,
            Some(seed),
            &PeakFitConfig::default(),
            &SolverConfig::default(),
        )
        .unwrap();

        let expected_area = truth.height * truth.sigma * (2. * PI).sqrt();
        approx::assert_relative_eq!(fit.area.value, expected_area, max_relative = 1e-2);
    }

    #[test]
    fn gaussian_integral_over_the_real_line() {
        let shape = injected();
        approx::assert_relative_eq!(
            shape.gaussian_integral(-1e6, 1e6),
            shape.height * shape.sigma * (2. * PI).sqrt(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn background_steps_down_across_the_peak() {
        let shape = injected();
        approx::assert_relative_eq!(
            shape.background(shape.center - 100.0),
            shape.vertical_shift + 2.0 * shape.vertical_stretch,
            max_relative = 1e-12
        );
        approx::assert_relative_eq!(
            shape.background(shape.center + 100.0),
            shape.vertical_shift,
            max_relative = 1e-12
        );
    }

    #[test]
    fn window_at_the_edge_of_the_spectrum_is_too_small() {
        let spectrum = synthetic(&[injected()], 1024);
        let result = fit_peak(
            &spectrum,
            &CALIBRATION,
            1035.0,
            100.0,
            None,
            &PeakFitConfig::default(),
            &SolverConfig::default(),
        );
        assert!(matches!(
            result,
            Err(Error::FitNonConvergence {
                stage: FitStage::PeakShape,
                ..
            })
        ));
    }
}

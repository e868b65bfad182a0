//! Decay correction of the calibration source activity
//!
//! The source activity is certified at a reference date. The activity during the calibration
//! run follows from the decay law
//! $$
//!     A = A_0 e^{-\lambda \Delta t}, \quad \lambda = \ln 2 / T_{1/2}
//! $$
//! with the uncertainties of $A_0$, $T_{1/2}$ and $\Delta t$ combined to first order.

use std::f64::consts::LN_2;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::literature::Isotope;
use crate::measurement::{quadrature, Measurement};
use crate::{Error, Result};

/// Dates carry no time of day, both are taken at midnight so the elapsed time is uncertain by
/// one day.
pub const ELAPSED_TIME_UNCERTAINTY: f64 = 86_400.;

/// Source activity at the time of the calibration run, in Bq
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActivityRecord {
    pub activity: Measurement<f64>,
    /// Seconds between the reference date and the run
    pub elapsed: f64,
}

/// Central value of the decayed activity
///
/// No guard is applied: at `elapsed == 0` this returns `reference_activity` exactly.
pub fn decayed_activity(reference_activity: f64, half_life: f64, elapsed: f64) -> f64 {
    let lambda = LN_2 / half_life;
    reference_activity * (-lambda * elapsed).exp()
}

/// Activity of the source used in `isotope`, between two calendar dates
///
/// # Errors
/// - [`Error::DegenerateActivity`] when both dates coincide or the half-life is not positive,
/// as the error propagation divides by both.
/// - [`Error::InvalidInput`] when the measurement precedes the reference date.
pub fn activity_at(
    reference_activity: Measurement<f64>,
    reference_date: NaiveDate,
    measurement_date: NaiveDate,
    isotope: &Isotope,
) -> Result<ActivityRecord> {
    let elapsed = measurement_date
        .signed_duration_since(reference_date)
        .num_seconds();
    if elapsed < 0 {
        return Err(Error::InvalidInput(format!(
            "measurement date {measurement_date} precedes the reference date {reference_date}"
        )));
    }

    #[allow(clippy::cast_precision_loss)]
    let elapsed = Measurement::new(elapsed as f64, ELAPSED_TIME_UNCERTAINTY);
    let record = activity_after(reference_activity, elapsed, isotope.half_life)?;
    info!(
        isotope = %isotope.name,
        activity = record.activity.value,
        uncertainty = record.activity.uncertainty,
        "source activity at measurement"
    );
    Ok(record)
}

/// Activity after `elapsed` seconds of decay
///
/// # Errors
/// [`Error::DegenerateActivity`] if `elapsed` is zero or `half_life` is not positive.
pub fn activity_after(
    reference_activity: Measurement<f64>,
    elapsed: Measurement<f64>,
    half_life: Measurement<f64>,
) -> Result<ActivityRecord> {
    if half_life.value <= 0.0 {
        return Err(Error::DegenerateActivity(format!(
            "half-life must be positive, got {}",
            half_life.value
        )));
    }
    if elapsed.value == 0.0 {
        return Err(Error::DegenerateActivity(
            "no time elapsed between the reference and the measurement".to_owned(),
        ));
    }

    let lambda = LN_2 / half_life.value;
    let d_lambda = LN_2 * half_life.uncertainty / half_life.value.powi(2);

    let exponent = lambda * elapsed.value;
    let d_exponent = exponent * quadrature([d_lambda / lambda, elapsed.uncertainty / elapsed.value]);

    let decay = (-exponent).exp();
    let d_decay = d_exponent * decay;

    let activity = reference_activity.value * decay;
    let d_activity = activity * quadrature([reference_activity.relative_uncertainty(), d_decay / decay]);

    debug!(lambda, exponent, decay, "decay correction");

    Ok(ActivityRecord {
        activity: Measurement::new(activity, d_activity.abs()),
        elapsed: elapsed.value,
    })
}

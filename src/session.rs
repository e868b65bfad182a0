//! The analysis of a calibration run as an explicit state machine
//!
//! A [`Session`] advances through the [`Stage`]s in order. Each stage owns the data it produces:
//!
//! | stage                 | owns                                      |
//! |-----------------------|-------------------------------------------|
//! | `Searching`           | candidate peaks                           |
//! | `Correlating`         | matched peaks, calibration, activity      |
//! | `Fitting`             | fitted peaks                              |
//! | `ComputingEfficiency` | efficiency points and model               |
//!
//! Going back is only possible through [`Session::reset`], which discards everything owned by
//! the stages after the target.

use tracing::{debug, info, warn};

use crate::activity::{activity_at, ActivityRecord};
use crate::calibration::{calibrate, Calibration};
use crate::config::{PipelineConfig, RunConfig, RunMetadata};
use crate::correlation::{correlate, Correlation, MatchedPeak};
use crate::efficiency::{compute_efficiency, EfficiencyCurve};
use crate::literature::{Isotope, Library};
use crate::measurement::Measurement;
use crate::peak::{fit_peak, BackgroundSeed, FittedPeak, PeakFit};
use crate::spectrum::{
    candidate_peaks, check_sensitivity, CandidatePeak, Histogram, PeakFinder,
};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Searching,
    Correlating,
    Fitting,
    ComputingEfficiency,
}

/// State of the analysis of one calibration run
#[derive(Clone, Debug)]
pub struct Session {
    isotope: Isotope,
    run: RunMetadata,
    pipeline: PipelineConfig,
    stage: Stage,
    candidates: Vec<CandidatePeak>,
    correlation: Option<Correlation>,
    calibration: Option<Calibration>,
    activity: Option<ActivityRecord>,
    fitted: Vec<FittedPeak>,
    efficiency: Option<EfficiencyCurve>,
}

impl Session {
    /// Start a session for the run described by `config`
    ///
    /// # Errors
    /// Returns an error if the isotope is not in `library` or the run metadata is invalid.
    pub fn new(library: &Library, config: RunConfig) -> Result<Self> {
        let isotope = library.get(&config.run.isotope)?.clone();
        Self::with_isotope(isotope, config.run, config.pipeline)
    }

    /// # Errors
    /// Returns an error if the run metadata is invalid.
    pub fn with_isotope(
        isotope: Isotope,
        run: RunMetadata,
        pipeline: PipelineConfig,
    ) -> Result<Self> {
        run.validate()?;
        Ok(Self {
            isotope,
            run,
            pipeline,
            stage: Stage::Searching,
            candidates: vec![],
            correlation: None,
            calibration: None,
            activity: None,
            fitted: vec![],
            efficiency: None,
        })
    }

    pub const fn stage(&self) -> Stage {
        self.stage
    }

    pub const fn isotope(&self) -> &Isotope {
        &self.isotope
    }

    pub const fn run(&self) -> &RunMetadata {
        &self.run
    }

    pub const fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn candidates(&self) -> &[CandidatePeak] {
        &self.candidates
    }

    pub const fn correlation(&self) -> Option<&Correlation> {
        self.correlation.as_ref()
    }

    pub const fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub const fn activity(&self) -> Option<&ActivityRecord> {
        self.activity.as_ref()
    }

    /// Peaks accepted so far, in the order of their matches
    pub fn fitted(&self) -> &[FittedPeak] {
        &self.fitted
    }

    pub const fn efficiency(&self) -> Option<&EfficiencyCurve> {
        self.efficiency.as_ref()
    }

    /// Return to `stage`, discarding all data owned by later stages
    ///
    /// Resetting to a stage the session has not yet reached does nothing.
    pub fn reset(&mut self, stage: Stage) {
        if stage >= self.stage {
            return;
        }
        debug!(from = ?self.stage, to = ?stage, "reset session");
        if stage < Stage::ComputingEfficiency {
            self.efficiency = None;
        }
        if stage < Stage::Fitting {
            self.fitted.clear();
        }
        if stage < Stage::Correlating {
            self.correlation = None;
            self.calibration = None;
            self.activity = None;
        }
        self.stage = stage;
    }

    fn require(&self, expected: Stage) -> Result<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.stage,
            })
        }
    }

    /// Search `histogram` for candidate peaks, discarding any later work
    ///
    /// # Errors
    /// Returns an error if the configured sensitivity is outside (0, 1).
    pub fn search<H: Histogram, F: PeakFinder>(
        &mut self,
        histogram: &H,
        finder: &F,
    ) -> Result<&[CandidatePeak]> {
        self.reset(Stage::Searching);
        self.candidates = candidate_peaks(histogram, finder, self.pipeline.search.sensitivity)?;
        info!(found = self.candidates.len(), "candidate peaks");
        Ok(&self.candidates)
    }

    /// Change the search sensitivity and search again
    ///
    /// # Errors
    /// Returns an error if `sensitivity` is outside (0, 1), the previous sensitivity is kept.
    pub fn set_sensitivity<H: Histogram, F: PeakFinder>(
        &mut self,
        histogram: &H,
        finder: &F,
        sensitivity: f64,
    ) -> Result<&[CandidatePeak]> {
        check_sensitivity(sensitivity)?;
        self.pipeline.search.sensitivity = sensitivity;
        self.search(histogram, finder)
    }

    /// Discard a candidate the operator judges to be spurious
    ///
    /// # Errors
    /// Returns an error outside the search stage, if `index` is out of range, or if it is the only
    /// candidate left.
    pub fn remove_candidate(&mut self, index: usize) -> Result<CandidatePeak> {
        self.require(Stage::Searching)?;
        if index >= self.candidates.len() {
            return Err(Error::InvalidInput(format!(
                "candidate {index} does not exist, there are {}",
                self.candidates.len()
            )));
        }
        if self.candidates.len() == 1 {
            return Err(Error::InvalidInput(
                "cannot remove the only candidate peak".to_owned(),
            ));
        }
        Ok(self.candidates.remove(index))
    }

    /// Identify the candidates with literature lines, calibrate, and decay correct the source
    ///
    /// Any previous correlation and everything built on it is discarded first. On failure the
    /// session is left in the search stage so the candidates or sensitivity can be adjusted.
    ///
    /// # Errors
    /// Returns an error if the correlation, the calibration or the activity cannot be computed.
    pub fn correlate(&mut self) -> Result<&Correlation> {
        self.reset(Stage::Searching);

        let correlation = correlate(
            &self.candidates,
            &self.isotope,
            self.pipeline.correlation.ratio_tolerance,
        )?;
        let calibration = calibrate(&correlation, &self.pipeline.solver)?;
        let activity = activity_at(
            self.run.reference_activity,
            self.run.reference_date,
            self.run.measurement_date,
            &self.isotope,
        )?;

        self.calibration = Some(calibration);
        self.activity = Some(activity);
        self.stage = Stage::Correlating;
        Ok(self.correlation.insert(correlation))
    }

    /// Discard a matched peak and recalibrate from the remaining matches
    ///
    /// # Errors
    /// Returns an error outside the correlation stage, if the match cannot be removed, or if the
    /// remaining matches do not calibrate. The session is unchanged on error.
    pub fn remove_match(&mut self, index: usize) -> Result<MatchedPeak> {
        self.require(Stage::Correlating)?;
        let mut correlation = self.correlation.clone().ok_or(Error::InvalidState {
            expected: Stage::Correlating,
            actual: self.stage,
        })?;
        let removed = correlation.remove(index)?;
        let calibration = calibrate(&correlation, &self.pipeline.solver)?;
        self.correlation = Some(correlation);
        self.calibration = Some(calibration);
        Ok(removed)
    }

    /// A copy of `histogram` with an energy axis
    ///
    /// # Errors
    /// Returns an error if the session has not been calibrated.
    pub fn calibrated<H: Histogram>(&self, histogram: &H) -> Result<H> {
        self.calibration
            .map(|calibration| calibration.rescale(histogram))
            .ok_or(Error::InvalidState {
                expected: Stage::Correlating,
                actual: self.stage,
            })
    }

    /// Begin fitting the matched peaks of `histogram` one at a time
    ///
    /// Any peaks fitted previously are discarded.
    ///
    /// # Errors
    /// Returns an error if the session has not been correlated.
    pub fn fit_peaks<'s, H: Histogram>(
        &'s mut self,
        histogram: &'s H,
    ) -> Result<PeakFitting<'s, H>> {
        self.reset(Stage::Correlating);
        self.require(Stage::Correlating)?;
        let (Some(correlation), Some(calibration)) = (&self.correlation, self.calibration) else {
            return Err(Error::InvalidState {
                expected: Stage::Correlating,
                actual: self.stage,
            });
        };
        let matches = correlation.matches().to_vec();
        self.stage = Stage::Fitting;
        info!(peaks = matches.len(), "fitting matched peaks");

        Ok(PeakFitting {
            session: self,
            histogram,
            calibration,
            matches,
            next_match: 0,
            pending: None,
            seed: None,
        })
    }

    /// Compute and fit the efficiency from the accepted peaks
    ///
    /// # Errors
    /// Returns an error if no peaks have been fitted, none are identified with a literature line,
    /// or the model fit fails.
    pub fn compute_efficiency(&mut self) -> Result<&EfficiencyCurve> {
        self.reset(Stage::Fitting);
        self.require(Stage::Fitting)?;
        let activity = self.activity.ok_or(Error::InvalidState {
            expected: Stage::Correlating,
            actual: self.stage,
        })?;

        let curve = compute_efficiency(
            &self.fitted,
            &self.isotope,
            &activity,
            self.run.effective_run_time(),
            &self.pipeline.efficiency,
            &self.pipeline.solver,
        )?;
        self.stage = Stage::ComputingEfficiency;
        Ok(self.efficiency.insert(curve))
    }
}

/// The operator's verdict on a peak fit
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Decision {
    /// Accept the fitted area
    Approve,
    /// Accept the peak with a manually determined area in counts
    Override(f64),
    /// Drop the peak
    Reject,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    match_index: usize,
    channel: f64,
    fit: Option<PeakFit>,
}

/// Fits the matched peaks one at a time, waiting for a [`Decision`] on each
///
/// Each call to [`Iterator::next`] fits the next matched peak. The fit must be decided with
/// [`PeakFitting::decide`] before the next call, which otherwise yields an error without
/// advancing. A failed fit may still be accepted with [`Decision::Override`].
pub struct PeakFitting<'s, H> {
    session: &'s mut Session,
    histogram: &'s H,
    calibration: Calibration,
    matches: Vec<MatchedPeak>,
    next_match: usize,
    pending: Option<Pending>,
    seed: Option<BackgroundSeed>,
}

impl<'s, H: Histogram> PeakFitting<'s, H> {
    /// Matched peaks not yet fitted
    pub fn remaining(&self) -> usize {
        self.matches.len() - self.next_match
    }

    /// The matched peak awaiting a decision
    pub fn pending(&self) -> Option<&MatchedPeak> {
        self.pending
            .as_ref()
            .and_then(|pending| self.matches.get(pending.match_index))
    }

    pub fn fitted(&self) -> &[FittedPeak] {
        &self.session.fitted
    }

    /// Settle the pending fit, returning the accepted peak
    ///
    /// # Errors
    /// Returns an error if no fit is pending, an unusable fit is approved, or an override area is
    /// not positive. The fit stays pending on error.
    pub fn decide(&mut self, decision: Decision) -> Result<Option<FittedPeak>> {
        let pending = self.pending.ok_or_else(|| {
            Error::InvalidInput("no peak fit is awaiting a decision".to_owned())
        })?;

        let accepted = match decision {
            Decision::Reject => None,
            Decision::Approve => match pending.fit {
                Some(fit) if fit.area_ok => Some(FittedPeak {
                    match_index: pending.match_index,
                    centroid_energy: fit.centroid_energy,
                    area: fit.area,
                    manual: false,
                }),
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "fit of match {} has no usable area, override or reject it",
                        pending.match_index
                    )))
                }
            },
            Decision::Override(area) => {
                if !(area.is_finite() && area > 0.0) {
                    return Err(Error::InvalidInput(format!(
                        "manual area must be positive, got {area}"
                    )));
                }
                let centroid_energy = pending.fit.map_or_else(
                    || self.calibration.energy(pending.channel),
                    |fit| fit.centroid_energy,
                );
                Some(FittedPeak {
                    match_index: pending.match_index,
                    centroid_energy,
                    area: Measurement::new(area, area.sqrt()),
                    manual: true,
                })
            }
        };

        self.pending = None;
        if let Some(fit) = pending.fit.filter(|fit| fit.area_ok) {
            self.seed = Some(fit.shape.background_seed());
        }
        debug!(match_index = pending.match_index, ?decision, "peak decision");
        if let Some(peak) = accepted {
            self.session.fitted.push(peak);
        }
        Ok(accepted)
    }
}

impl<'s, H: Histogram> Iterator for PeakFitting<'s, H> {
    type Item = Result<PeakFit>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(pending) = &self.pending {
            return Some(Err(Error::InvalidInput(format!(
                "fit of match {} awaits a decision",
                pending.match_index
            ))));
        }

        let matched = *self.matches.get(self.next_match)?;
        let match_index = self.next_match;
        self.next_match += 1;

        let pipeline = self.session.pipeline;
        let result = fit_peak(
            self.histogram,
            &self.calibration,
            matched.channel,
            matched.height,
            self.seed,
            &pipeline.peak_fit,
            &pipeline.solver,
        );
        if let Err(e) = &result {
            warn!(match_index, channel = matched.channel, "peak fit failed: {e}");
        }
        self.pending = Some(Pending {
            match_index,
            channel: matched.channel,
            fit: result.as_ref().ok().copied(),
        });
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Decision, Session, Stage};
    use crate::config::{PipelineConfig, RunMetadata};
    use crate::literature::Library;
    use crate::measurement::Measurement;
    use crate::peak::PeakShape;
    use crate::spectrum::{Histogram, LocalMaxima, Spectrum};
    use crate::{Error, FitStage};

    /// keV per channel of the synthetic spectra
    const SLOPE: f64 = 0.5;

    fn run(measurement_date: NaiveDate) -> RunMetadata {
        RunMetadata {
            isotope: "60Co".to_owned(),
            reference_activity: Measurement::new(10_000., 200.),
            reference_date: NaiveDate::from_ymd_opt(2021, 11, 1).unwrap(),
            measurement_date,
            run_time: Measurement::new(3600., 1.),
        }
    }

    fn session() -> Session {
        let library = Library::builtin();
        Session::with_isotope(
            library.get("60Co").unwrap().clone(),
            run(NaiveDate::from_ymd_opt(2021, 11, 11).unwrap()),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    /// Gaussian photopeaks at every cobalt line on a flat background
    fn cobalt_spectrum() -> Spectrum {
        let library = Library::builtin();
        let shapes = library
            .get("60Co")
            .unwrap()
            .energies()
            .zip([5000., 4000., 600., 300., 400.])
            .map(|(energy, height)| PeakShape {
                height,
                center: energy / SLOPE,
                sigma: 2.5,
                vertical_shift: 0.,
                horizontal_stretch: 1.,
                vertical_stretch: 0.,
            })
            .collect::<Vec<_>>();
        let counts = (0..6000)
            .map(|bin| {
                let x = f64::from(bin);
                20. + shapes.iter().map(|shape| shape.gaussian(x)).sum::<f64>()
            })
            .collect();
        Spectrum::from_channels(counts).unwrap()
    }

    #[test]
    fn a_new_session_is_searching() {
        let session = session();
        assert_eq!(session.stage(), Stage::Searching);
        assert!(session.candidates().is_empty());
    }

    #[test]
    fn correlation_advances_and_calibrates() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        assert_eq!(session.candidates().len(), 5);

        let matches = session.correlate().unwrap().matches().len();
        assert_eq!(matches, 5);
        assert_eq!(session.stage(), Stage::Correlating);
        approx::assert_relative_eq!(session.calibration().unwrap().slope, SLOPE, max_relative = 1e-3);
        assert!(session.activity().is_some());
    }

    #[test]
    fn failed_correlation_stays_searching() {
        let spectrum = cobalt_spectrum();
        let library = Library::builtin();
        let mut session = Session::with_isotope(
            library.get("152Eu").unwrap().clone(),
            run(NaiveDate::from_ymd_opt(2021, 11, 11).unwrap()),
            PipelineConfig::default(),
        )
        .unwrap();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();

        assert!(matches!(
            session.correlate(),
            Err(Error::InsufficientMatches { .. })
        ));
        assert_eq!(session.stage(), Stage::Searching);
        assert!(session.calibration().is_none());
        assert_eq!(session.candidates().len(), 5);
    }

    #[test]
    fn activity_on_the_reference_date_is_degenerate() {
        let spectrum = cobalt_spectrum();
        let library = Library::builtin();
        let mut session = Session::with_isotope(
            library.get("60Co").unwrap().clone(),
            run(NaiveDate::from_ymd_opt(2021, 11, 1).unwrap()),
            PipelineConfig::default(),
        )
        .unwrap();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();

        assert!(matches!(
            session.correlate(),
            Err(Error::DegenerateActivity(_))
        ));
        assert_eq!(session.stage(), Stage::Searching);
        assert!(session.correlation().is_none());
    }

    #[test]
    fn reset_clears_everything_downstream() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        session.correlate().unwrap();
        {
            let mut fitting = session.fit_peaks(&spectrum).unwrap();
            fitting.next().unwrap().unwrap();
            fitting.decide(Decision::Approve).unwrap();
        }
        assert_eq!(session.stage(), Stage::Fitting);
        assert_eq!(session.fitted().len(), 1);

        // Resetting forwards is a no-op
        session.reset(Stage::ComputingEfficiency);
        assert_eq!(session.stage(), Stage::Fitting);

        session.reset(Stage::Correlating);
        assert_eq!(session.stage(), Stage::Correlating);
        assert!(session.fitted().is_empty());
        assert!(session.calibration().is_some());

        session.reset(Stage::Searching);
        assert!(session.correlation().is_none());
        assert!(session.calibration().is_none());
        assert!(session.activity().is_none());
        assert_eq!(session.candidates().len(), 5);
    }

    #[test]
    fn fitting_waits_for_a_decision() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        session.correlate().unwrap();

        let mut fitting = session.fit_peaks(&spectrum).unwrap();
        assert!(fitting.decide(Decision::Approve).is_err());
        let fit = fitting.next().unwrap().unwrap();
        assert!(fit.area_ok);
        assert!(matches!(fitting.next(), Some(Err(Error::InvalidInput(_)))));
        assert_eq!(fitting.remaining(), 4);

        assert!(fitting.decide(Decision::Override(-1.)).is_err());
        let accepted = fitting.decide(Decision::Override(1234.)).unwrap().unwrap();
        assert!(accepted.manual);
        approx::assert_relative_eq!(accepted.area.value, 1234.);
        approx::assert_relative_eq!(accepted.centroid_energy, fit.centroid_energy);

        fitting.next().unwrap().unwrap();
        assert!(fitting.decide(Decision::Reject).unwrap().is_none());
        assert_eq!(fitting.fitted().len(), 1);
    }

    #[test]
    fn failed_fits_can_only_be_overridden_or_rejected() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        session.correlate().unwrap();
        let calibration = *session.calibration().unwrap();
        let second_channel = session.correlation().unwrap().matches()[1].channel;

        // Only the first cobalt line lies on the truncated axis
        let truncated = Spectrum::from_channels(spectrum.counts()[..2400].to_vec()).unwrap();
        let mut fitting = session.fit_peaks(&truncated).unwrap();
        assert!(fitting.seed.is_none());

        let first = fitting.next().unwrap().unwrap();
        assert!(first.area_ok);
        fitting.decide(Decision::Approve).unwrap();
        let carried = Some(first.shape.background_seed());
        assert_eq!(fitting.seed, carried);

        assert!(matches!(
            fitting.next(),
            Some(Err(Error::FitNonConvergence {
                stage: FitStage::PeakShape,
                ..
            }))
        ));
        approx::assert_relative_eq!(fitting.pending().unwrap().channel, second_channel);
        assert!(matches!(
            fitting.decide(Decision::Approve),
            Err(Error::InvalidInput(_))
        ));
        // Refusing the approval leaves the fit pending
        assert!(matches!(fitting.next(), Some(Err(Error::InvalidInput(_)))));

        let accepted = fitting.decide(Decision::Override(500.)).unwrap().unwrap();
        assert!(accepted.manual);
        assert_eq!(accepted.match_index, 1);
        approx::assert_relative_eq!(accepted.centroid_energy, calibration.energy(second_channel));
        approx::assert_relative_eq!(accepted.area.uncertainty, 500_f64.sqrt());
        assert_eq!(fitting.seed, carried);

        assert!(fitting.next().unwrap().is_err());
        assert!(fitting.decide(Decision::Reject).unwrap().is_none());
        assert_eq!(fitting.seed, carried);
        assert_eq!(fitting.fitted().len(), 2);
    }

    #[test]
    fn state_errors_report_the_current_stage() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();

        assert!(matches!(
            session.remove_match(0),
            Err(Error::InvalidState {
                expected: Stage::Correlating,
                actual: Stage::Searching
            })
        ));
        assert!(matches!(
            session.fit_peaks(&spectrum),
            Err(Error::InvalidState {
                expected: Stage::Correlating,
                actual: Stage::Searching
            })
        ));

        session.correlate().unwrap();
        assert!(matches!(
            session.compute_efficiency(),
            Err(Error::InvalidState {
                expected: Stage::Fitting,
                actual: Stage::Correlating
            })
        ));
    }

    #[test]
    fn candidates_are_only_removed_while_searching() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        let removed = session.remove_candidate(4).unwrap();
        approx::assert_relative_eq!(removed.position, (2614.532 / SLOPE).round());

        session.correlate().unwrap();
        assert!(matches!(
            session.remove_candidate(0),
            Err(Error::InvalidState {
                expected: Stage::Searching,
                actual: Stage::Correlating
            })
        ));
    }

    #[test]
    fn removing_a_match_recalibrates() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        session.correlate().unwrap();
        let removed = session.remove_match(4).unwrap();
        assert_eq!(removed.line_index, 4);
        assert_eq!(session.correlation().unwrap().matches().len(), 4);
        approx::assert_relative_eq!(session.calibration().unwrap().slope, SLOPE, max_relative = 1e-3);
    }

    #[test]
    fn sensitivity_changes_search_again() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        session.correlate().unwrap();

        // Only the two cobalt lines exceed a fifth of the tallest peak
        let found = session
            .set_sensitivity(&spectrum, &LocalMaxima::default(), 0.2)
            .unwrap()
            .len();
        assert_eq!(found, 2);
        assert_eq!(session.stage(), Stage::Searching);
        assert!(session.correlation().is_none());

        assert!(session
            .set_sensitivity(&spectrum, &LocalMaxima::default(), 1.5)
            .is_err());
        approx::assert_relative_eq!(session.pipeline().search.sensitivity, 0.2);
    }

    #[test]
    fn calibrated_spectrum_needs_a_calibration() {
        let spectrum = cobalt_spectrum();
        let mut session = session();
        assert!(session.calibrated(&spectrum).is_err());
        session.search(&spectrum, &LocalMaxima::default()).unwrap();
        session.correlate().unwrap();
        let calibrated = session.calibrated(&spectrum).unwrap();
        approx::assert_relative_eq!(calibrated.range().1, 6000. * SLOPE, max_relative = 1e-3);
    }
}

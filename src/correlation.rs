//! Identification of candidate peaks with literature gamma lines
//!
//! A linear calibration through the origin preserves ratios, so the ratio of the first literature
//! energy to each other energy should reappear as the ratio of the first candidate peak to some
//! other candidate. Candidates are bound to lines wherever the two ratios agree.
//!
//! If too few lines are identified the leading candidate was most likely not the anchor line (a
//! noise peak, or a line below the anchor energy), so it is discarded and the test repeated. Only
//! the leading candidate is ever discarded: a false peak further up the spectrum is left for the
//! operator to remove.

use itertools::iproduct;
use tracing::{debug, info};

use crate::literature::Isotope;
use crate::spectrum::CandidatePeak;
use crate::{Error, Result};

/// A candidate peak bound to a literature line
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchedPeak {
    /// Position of the candidate, in channels
    pub channel: f64,
    /// Literature energy of the line
    pub energy: f64,
    pub height: f64,
    /// Index of the line in the isotope's line list
    pub line_index: usize,
}

/// Result of a successful ratio correlation
#[derive(Clone, Debug, PartialEq)]
pub struct Correlation {
    matches: Vec<MatchedPeak>,
    /// Leading candidates discarded before the correlation succeeded
    dropped_leading: usize,
}

impl Correlation {
    /// Matches in literature order, the anchor first
    ///
    /// A line or a candidate may appear more than once.
    pub fn matches(&self) -> &[MatchedPeak] {
        &self.matches
    }

    pub const fn dropped_leading(&self) -> usize {
        self.dropped_leading
    }

    pub fn channels(&self) -> Vec<f64> {
        self.matches.iter().map(|m| m.channel).collect()
    }

    pub fn energies(&self) -> Vec<f64> {
        self.matches.iter().map(|m| m.energy).collect()
    }

    pub fn heights(&self) -> Vec<f64> {
        self.matches.iter().map(|m| m.height).collect()
    }

    /// Discard a match the operator judges to be wrong
    ///
    /// # Errors
    /// Returns an error if `index` is out of range, or it is the only match left.
    pub fn remove(&mut self, index: usize) -> Result<MatchedPeak> {
        if index >= self.matches.len() {
            return Err(Error::InvalidInput(format!(
                "match {index} does not exist, there are {}",
                self.matches.len()
            )));
        }
        if self.matches.len() == 1 {
            return Err(Error::InvalidInput(
                "cannot remove the only matched peak".to_owned(),
            ));
        }
        Ok(self.matches.remove(index))
    }
}

/// Bind candidates to the lines of `isotope`, discarding leading candidates until enough lines
/// are identified
///
/// # Errors
/// [`Error::InsufficientMatches`] if fewer than two candidates remain before the isotope's
/// required number of matches is reached.
pub fn correlate(
    candidates: &[CandidatePeak],
    isotope: &Isotope,
    ratio_tolerance: f64,
) -> Result<Correlation> {
    let required = isotope.required_matches();
    let mut best = 0;

    for dropped_leading in 0..candidates.len().saturating_sub(1) {
        let matches = ratio_test(&candidates[dropped_leading..], isotope, ratio_tolerance);
        debug!(
            anchor = candidates[dropped_leading].position,
            matches = matches.len(),
            required,
            "ratio test"
        );
        if matches.len() >= required {
            info!(
                isotope = %isotope.name,
                matches = matches.len(),
                dropped_leading,
                "correlated peaks with literature lines"
            );
            return Ok(Correlation {
                matches,
                dropped_leading,
            });
        }
        best = best.max(matches.len());
    }

    Err(Error::InsufficientMatches { required, best })
}

/// Compare the ratio of the leading candidate to every other candidate with the ratio of the
/// anchor line to every other line
fn ratio_test(
    candidates: &[CandidatePeak],
    isotope: &Isotope,
    ratio_tolerance: f64,
) -> Vec<MatchedPeak> {
    let (Some(anchor_peak), Some(anchor_line)) = (candidates.first(), isotope.anchor()) else {
        return vec![];
    };

    let mut matches = vec![MatchedPeak {
        channel: anchor_peak.position,
        energy: anchor_line.energy.value,
        height: anchor_peak.height,
        line_index: 0,
    }];

    let lines = isotope.lines.iter().enumerate().skip(1);
    for ((line_index, line), peak) in iproduct!(lines, candidates.iter().skip(1)) {
        let literature_ratio = anchor_line.energy.value / line.energy.value;
        let measured_ratio = anchor_peak.position / peak.position;
        let low = measured_ratio - ratio_tolerance * measured_ratio;
        let high = measured_ratio + ratio_tolerance * measured_ratio;
        if low < literature_ratio && literature_ratio < high {
            matches.push(MatchedPeak {
                channel: peak.position,
                energy: line.energy.value,
                height: peak.height,
                line_index,
            });
        }
    }
    matches
}

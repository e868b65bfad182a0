//! Reference nuclear data for the calibration sources
//!
//! Half-lives are in seconds and energies in keV (NNDC). Lines are listed in order of detection
//! relevance: the first line of every isotope is the anchor used by the ratio correlation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::measurement::Measurement;
use crate::{Error, Result};

/// A single gamma emission line
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct GammaLine {
    pub energy: Measurement<f64>,
    /// Photons emitted in this line per decay
    pub intensity: Measurement<f64>,
}

impl GammaLine {
    const fn new(energy: f64, d_energy: f64, intensity: f64, d_intensity: f64) -> Self {
        Self {
            energy: Measurement {
                value: energy,
                uncertainty: d_energy,
            },
            intensity: Measurement {
                value: intensity,
                uncertainty: d_intensity,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Isotope {
    pub name: String,
    pub half_life: Measurement<f64>,
    pub lines: Vec<GammaLine>,
    /// Fraction of `lines` which must be identified for a correlation to be accepted
    pub min_match_fraction: f64,
}

impl Isotope {
    pub fn anchor(&self) -> Option<&GammaLine> {
        self.lines.first()
    }

    pub fn energies(&self) -> impl Iterator<Item = f64> + '_ {
        self.lines.iter().map(|line| line.energy.value)
    }

    /// Number of matches the ratio correlation must reach
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn required_matches(&self) -> usize {
        (self.min_match_fraction * self.lines.len() as f64).ceil() as usize
    }

    /// First literature line within `tolerance` of `energy`
    pub fn line_near(&self, energy: f64, tolerance: f64) -> Option<(usize, &GammaLine)> {
        self.lines
            .iter()
            .enumerate()
            .find(|(_, line)| (line.energy.value - energy).abs() < tolerance)
    }

    fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(Error::InvalidInput(format!(
                "isotope {} lists no gamma lines",
                self.name
            )));
        }
        if !(self.min_match_fraction > 0.0 && self.min_match_fraction <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "isotope {} has match fraction {} outside (0, 1]",
                self.name, self.min_match_fraction
            )));
        }
        Ok(())
    }
}

/// The set of isotopes available for calibration, keyed by name
#[derive(Clone, Debug)]
pub struct Library {
    isotopes: BTreeMap<String, Isotope>,
}

#[derive(Deserialize)]
struct LibraryFile {
    #[serde(default)]
    isotope: Vec<Isotope>,
}

impl Library {
    pub fn builtin() -> Self {
        let isotopes = [europium_152(), cobalt_60()]
            .into_iter()
            .map(|isotope| (isotope.name.clone(), isotope))
            .collect();
        Self { isotopes }
    }

    pub fn get(&self, name: &str) -> Result<&Isotope> {
        self.isotopes
            .get(name)
            .ok_or_else(|| Error::UnknownIsotope(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.isotopes.keys().map(String::as_str)
    }

    pub fn insert(&mut self, isotope: Isotope) -> Result<()> {
        isotope.validate()?;
        debug!(isotope = %isotope.name, lines = isotope.lines.len(), "adding isotope to library");
        self.isotopes.insert(isotope.name.clone(), isotope);
        Ok(())
    }

    /// Add isotopes from a TOML document of `[[isotope]]` tables
    ///
    /// An isotope with the name of an existing entry replaces it.
    ///
    /// # Errors
    /// Returns an error if the document is malformed, or any isotope has no lines or an invalid
    /// match fraction.
    pub fn extend_from_toml(&mut self, document: &str) -> Result<()> {
        let file: LibraryFile = toml::from_str(document)?;
        for isotope in file.isotope {
            self.insert(isotope)?;
        }
        Ok(())
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::builtin()
    }
}

fn europium_152() -> Isotope {
    Isotope {
        name: "152Eu".to_owned(),
        half_life: Measurement::new(426_272_112., 283_824.),
        lines: vec![
            GammaLine::new(121.782, 0.001, 0.286_678, 0.001_456),
            GammaLine::new(344.278, 0.001, 0.265_58, 0.005_129),
            GammaLine::new(411.116, 0.001, 0.022_372, 0.000_246),
            GammaLine::new(443.965, 0.003, 0.031_576, 0.000_297),
            GammaLine::new(778.904, 0.002, 0.129_603, 0.001_414),
            GammaLine::new(867.373, 0.003, 0.042_584, 0.000_274),
            GammaLine::new(964.079, 0.018, 0.146_494, 0.000_719),
            GammaLine::new(1112.069, 0.003, 0.136_855, 0.000_676),
            GammaLine::new(1212.948, 0.011, 0.014_263, 0.000_093),
            GammaLine::new(1299.140, 0.009, 0.016_254, 0.000_193),
            GammaLine::new(1408.005, 0.003, 0.210_692, 0.001_016),
        ],
        min_match_fraction: 0.7,
    }
}

// The last three lines are natural 40K, the 1173 + 1332 sum peak and 208Tl. They help the
// correlation but carry no yield for the source itself.
fn cobalt_60() -> Isotope {
    Isotope {
        name: "60Co".to_owned(),
        half_life: Measurement::new(166_344_192., 12_096.),
        lines: vec![
            GammaLine::new(1173.228, 0.003, 0.998_5, 0.000_3),
            GammaLine::new(1332.490, 0.004, 0.999_826, 0.000_006),
            GammaLine::new(1460.821, 0.006, 0., 0.),
            GammaLine::new(2505.72, 0.005, 0., 0.),
            GammaLine::new(2614.532, 0.013, 0., 0.),
        ],
        min_match_fraction: 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::Library;
    use crate::Error;

    #[test]
    fn builtin_library_holds_both_sources() {
        let library = Library::builtin();
        let names = library.names().collect::<Vec<_>>();
        assert_eq!(names, vec!["152Eu", "60Co"]);
    }

    #[test]
    fn required_matches_round_up() {
        let library = Library::builtin();
        // 0.7 * 11 = 7.7
        assert_eq!(library.get("152Eu").unwrap().required_matches(), 8);
        // 0.5 * 5 = 2.5
        assert_eq!(library.get("60Co").unwrap().required_matches(), 3);
    }

    #[test]
    fn anchor_is_the_first_line() {
        let library = Library::builtin();
        let cobalt = library.get("60Co").unwrap();
        approx::assert_relative_eq!(cobalt.anchor().unwrap().energy.value, 1173.228);
    }

    #[test]
    fn unknown_isotope_is_an_error() {
        let library = Library::builtin();
        assert!(matches!(library.get("137Cs"), Err(Error::UnknownIsotope(_))));
    }

    #[test]
    fn line_near_takes_the_first_line_in_tolerance() {
        let library = Library::builtin();
        let europium = library.get("152Eu").unwrap();
        let (index, line) = europium.line_near(344.9, 2.3).unwrap();
        assert_eq!(index, 1);
        approx::assert_relative_eq!(line.energy.value, 344.278);
        assert!(europium.line_near(600.0, 2.3).is_none());
    }

    #[test]
    fn isotopes_are_read_from_toml() {
        let document = r#"
            [[isotope]]
            name = "137Cs"
            min_match_fraction = 1.0
            half_life = { value = 949252608.0, uncertainty = 2102400.0 }

            [[isotope.lines]]
            energy = { value = 661.657, uncertainty = 0.003 }
            intensity = { value = 0.851, uncertainty = 0.002 }
        "#;
        let mut library = Library::builtin();
        library.extend_from_toml(document).unwrap();
        let caesium = library.get("137Cs").unwrap();
        assert_eq!(caesium.lines.len(), 1);
        assert_eq!(caesium.required_matches(), 1);
    }

    #[test]
    fn isotopes_without_lines_are_rejected() {
        let document = r#"
            [[isotope]]
            name = "empty"
            min_match_fraction = 0.5
            half_life = { value = 1.0, uncertainty = 0.0 }
            lines = []
        "#;
        let mut library = Library::builtin();
        assert!(matches!(
            library.extend_from_toml(document),
            Err(Error::InvalidInput(_))
        ));
    }
}

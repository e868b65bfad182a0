use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, Result};

/// A binned gamma spectrum
///
/// Bins are addressed by index, positions along the axis are channels before calibration and
/// energies after.
pub trait Histogram {
    fn bin_count(&self) -> usize;

    /// Counts in `bin`, zero for bins outside the axis
    fn bin_content(&self, bin: usize) -> f64;

    /// Position of the middle of `bin`
    ///
    /// # Panics
    /// Implementations may panic if `bin` is not below [`Histogram::bin_count`].
    fn bin_center(&self, bin: usize) -> f64;

    /// The bin containing position `x`, if `x` lies on the axis
    fn find_bin(&self, x: f64) -> Option<usize>;

    /// Lower and upper edge of the axis
    fn range(&self) -> (f64, f64);

    /// A copy of the histogram with every bin edge passed through the monotonic `mapping`
    fn rescaled(&self, mapping: impl Fn(f64) -> f64) -> Self
    where
        Self: Sized;

    fn maximum_content(&self) -> f64 {
        (0..self.bin_count())
            .map(|bin| self.bin_content(bin))
            .fold(0., f64::max)
    }
}

/// A histogram with explicit bin edges
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    /// `counts.len() + 1` increasing edges
    edges: Vec<f64>,
    counts: Vec<f64>,
}

#[derive(Deserialize)]
struct Row {
    channel: f64,
    counts: f64,
}

impl Spectrum {
    /// Build a spectrum from bin edges and counts
    ///
    /// # Errors
    /// Returns an error if there is not exactly one more edge than bins, or the edges are not
    /// strictly increasing.
    pub fn new(edges: Vec<f64>, counts: Vec<f64>) -> Result<Self> {
        if counts.is_empty() || edges.len() != counts.len() + 1 {
            return Err(Error::InvalidInput(format!(
                "{} bins need {} edges, got {}",
                counts.len(),
                counts.len() + 1,
                edges.len()
            )));
        }
        if edges.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(Error::InvalidInput(
                "bin edges must be strictly increasing".to_owned(),
            ));
        }
        Ok(Self { edges, counts })
    }

    /// Equal width bins spanning `low..high`
    ///
    /// # Errors
    /// Returns an error if `counts` is empty or `high <= low`.
    #[allow(clippy::cast_precision_loss)]
    pub fn uniform(low: f64, high: f64, counts: Vec<f64>) -> Result<Self> {
        let bins = counts.len();
        let width = (high - low) / bins as f64;
        let edges = (0..=bins).map(|ii| ii as f64).map(|ii| low + ii * width).collect();
        Self::new(edges, counts)
    }

    /// Unit width bins centred on the integer channels `0..counts.len()`
    ///
    /// # Errors
    /// Returns an error if `counts` is empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_channels(counts: Vec<f64>) -> Result<Self> {
        let bins = counts.len() as f64;
        Self::uniform(-0.5, bins - 0.5, counts)
    }

    /// Read a spectrum from a `channel,counts` CSV file with a header row
    ///
    /// Channels must be consecutive integers: each row becomes a unit width bin centred on its
    /// channel.
    ///
    /// # Errors
    /// Returns an error if the file is missing or malformed.
    pub fn from_csv(filepath: &Path) -> Result<Self> {
        if !filepath.exists() {
            return Err(Error::InvalidInput(format!(
                "spectrum file {} not found",
                filepath.display()
            )));
        }
        let file = fs::read(filepath)?;
        let spectrum = Self::from_reader(&file[..])?;
        info!(path = %filepath.display(), bins = spectrum.bin_count(), "read spectrum");
        Ok(spectrum)
    }

    /// # Errors
    /// Returns an error if the data is malformed or the channels are not consecutive.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut channels = vec![];
        let mut counts = vec![];
        for result in rdr.deserialize() {
            let record: Row = result?;
            channels.push(record.channel);
            counts.push(record.counts);
        }

        let first = *channels
            .first()
            .ok_or_else(|| Error::InvalidInput("spectrum contains no rows".to_owned()))?;
        if channels
            .windows(2)
            .any(|pair| (pair[1] - pair[0] - 1.0).abs() > f64::EPSILON)
        {
            return Err(Error::InvalidInput(
                "spectrum channels must be consecutive".to_owned(),
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        let last = first + counts.len() as f64;
        Self::uniform(first - 0.5, last - 0.5, counts)
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }
}

impl Histogram for Spectrum {
    fn bin_count(&self) -> usize {
        self.counts.len()
    }

    fn bin_content(&self, bin: usize) -> f64 {
        self.counts.get(bin).copied().unwrap_or(0.)
    }

    fn bin_center(&self, bin: usize) -> f64 {
        0.5 * (self.edges[bin] + self.edges[bin + 1])
    }

    fn find_bin(&self, x: f64) -> Option<usize> {
        let (low, high) = self.range();
        if !(low..high).contains(&x) {
            return None;
        }
        // The number of edges at or below `x`, less one, is the bin index
        Some(self.edges.partition_point(|edge| *edge <= x) - 1)
    }

    fn range(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }

    fn rescaled(&self, mapping: impl Fn(f64) -> f64) -> Self {
        Self {
            edges: self.edges.iter().copied().map(mapping).collect(),
            counts: self.counts.clone(),
        }
    }
}

/// A candidate photopeak reported by the peak search
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidatePeak {
    /// Position in channels
    pub position: f64,
    /// Counts in the bin containing `position`
    pub height: f64,
}

/// Search a histogram for local maxima
pub trait PeakFinder {
    /// Positions of peaks whose height exceeds `sensitivity` times the tallest peak
    ///
    /// `sensitivity` lies in (0, 1), smaller values find more peaks. The positions need not be
    /// ordered.
    fn find_peaks<H: Histogram>(&self, histogram: &H, sensitivity: f64) -> Vec<f64>;
}

/// Bins which hold the maximum of their neighbourhood
#[derive(Clone, Copy, Debug)]
pub struct LocalMaxima {
    /// Number of bins either side a maximum must dominate
    pub radius: usize,
}

impl Default for LocalMaxima {
    fn default() -> Self {
        Self { radius: 3 }
    }
}

impl PeakFinder for LocalMaxima {
    fn find_peaks<H: Histogram>(&self, histogram: &H, sensitivity: f64) -> Vec<f64> {
        let bins = histogram.bin_count();
        let threshold = sensitivity * histogram.maximum_content();
        // Bins closer to the edge than `radius` have no full neighbourhood to dominate
        (self.radius..bins.saturating_sub(self.radius))
            .filter(|&bin| {
                let content = histogram.bin_content(bin);
                if content <= threshold {
                    return false;
                }
                // Ties on a flat top go to the leftmost bin
                (bin - self.radius..bin).all(|other| histogram.bin_content(other) < content)
                    && (bin + 1..=bin + self.radius)
                        .all(|other| histogram.bin_content(other) <= content)
            })
            .map(|bin| histogram.bin_center(bin))
            .collect()
    }
}

/// # Errors
/// Returns an error if `sensitivity` is outside (0, 1).
pub fn check_sensitivity(sensitivity: f64) -> Result<()> {
    if sensitivity > 0.0 && sensitivity < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "sensitivity must lie in (0, 1), got {sensitivity}"
        )))
    }
}

/// Run the peak search and order the candidates by position
///
/// # Errors
/// Returns an error if `sensitivity` is outside (0, 1).
pub fn candidate_peaks<H: Histogram, F: PeakFinder>(
    histogram: &H,
    finder: &F,
    sensitivity: f64,
) -> Result<Vec<CandidatePeak>> {
    check_sensitivity(sensitivity)?;

    let mut positions = finder.find_peaks(histogram, sensitivity);
    positions.sort_by(f64::total_cmp);

    let candidates = positions
        .into_iter()
        .filter_map(|position| {
            histogram.find_bin(position).map(|bin| CandidatePeak {
                position,
                height: histogram.bin_content(bin),
            })
        })
        .collect::<Vec<_>>();

    debug!(sensitivity, found = candidates.len(), "peak search");
    Ok(candidates)
}

//! Histogram entropy and source classification
//!
//! A pulse waveform spends its time on a few well-defined levels, motion
//! artifact spreads over the whole range. The histogram Shannon entropy of
//! each separated source therefore ranks them; which end of the ranking is
//! the pulse is a configuration choice.

use crate::config::{BssConfig, EntropyConvention};
use crate::error::{BssError, BssResult};

/// Shannon entropy in bits of a `bins`-bin histogram spanning the sample range
///
/// Constant input has entropy 0. Empty input, a zero bin count or
/// non-finite samples are errors.
pub fn shannon_entropy(samples: &[f64], bins: usize) -> BssResult<f64> {
    if samples.is_empty() {
        return Err(BssError::InsufficientData { needed: 1, got: 0 });
    }
    if bins == 0 {
        return Err(BssError::InvalidConfig("histogram needs at least one bin".into()));
    }
    if samples.iter().any(|x| !x.is_finite()) {
        return Err(BssError::InvalidInput("non-finite sample in entropy input".into()));
    }

    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let range = max - min;
    if range <= 0.0 {
        return Ok(0.0);
    }

    let mut counts = vec![0usize; bins];
    for &x in samples {
        let idx = (((x - min) / range) * bins as f64) as usize;
        counts[idx.min(bins - 1)] += 1;
    }

    let n = samples.len() as f64;
    let probabilities: Vec<f64> = counts.iter().map(|&c| c as f64 / n).collect();
    let total: f64 = probabilities.iter().sum();
    if (total - 1.0).abs() > 1e-9 {
        return Err(BssError::InvalidInput(format!(
            "histogram probabilities sum to {total}, expected 1"
        )));
    }

    Ok(probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.log2())
        .sum())
}

/// Excess kurtosis (0 for a Gaussian); 0 for fewer than 2 samples or constant input
pub fn kurtosis(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / n;
    let m2 = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    if m2 <= f64::MIN_POSITIVE {
        return 0.0;
    }
    let m4 = samples.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / n;
    m4 / (m2 * m2) - 3.0
}

/// Classification of candidate sources
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Index of the candidate designated as pulse
    pub pulse: usize,
    /// Entropy of every candidate, in input order
    pub entropies: Vec<f64>,
}

impl Classification {
    /// Indices of the artifact candidates
    pub fn artifacts(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.entropies.len()).filter(move |&i| i != self.pulse)
    }
}

/// Entropy-based pulse/artifact classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntropyClassifier {
    bins: usize,
    convention: EntropyConvention,
}

impl EntropyClassifier {
    /// Create with histogram bin count and ordering convention
    pub fn new(bins: usize, convention: EntropyConvention) -> Self {
        Self { bins, convention }
    }

    /// Settings taken from the configuration
    pub fn from_config(config: &BssConfig) -> Self {
        Self::new(config.histogram_bins, config.entropy_convention)
    }

    /// Pick the pulse among at least two candidates; ties go to the lowest index
    pub fn classify(&self, candidates: &[&[f64]]) -> BssResult<Classification> {
        if candidates.len() < 2 {
            return Err(BssError::InsufficientData {
                needed: 2,
                got: candidates.len(),
            });
        }

        let entropies = candidates
            .iter()
            .map(|c| shannon_entropy(c, self.bins))
            .collect::<BssResult<Vec<f64>>>()?;

        let mut pulse = 0;
        for (i, &h) in entropies.iter().enumerate().skip(1) {
            let better = match self.convention {
                EntropyConvention::LowestIsPulse => h < entropies[pulse],
                EntropyConvention::HighestIsPulse => h > entropies[pulse],
            };
            if better {
                pulse = i;
            }
        }

        Ok(Classification { pulse, entropies })
    }
}

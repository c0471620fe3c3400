//! Separation configuration

use serde::{Deserialize, Serialize};

use crate::error::{BssError, BssResult};

/// Analysis/synthesis window for the short-time transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WindowKind {
    /// Hamming window (symmetric)
    #[default]
    Hamming,
    /// Hanning (Hann) window (symmetric)
    Hanning,
}

impl WindowKind {
    /// Parse a window name as used by external configuration layers
    pub fn from_name(name: &str) -> BssResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "hamming" => Ok(WindowKind::Hamming),
            "hanning" | "hann" => Ok(WindowKind::Hanning),
            other => Err(BssError::InvalidConfig(format!(
                "unknown window '{other}', expected 'hamming' or 'hanning'"
            ))),
        }
    }
}

/// Per-bin separation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SeparationAlgorithm {
    /// Adaptive higher-order statistics (generalized Gaussian contrast, fixed point)
    AdaptiveHos,
    /// Joint diagonalization of fourth-order cumulant matrices
    JointDiagonalization,
    /// Second-order: summed time-lagged covariances
    #[default]
    SecondOrder,
}

/// Cross-bin permutation alignment strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlignmentStrategy {
    /// Weibull fit per component + Jensen-Shannon divergence
    Divergence,
    /// Normalized correlation of per-component statistics
    #[default]
    Correlation,
}

/// Statistic compared across bins by the correlation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CorrelationFeature {
    /// Magnitude of the component over frames
    #[default]
    Envelope,
    /// Magnitude of the lagged autocovariance for lags `0..=max_lag`
    LagProfile {
        /// Largest lag
        max_lag: usize,
    },
}

/// Which end of the entropy ordering is the physiological signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EntropyConvention {
    /// Lowest histogram entropy is the pulse
    #[default]
    LowestIsPulse,
    /// Highest histogram entropy is the pulse
    HighestIsPulse,
}

/// Sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Channel {
    /// Red reflection
    Red,
    /// Infrared reflection
    #[default]
    Infrared,
}

impl Channel {
    /// Row index in a bin-slice (red first, infrared second)
    pub fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Infrared => 1,
        }
    }
}

/// Frequency-domain BSS configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BssConfig {
    /// Sample rate of both channels (Hz)
    pub sample_rate: f64,

    /// Segment length `n` in samples
    pub segment_len: usize,

    /// Overlap between consecutive segments in samples
    pub segment_overlap: usize,

    /// Short-time transform window length
    pub window_len: usize,

    /// Short-time transform window type
    pub window: WindowKind,

    /// Short-time transform hop size
    pub hop: usize,

    /// Separation algorithm applied to each frequency bin
    pub algorithm: SeparationAlgorithm,

    /// Number of lags for the second-order solver (lags `1..=lags`)
    pub lags: usize,

    /// Convergence threshold for iterative solvers
    pub tolerance: f64,

    /// Iteration cap for the adaptive solver (per component)
    pub max_iterations: usize,

    /// Sweep cap for Jacobi-based solvers
    pub max_sweeps: usize,

    /// Permutation alignment strategy
    pub alignment: AlignmentStrategy,

    /// Statistic used by the correlation strategy
    pub correlation_feature: CorrelationFeature,

    /// Histogram bin count for entropy classification
    pub histogram_bins: usize,

    /// Entropy ordering convention
    pub entropy_convention: EntropyConvention,

    /// Rescale each component to its image at the reference sensor
    pub projection_back: bool,

    /// Reference sensor for projection back
    pub reference: Channel,

    /// Process segments and bins on the rayon pool
    pub parallel: bool,
}

impl Default for BssConfig {
    fn default() -> Self {
        Self {
            sample_rate: 50.0,
            segment_len: 512,
            segment_overlap: 256,
            window_len: 32,
            window: WindowKind::Hamming,
            hop: 8,
            algorithm: SeparationAlgorithm::SecondOrder,
            lags: 10,
            tolerance: 1e-8,
            max_iterations: 500,
            max_sweeps: 100,
            alignment: AlignmentStrategy::Correlation,
            correlation_feature: CorrelationFeature::Envelope,
            histogram_bins: 32,
            entropy_convention: EntropyConvention::LowestIsPulse,
            projection_back: true,
            reference: Channel::Infrared,
            parallel: true,
        }
    }
}

impl BssConfig {
    /// Shorter segments, coarser hop, second-order solver
    pub fn fast() -> Self {
        Self {
            segment_len: 256,
            segment_overlap: 128,
            hop: 16,
            lags: 5,
            max_iterations: 200,
            max_sweeps: 30,
            ..Self::default()
        }
    }

    /// Joint diagonalization with divergence alignment and denser frames
    pub fn high_quality() -> Self {
        Self {
            hop: 4,
            algorithm: SeparationAlgorithm::JointDiagonalization,
            alignment: AlignmentStrategy::Divergence,
            tolerance: 1e-10,
            max_iterations: 1000,
            max_sweeps: 200,
            ..Self::default()
        }
    }

    /// Set the separation algorithm
    pub fn with_algorithm(mut self, algorithm: SeparationAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the alignment strategy
    pub fn with_alignment(mut self, alignment: AlignmentStrategy) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set segment length and overlap
    pub fn with_segments(mut self, segment_len: usize, segment_overlap: usize) -> Self {
        self.segment_len = segment_len;
        self.segment_overlap = segment_overlap;
        self
    }

    /// Set transform window and hop
    pub fn with_transform(mut self, window: WindowKind, window_len: usize, hop: usize) -> Self {
        self.window = window;
        self.window_len = window_len;
        self.hop = hop;
        self
    }

    /// Enable or disable parallel processing
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of frequency bins per spectrogram (one-sided)
    pub fn num_bins(&self) -> usize {
        self.window_len / 2 + 1
    }

    /// Number of transform frames per segment
    pub fn frames_per_segment(&self) -> usize {
        if self.hop == 0 || self.segment_len < self.window_len {
            return 0;
        }
        (self.segment_len - self.window_len + self.hop).div_ceil(self.hop)
    }

    /// Check every parameter; fails fast before any processing starts
    pub fn validate(&self) -> BssResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(BssError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.segment_len == 0 {
            return Err(BssError::InvalidConfig("segment length must be > 0".into()));
        }
        if self.segment_overlap >= self.segment_len {
            return Err(BssError::InvalidConfig(format!(
                "segment overlap {} must be smaller than segment length {}",
                self.segment_overlap, self.segment_len
            )));
        }
        if self.window_len < 2 {
            return Err(BssError::InvalidConfig("window length must be >= 2".into()));
        }
        if self.window_len > self.segment_len {
            return Err(BssError::InvalidConfig(format!(
                "window length {} exceeds segment length {}",
                self.window_len, self.segment_len
            )));
        }
        if self.hop == 0 || self.hop > self.window_len {
            return Err(BssError::InvalidConfig(format!(
                "hop {} must be in 1..={}",
                self.hop, self.window_len
            )));
        }
        if self.lags == 0 {
            return Err(BssError::InvalidConfig("lag count must be >= 1".into()));
        }
        if self.lags >= self.frames_per_segment() {
            return Err(BssError::InvalidConfig(format!(
                "lag count {} must be smaller than the {} frames per segment",
                self.lags,
                self.frames_per_segment()
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(BssError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 || self.max_sweeps == 0 {
            return Err(BssError::InvalidConfig("iteration and sweep caps must be >= 1".into()));
        }
        if self.histogram_bins < 2 {
            return Err(BssError::InvalidConfig("histogram needs at least 2 bins".into()));
        }
        if let CorrelationFeature::LagProfile { max_lag } = self.correlation_feature {
            if max_lag == 0 || max_lag >= self.frames_per_segment() {
                return Err(BssError::InvalidConfig(format!(
                    "lag profile needs 1..{} lags, got {max_lag}",
                    self.frames_per_segment()
                )));
            }
        }
        Ok(())
    }
}

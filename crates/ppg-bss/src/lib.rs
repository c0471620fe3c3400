//! Frequency-domain blind source separation for dual-channel PPG
//!
//! Splits red and infrared photoplethysmogram channels into a pulsatile
//! component and motion artifact:
//!
//! ## Transform
//! - Overlapping Bartlett-tapered segments
//! - Short-time Fourier transform (Hamming / Hanning) and normalized inverse
//!
//! ## Per-bin separation
//! - Whitening from the (lagged) covariance eigendecomposition
//! - Adaptive higher-order statistics, cumulant joint diagonalization or
//!   second-order lagged-covariance solvers
//! - Projection back onto a reference sensor to fix the per-bin scale
//!
//! ## Permutation alignment
//! - Weibull fit + Jensen-Shannon distance
//! - Correlation of envelopes or lag profiles
//!
//! ## Classification
//! - Histogram entropy picks the pulse, everything else is artifact
//! - Overlap-add back to a continuous signal, optional pulse-rate estimate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ppg_bss::{BssConfig, FrequencyDomainBss};
//!
//! let bss = FrequencyDomainBss::new(BssConfig::default())?;
//! let output = bss.process(&red, &infrared)?;
//! let bpm = bss.pulse_rate(&output)?;
//! ```

#![warn(missing_docs)]

pub mod alignment;
pub mod config;
pub mod entropy;
pub mod linalg;
pub mod pipeline;
pub mod rate;
pub mod segment;
pub mod separation;
pub mod stft;
pub mod whitening;

mod error;

pub use alignment::{Aligner, Alignment, PermutationAligner};
pub use config::{
    AlignmentStrategy, BssConfig, Channel, CorrelationFeature, EntropyConvention, SeparationAlgorithm, WindowKind,
};
pub use entropy::{Classification, EntropyClassifier, kurtosis, shannon_entropy};
pub use error::{BssError, BssResult};
pub use pipeline::{BssOutput, FrequencyDomainBss, SegmentReport, SegmentSeparation, SegmentStatus};
pub use rate::PulseRateEstimator;
pub use segment::{OverlapAdd, Segment, Segmenter};
pub use separation::{Separation, Separator, Solver};
pub use stft::{Spectrogram, Stft};
pub use whitening::{Whitening, WhiteningMode, whiten};

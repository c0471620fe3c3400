//! Error types for frequency-domain source separation

use thiserror::Error;

/// Separation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BssError {
    /// Invalid configuration (window, hop, segment or solver parameters)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Numerically degenerate input (non-positive-definite covariance, singular bin)
    #[error("Numerical degeneracy: {0}")]
    Degenerate(String),

    /// Buffer size mismatch
    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferMismatch { expected: usize, got: usize },

    /// Not enough samples to do the requested work
    #[error("Insufficient data: need {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Invalid input values
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// FFT backend failure
    #[error("FFT error: {0}")]
    Fft(String),
}

impl BssError {
    /// True for errors a caller can recover from locally by substituting an identity transform
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BssError::Degenerate(_))
    }
}

/// Result type for separation operations
pub type BssResult<T> = Result<T, BssError>;

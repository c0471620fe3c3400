//! Per-bin source separation
//!
//! Three interchangeable solvers working on whitened complex bin-slices:
//! - Adaptive higher-order statistics (generalized Gaussian contrast,
//!   fixed-point update, deflation)
//! - Joint diagonalization of fourth-order cumulant matrices
//! - Second-order separation from summed time-lagged covariances
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ppg_bss::separation::{Separator, Solver};
//!
//! let solver = Solver::from_config(&config);
//! let separation = solver.separate(&whitened)?;
//! let sources = separation.sources; // W · X_w
//! ```

mod adaptive;
mod jade;
mod sobi;

pub use adaptive::{AdaptiveHos, AdaptiveHosConfig, estimate_shape};
pub use jade::{JointDiagonalization, cumulant_matrices};
pub use sobi::{SecondOrder, summed_lagged_covariance};

use ndarray::Array2;
use num_complex::Complex64;

use crate::config::{BssConfig, SeparationAlgorithm};
use crate::error::{BssError, BssResult};
use crate::linalg::identity;

/// Mean power below which a bin is treated as empty
pub const ENERGY_FLOOR: f64 = 1e-20;

/// Result of separating one bin
#[derive(Debug, Clone)]
pub struct Separation {
    /// Unmixing matrix `W` acting on whitened data
    pub unmixing: Array2<Complex64>,
    /// Estimated components `S = W · X_w` (components × frames)
    pub sources: Array2<Complex64>,
    /// Iterations (adaptive) or sweeps (Jacobi solvers) spent
    pub iterations: usize,
    /// False when an iteration cap was hit
    pub converged: bool,
    /// True when the input was degenerate and the identity was returned
    pub degenerate: bool,
}

impl Separation {
    /// Identity unmixing, sources equal to the input
    pub fn identity(whitened: &Array2<Complex64>, degenerate: bool) -> Self {
        Self {
            unmixing: identity(whitened.nrows()),
            sources: whitened.clone(),
            iterations: 0,
            converged: true,
            degenerate,
        }
    }
}

/// Common trait for per-bin separators
pub trait Separator: Send + Sync {
    /// Separate a whitened bin-slice (channels × frames)
    fn separate(&self, whitened: &Array2<Complex64>) -> BssResult<Separation>;

    /// Algorithm name
    fn name(&self) -> &str;
}

/// Closed set of solvers selected by configuration
#[derive(Debug, Clone)]
pub enum Solver {
    /// Adaptive higher-order statistics
    AdaptiveHos(AdaptiveHos),
    /// Cumulant joint diagonalization
    JointDiagonalization(JointDiagonalization),
    /// Time-lagged second-order statistics
    SecondOrder(SecondOrder),
}

impl Solver {
    /// Build the solver selected by `config.algorithm`
    pub fn from_config(config: &BssConfig) -> Self {
        match config.algorithm {
            SeparationAlgorithm::AdaptiveHos => Solver::AdaptiveHos(AdaptiveHos::new(AdaptiveHosConfig {
                tolerance: config.tolerance,
                max_iterations: config.max_iterations,
                ..AdaptiveHosConfig::default()
            })),
            SeparationAlgorithm::JointDiagonalization => Solver::JointDiagonalization(JointDiagonalization::new(
                config.tolerance,
                config.max_sweeps,
            )),
            SeparationAlgorithm::SecondOrder => {
                Solver::SecondOrder(SecondOrder::new(config.lags, config.tolerance, config.max_sweeps))
            }
        }
    }

    /// Which algorithm this is
    pub fn algorithm(&self) -> SeparationAlgorithm {
        match self {
            Solver::AdaptiveHos(_) => SeparationAlgorithm::AdaptiveHos,
            Solver::JointDiagonalization(_) => SeparationAlgorithm::JointDiagonalization,
            Solver::SecondOrder(_) => SeparationAlgorithm::SecondOrder,
        }
    }
}

impl Separator for Solver {
    fn separate(&self, whitened: &Array2<Complex64>) -> BssResult<Separation> {
        match self {
            Solver::AdaptiveHos(s) => s.separate(whitened),
            Solver::JointDiagonalization(s) => s.separate(whitened),
            Solver::SecondOrder(s) => s.separate(whitened),
        }
    }

    fn name(&self) -> &str {
        match self {
            Solver::AdaptiveHos(s) => s.name(),
            Solver::JointDiagonalization(s) => s.name(),
            Solver::SecondOrder(s) => s.name(),
        }
    }
}

/// Shape checks shared by every solver; `Ok(false)` means "no usable energy"
pub(crate) fn check_input(whitened: &Array2<Complex64>, min_frames: usize) -> BssResult<bool> {
    let (channels, frames) = whitened.dim();
    if channels == 0 {
        return Err(BssError::InvalidInput("bin-slice has no channels".into()));
    }
    if frames < min_frames {
        return Err(BssError::InsufficientData {
            needed: min_frames,
            got: frames,
        });
    }
    if whitened.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
        return Err(BssError::InvalidInput("bin-slice contains non-finite values".into()));
    }
    let power = whitened.iter().map(|v| v.norm_sqr()).sum::<f64>() / whitened.len() as f64;
    Ok(power > ENERGY_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_from_config() {
        for algorithm in [
            SeparationAlgorithm::AdaptiveHos,
            SeparationAlgorithm::JointDiagonalization,
            SeparationAlgorithm::SecondOrder,
        ] {
            let solver = Solver::from_config(&BssConfig::default().with_algorithm(algorithm));
            assert_eq!(solver.algorithm(), algorithm);
            assert!(!solver.name().is_empty());
        }
    }

    #[test]
    fn test_zero_input_gives_identity() {
        let x = Array2::<Complex64>::zeros((2, 64));
        for algorithm in [
            SeparationAlgorithm::AdaptiveHos,
            SeparationAlgorithm::JointDiagonalization,
            SeparationAlgorithm::SecondOrder,
        ] {
            let solver = Solver::from_config(&BssConfig::default().with_algorithm(algorithm));
            let result = solver.separate(&x).unwrap();
            assert!(result.degenerate, "{}", solver.name());
            assert_eq!(result.unmixing, identity(2));
        }
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut x = Array2::<Complex64>::zeros((2, 64));
        x[[0, 3]] = Complex64::new(f64::NAN, 0.0);
        let solver = Solver::from_config(&BssConfig::default());
        assert!(matches!(solver.separate(&x), Err(BssError::InvalidInput(_))));
    }
}

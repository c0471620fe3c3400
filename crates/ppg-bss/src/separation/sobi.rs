//! Second-order separation from time-lagged covariances

use ndarray::Array2;
use num_complex::Complex64;

use super::{Separation, Separator, check_input};
use crate::error::BssResult;
use crate::linalg::{Givens, conj_transpose, hermitian_part, identity, lagged_covariance, off_diagonal_ratio};

/// Sum of the Hermitian parts of `R(τ)` for `τ = 1..=lags`
pub fn summed_lagged_covariance(x: &Array2<Complex64>, lags: usize) -> Array2<Complex64> {
    let n = x.nrows();
    let mut sum = Array2::<Complex64>::zeros((n, n));
    for lag in 1..=lags {
        sum += &hermitian_part(&lagged_covariance(x, lag));
    }
    sum
}

/// Closed-form rotation zeroing `M[p][q]` of a Hermitian matrix
///
/// `D = (M_pp − M_qq)/ρ` with `ρ = √((M_pp − M_qq)² + 4|M_pq|²)`,
/// `c = √((1 + D)/2)`, `s = e^{−i arg M_pq} √((1 − D)/2)`.
fn closed_form(m: &Array2<Complex64>, p: usize, q: usize) -> Option<Givens> {
    let a = m[[p, p]].re;
    let d = m[[q, q]].re;
    let b = m[[p, q]];
    let magnitude = b.norm();
    let scale = a.abs() + d.abs() + magnitude;
    if magnitude <= 1e-15 * scale || magnitude == 0.0 {
        return None;
    }

    let diff = a - d;
    let rho = (diff * diff + 4.0 * magnitude * magnitude).sqrt();
    let ratio = (diff / rho).clamp(-1.0, 1.0);
    let c = ((1.0 + ratio) / 2.0).sqrt();
    let s = (b.conj() / magnitude) * ((1.0 - ratio) / 2.0).sqrt();
    Some(Givens { p, q, c, s })
}

/// Second-order (lagged covariance) separator
#[derive(Debug, Clone)]
pub struct SecondOrder {
    lags: usize,
    tolerance: f64,
    max_sweeps: usize,
}

impl SecondOrder {
    /// Create with lag count, off-diagonal tolerance and sweep cap
    pub fn new(lags: usize, tolerance: f64, max_sweeps: usize) -> Self {
        Self {
            lags: lags.max(1),
            tolerance,
            max_sweeps,
        }
    }

    /// Number of lags
    pub fn lags(&self) -> usize {
        self.lags
    }
}

impl Default for SecondOrder {
    fn default() -> Self {
        Self::new(10, 1e-8, 100)
    }
}

impl Separator for SecondOrder {
    fn separate(&self, whitened: &Array2<Complex64>) -> BssResult<Separation> {
        if !check_input(whitened, self.lags + 1)? {
            return Ok(Separation::identity(whitened, true));
        }

        let n = whitened.nrows();
        let mut m = summed_lagged_covariance(whitened, self.lags);
        let mut rotation = identity(n);
        let mut sweeps = 0;
        let mut converged = false;

        while sweeps < self.max_sweeps {
            if off_diagonal_ratio(std::slice::from_ref(&m)) < self.tolerance {
                converged = true;
                break;
            }
            sweeps += 1;

            let mut rotated = false;
            for row in 1..n {
                for col in 0..row {
                    if let Some(givens) = closed_form(&m, row, col) {
                        givens.apply_similarity(&mut m);
                        givens.accumulate(&mut rotation);
                        rotated = true;
                    }
                }
            }
            if !rotated {
                converged = true;
                break;
            }
        }
        if !converged {
            converged = off_diagonal_ratio(std::slice::from_ref(&m)) < self.tolerance;
        }
        if !converged {
            log::debug!("second-order solver hit the cap of {} sweeps", self.max_sweeps);
        }

        let unmixing = conj_transpose(&rotation);
        let sources = unmixing.dot(whitened);
        Ok(Separation {
            unmixing,
            sources,
            iterations: sweeps,
            converged,
            degenerate: false,
        })
    }

    fn name(&self) -> &str {
        "second-order"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_closed_form_zeroes_off_diagonal() {
        let mut m = array![
            [Complex64::new(2.0, 0.0), Complex64::new(0.3, -0.8)],
            [Complex64::new(0.3, 0.8), Complex64::new(-0.5, 0.0)]
        ];
        let givens = closed_form(&m, 1, 0).unwrap();
        givens.apply_similarity(&mut m);
        assert!(m[[0, 1]].norm() < 1e-12);
        assert!(m[[1, 0]].norm() < 1e-12);
    }

    #[test]
    fn test_diagonal_sum_needs_no_rotation() {
        assert!(closed_form(&identity(2), 1, 0).is_none());
    }

    #[test]
    fn test_summed_lags_hermitian() {
        let x = Array2::from_shape_fn((2, 120), |(i, s)| {
            Complex64::from_polar(1.0, 0.3 * s as f64 * (i + 1) as f64) * (1.0 + 0.1 * (s % 4) as f64)
        });
        let m = summed_lagged_covariance(&x, 4);
        assert!((m[[0, 1]] - m[[1, 0]].conj()).norm() < 1e-12);
        assert!(m[[0, 0]].im.abs() < 1e-12);
    }
}

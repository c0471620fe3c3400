//! Per-bin whitening (sphering)

use ndarray::Array2;
use num_complex::Complex64;

use crate::error::{BssError, BssResult};
use crate::linalg::{conj_transpose, covariance, hermitian_eigen, hermitian_part, lagged_covariance};

/// Eigenvalues at or below this fraction of the largest one make the bin degenerate
pub const DEGENERACY_RATIO: f64 = 1e-10;

/// Covariance estimate the sphering transform is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhiteningMode {
    /// Zero-lag sample covariance
    Covariance,
    /// Hermitian part of the summed lagged covariances for lags `1..=lags`
    Lagged {
        /// Number of lags
        lags: usize,
    },
}

/// Result of whitening one bin-slice
#[derive(Debug, Clone)]
pub struct Whitening {
    /// Sphering matrix `K = E diag(1/√d) Eᴴ`
    pub sphering: Array2<Complex64>,
    /// Whitened data `K·X`
    pub data: Array2<Complex64>,
    /// Eigenvalues `d` of the covariance estimate
    pub eigenvalues: Vec<f64>,
}

/// Whiten a bin-slice (channels × frames)
///
/// Fails with [`BssError::Degenerate`] when the covariance estimate is not
/// positive definite.
pub fn whiten(x: &Array2<Complex64>, mode: WhiteningMode) -> BssResult<Whitening> {
    let (channels, frames) = x.dim();
    if channels == 0 || frames < 2 {
        return Err(BssError::InsufficientData { needed: 2, got: frames });
    }

    let c = match mode {
        WhiteningMode::Covariance => covariance(x),
        WhiteningMode::Lagged { lags } => {
            if lags == 0 || lags >= frames {
                return Err(BssError::InsufficientData {
                    needed: lags + 1,
                    got: frames,
                });
            }
            let mut sum = Array2::<Complex64>::zeros((channels, channels));
            for lag in 1..=lags {
                sum += &lagged_covariance(x, lag);
            }
            hermitian_part(&sum)
        }
    };

    let (eigenvalues, vectors) = hermitian_eigen(&c);
    let largest = eigenvalues.iter().fold(0.0f64, |m, d| m.max(d.abs()));
    if !largest.is_finite() || largest == 0.0 {
        return Err(BssError::Degenerate("covariance is zero".into()));
    }
    if let Some(d) = eigenvalues.iter().find(|&&d| d <= DEGENERACY_RATIO * largest) {
        return Err(BssError::Degenerate(format!(
            "covariance not positive definite (eigenvalue {d:.3e}, largest {largest:.3e})"
        )));
    }

    let scaled = Array2::from_shape_fn((channels, channels), |(i, j)| {
        vectors[[i, j]] / eigenvalues[j].sqrt()
    });
    let sphering = scaled.dot(&conj_transpose(&vectors));
    let data = sphering.dot(x);

    Ok(Whitening {
        sphering,
        data,
        eigenvalues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::identity;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn random_mixture(frames: usize, seed: u64) -> Array2<Complex64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut s = Array2::<Complex64>::zeros((2, frames));
        for v in s.iter_mut() {
            *v = Complex64::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));
        }
        let a = ndarray::array![
            [Complex64::new(1.0, 0.2), Complex64::new(0.6, -0.4)],
            [Complex64::new(-0.3, 0.5), Complex64::new(0.9, 0.1)]
        ];
        a.dot(&s)
    }

    #[test]
    fn test_whitened_covariance_is_identity() {
        let x = random_mixture(500, 7);
        let w = whiten(&x, WhiteningMode::Covariance).unwrap();
        let c = covariance(&w.data);
        let eye = identity(2);
        for (a, b) in c.iter().zip(eye.iter()) {
            assert!((a - b).norm() < 1e-9, "whitened covariance {c:?}");
        }
        assert!(w.eigenvalues.iter().all(|&d| d > 0.0));
    }

    #[test]
    fn test_sphering_is_hermitian() {
        let x = random_mixture(300, 11);
        let w = whiten(&x, WhiteningMode::Covariance).unwrap();
        let kh = conj_transpose(&w.sphering);
        for (a, b) in w.sphering.iter().zip(kh.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn test_singular_covariance_is_degenerate() {
        // Second row is a scaled copy of the first
        let mut x = random_mixture(200, 3);
        let first = x.row(0).to_owned();
        x.row_mut(1).assign(&first.mapv(|v| v * Complex64::new(0.0, 2.0)));

        let err = whiten(&x, WhiteningMode::Covariance).unwrap_err();
        assert!(err.is_recoverable());

        let zeros = Array2::<Complex64>::zeros((2, 50));
        assert!(matches!(whiten(&zeros, WhiteningMode::Covariance), Err(BssError::Degenerate(_))));
    }

    #[test]
    fn test_lagged_mode_never_yields_nan() {
        // White data: summed lagged covariance is close to zero and indefinite
        let x = random_mixture(400, 5);
        match whiten(&x, WhiteningMode::Lagged { lags: 3 }) {
            Ok(w) => assert!(w.data.iter().all(|v| v.re.is_finite() && v.im.is_finite())),
            Err(e) => assert!(e.is_recoverable()),
        }
        assert!(whiten(&x, WhiteningMode::Lagged { lags: 400 }).is_err());
    }
}

//! Joint diagonalization of fourth-order cumulant matrices

use ndarray::Array2;
use num_complex::Complex64;

use super::{Separation, Separator, check_input};
use crate::error::BssResult;
use crate::linalg::{JacobiSettings, center_rows, conj_transpose, joint_diagonalize};

/// Cumulant matrices `Q(M)` of centered data for a Hermitian basis `M`
///
/// `Q(M) = E[(xᴴMx) x xᴴ] − tr(MR) R − R M R − C Mᵀ Cᴴ` with `R = E[x xᴴ]`
/// and `C = E[x xᵀ]`. The basis is `E_pp` and, for `p < q`,
/// `(E_pq + E_qp)/√2` and `i(E_pq − E_qp)/√2`, so there are `n²` matrices.
pub fn cumulant_matrices(x: &Array2<Complex64>) -> Vec<Array2<Complex64>> {
    let (n, t) = x.dim();
    let xc = center_rows(x);
    let inv_t = 1.0 / t.max(1) as f64;

    let r = xc.dot(&conj_transpose(&xc)).mapv(|v| v * inv_t);
    let c = xc.dot(&xc.t()).mapv(|v| v * inv_t);
    let ch = conj_transpose(&c);

    let zero = Complex64::new(0.0, 0.0);
    let scale = std::f64::consts::FRAC_1_SQRT_2;
    let mut basis = Vec::with_capacity(n * n);
    for p in 0..n {
        let mut m = Array2::from_elem((n, n), zero);
        m[[p, p]] = Complex64::new(1.0, 0.0);
        basis.push(m);
    }
    for p in 0..n {
        for q in p + 1..n {
            let mut sym = Array2::from_elem((n, n), zero);
            sym[[p, q]] = Complex64::new(scale, 0.0);
            sym[[q, p]] = Complex64::new(scale, 0.0);
            basis.push(sym);

            let mut anti = Array2::from_elem((n, n), zero);
            anti[[p, q]] = Complex64::new(0.0, scale);
            anti[[q, p]] = Complex64::new(0.0, -scale);
            basis.push(anti);
        }
    }

    basis
        .iter()
        .map(|m| {
            let mut q = Array2::from_elem((n, n), zero);
            for s in 0..t {
                let col = xc.column(s);
                let mut quad = zero;
                for k in 0..n {
                    for l in 0..n {
                        quad += col[k].conj() * m[[k, l]] * col[l];
                    }
                }
                for i in 0..n {
                    for j in 0..n {
                        q[[i, j]] += quad * col[i] * col[j].conj();
                    }
                }
            }
            q.mapv_inplace(|v| v * inv_t);

            let trace_mr: Complex64 = m.dot(&r).diag().sum();
            q - r.mapv(|v| v * trace_mr) - r.dot(m).dot(&r) - c.dot(&m.t()).dot(&ch)
        })
        .collect()
}

/// Cumulant-based joint diagonalization separator
#[derive(Debug, Clone)]
pub struct JointDiagonalization {
    tolerance: f64,
    max_sweeps: usize,
}

impl JointDiagonalization {
    /// Create with off-diagonal tolerance and sweep cap
    pub fn new(tolerance: f64, max_sweeps: usize) -> Self {
        Self { tolerance, max_sweeps }
    }
}

impl Default for JointDiagonalization {
    fn default() -> Self {
        Self::new(1e-8, 100)
    }
}

impl Separator for JointDiagonalization {
    fn separate(&self, whitened: &Array2<Complex64>) -> BssResult<Separation> {
        if !check_input(whitened, 2)? {
            return Ok(Separation::identity(whitened, true));
        }

        let frames = whitened.ncols();
        let mut cumulants = cumulant_matrices(whitened);
        let settings = JacobiSettings {
            tolerance: self.tolerance,
            max_sweeps: self.max_sweeps,
            // Rotations smaller than the statistical resolution are noise
            min_rotation: 1.0 / (100.0 * (frames as f64).sqrt()),
        };
        let outcome = joint_diagonalize(&mut cumulants, settings);
        if !outcome.converged {
            log::debug!("joint diagonalization hit the cap of {} sweeps", self.max_sweeps);
        }

        let unmixing = conj_transpose(&outcome.rotation);
        let sources = unmixing.dot(whitened);
        Ok(Separation {
            unmixing,
            sources,
            iterations: outcome.sweeps,
            converged: outcome.converged,
            degenerate: false,
        })
    }

    fn name(&self) -> &str {
        "joint-diagonalization"
    }
}

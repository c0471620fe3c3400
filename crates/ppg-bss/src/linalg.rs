//! Small dense complex linear algebra for per-bin problems
//!
//! Everything here works on `Array2<Complex64>` with rows as channels and
//! columns as frames. Matrices are tiny (2×2 for the two-sensor case), so
//! plain loops beat any decomposition library for clarity and speed.

use ndarray::{Array2, Axis};
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Subtract the mean of every row
pub fn center_rows(x: &Array2<Complex64>) -> Array2<Complex64> {
    let mut centered = x.clone();
    let cols = x.ncols().max(1) as f64;
    for mut row in centered.axis_iter_mut(Axis(0)) {
        let mean = row.sum() / cols;
        row.mapv_inplace(|v| v - mean);
    }
    centered
}

/// Conjugate transpose
pub fn conj_transpose(m: &Array2<Complex64>) -> Array2<Complex64> {
    m.t().mapv(|v| v.conj())
}

/// `(M + Mᴴ) / 2`
pub fn hermitian_part(m: &Array2<Complex64>) -> Array2<Complex64> {
    (m + &conj_transpose(m)).mapv(|v| v * 0.5)
}

/// Sample covariance of row-centered data, normalized by `T − 1`
pub fn covariance(x: &Array2<Complex64>) -> Array2<Complex64> {
    let t = x.ncols();
    let xc = center_rows(x);
    let norm = if t > 1 { (t - 1) as f64 } else { 1.0 };
    xc.dot(&conj_transpose(&xc)).mapv(|v| v / norm)
}

/// Lagged covariance `R(τ)[i][j] = 1/(T−τ) Σ_t x_i(t) x_j(t+τ)*` on centered data
///
/// Returns a zero matrix when `τ ≥ T`.
pub fn lagged_covariance(x: &Array2<Complex64>, lag: usize) -> Array2<Complex64> {
    let (n, t) = x.dim();
    let mut r = Array2::<Complex64>::zeros((n, n));
    if lag >= t {
        return r;
    }

    let xc = center_rows(x);
    let count = t - lag;
    for i in 0..n {
        for j in 0..n {
            let mut acc = ZERO;
            for s in 0..count {
                acc += xc[[i, s]] * xc[[j, s + lag]].conj();
            }
            r[[i, j]] = acc / count as f64;
        }
    }
    r
}

/// Identity matrix of size `n`
pub fn identity(n: usize) -> Array2<Complex64> {
    Array2::from_shape_fn((n, n), |(i, j)| if i == j { ONE } else { ZERO })
}

/// Inverse by Gauss-Jordan elimination with partial pivoting
///
/// Returns `None` for (numerically) singular matrices.
pub fn invert(m: &Array2<Complex64>) -> Option<Array2<Complex64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return None;
    }

    let scale = m.iter().map(|v| v.norm()).fold(0.0, f64::max);
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }

    let mut a = m.clone();
    let mut inv = identity(n);

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].norm().total_cmp(&a[[j, col]].norm()))?;
        if a[[pivot, col]].norm() <= 1e-12 * scale {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
                inv.swap([pivot, k], [col, k]);
            }
        }

        let p = a[[col, col]];
        for k in 0..n {
            a[[col, k]] /= p;
            inv[[col, k]] /= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == ZERO {
                continue;
            }
            for k in 0..n {
                let ak = a[[col, k]];
                let ik = inv[[col, k]];
                a[[row, k]] -= factor * ak;
                inv[[row, k]] -= factor * ik;
            }
        }
    }

    Some(inv)
}

/// Off-diagonal energy over total energy across a set of square matrices
pub fn off_diagonal_ratio(matrices: &[Array2<Complex64>]) -> f64 {
    let mut off = 0.0;
    let mut total = 0.0;
    for m in matrices {
        for ((i, j), v) in m.indexed_iter() {
            let e = v.norm_sqr();
            total += e;
            if i != j {
                off += e;
            }
        }
    }
    if total > 0.0 { off / total } else { 0.0 }
}

/// Stopping rules for Jacobi sweeps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JacobiSettings {
    /// Stop once the off-diagonal ratio drops below this
    pub tolerance: f64,
    /// Sweep cap
    pub max_sweeps: usize,
    /// Rotations with `|s|` at or below this are skipped
    pub min_rotation: f64,
}

impl Default for JacobiSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_sweeps: 100,
            min_rotation: 1e-12,
        }
    }
}

/// Result of a Jacobi run
#[derive(Debug, Clone)]
pub struct JacobiOutcome {
    /// Accumulated unitary `V`; the matrices end up as `Vᴴ M V`
    pub rotation: Array2<Complex64>,
    /// Sweeps performed
    pub sweeps: usize,
    /// False when the sweep cap was hit first
    pub converged: bool,
}

/// Givens pair `G = [[c, −s*], [s, c]]` acting on indices `(p, q)`
#[derive(Debug, Clone, Copy)]
pub(crate) struct Givens {
    pub p: usize,
    pub q: usize,
    pub c: f64,
    pub s: Complex64,
}

impl Givens {
    /// `M ← Gᴴ M G` restricted to rows/columns `p`, `q`
    pub fn apply_similarity(&self, m: &mut Array2<Complex64>) {
        let Givens { p, q, c, s } = *self;
        let n = m.ncols();
        for k in 0..n {
            let mp = m[[p, k]];
            let mq = m[[q, k]];
            m[[p, k]] = mp * c + s.conj() * mq;
            m[[q, k]] = -s * mp + mq * c;
        }
        for k in 0..m.nrows() {
            let mp = m[[k, p]];
            let mq = m[[k, q]];
            m[[k, p]] = mp * c + s * mq;
            m[[k, q]] = -s.conj() * mp + mq * c;
        }
    }

    /// `V ← V G`
    pub fn accumulate(&self, v: &mut Array2<Complex64>) {
        let Givens { p, q, c, s } = *self;
        for k in 0..v.nrows() {
            let vp = v[[k, p]];
            let vq = v[[k, q]];
            v[[k, p]] = vp * c + s * vq;
            v[[k, q]] = -s.conj() * vp + vq * c;
        }
    }
}

/// Joint approximate diagonalization of Hermitian matrices by complex Jacobi rotations
///
/// Each rotation angle maximizes the summed squared diagonal of the 2×2
/// sub-blocks over all matrices: the angle vector is the dominant
/// eigenvector of `Re Σ h hᴴ` with
/// `h = (M_pp − M_qq, M_pq + M_qp, i(M_qp − M_pq))`.
pub fn joint_diagonalize(matrices: &mut [Array2<Complex64>], settings: JacobiSettings) -> JacobiOutcome {
    let n = matrices.first().map_or(0, |m| m.nrows());
    let mut rotation = identity(n);

    if n < 2 {
        return JacobiOutcome {
            rotation,
            sweeps: 0,
            converged: true,
        };
    }

    let mut sweeps = 0;
    while sweeps < settings.max_sweeps {
        if off_diagonal_ratio(matrices) < settings.tolerance {
            return JacobiOutcome {
                rotation,
                sweeps,
                converged: true,
            };
        }
        sweeps += 1;

        let mut rotated = false;
        for p in 0..n - 1 {
            for q in p + 1..n {
                let Some(givens) = pair_rotation(matrices, p, q) else {
                    continue;
                };
                if givens.s.norm() <= settings.min_rotation {
                    continue;
                }
                rotated = true;
                for m in matrices.iter_mut() {
                    givens.apply_similarity(m);
                }
                givens.accumulate(&mut rotation);
            }
        }

        if !rotated {
            return JacobiOutcome {
                rotation,
                sweeps,
                converged: true,
            };
        }
    }

    let converged = off_diagonal_ratio(matrices) < settings.tolerance;
    JacobiOutcome {
        rotation,
        sweeps,
        converged,
    }
}

fn pair_rotation(matrices: &[Array2<Complex64>], p: usize, q: usize) -> Option<Givens> {
    let i = Complex64::new(0.0, 1.0);
    let mut g = [[0.0f64; 3]; 3];
    for m in matrices {
        let h = [
            m[[p, p]] - m[[q, q]],
            m[[p, q]] + m[[q, p]],
            i * (m[[q, p]] - m[[p, q]]),
        ];
        for a in 0..3 {
            for b in 0..3 {
                g[a][b] += (h[a] * h[b].conj()).re;
            }
        }
    }

    let (values, vectors) = symmetric_eigen3(g);
    let top = (0..3).max_by(|&a, &b| values[a].total_cmp(&values[b]))?;
    if values[top] <= f64::MIN_POSITIVE {
        return None;
    }
    let mut angles = [vectors[0][top], vectors[1][top], vectors[2][top]];
    if angles[0] < 0.0 {
        angles.iter_mut().for_each(|a| *a = -*a);
    }

    let c = (0.5 + angles[0] / 2.0).sqrt();
    let s = Complex64::new(angles[1], -angles[2]) * (0.5 / c);
    Some(Givens { p, q, c, s })
}

/// Eigen-decomposition of a real symmetric 3×3 matrix by cyclic Jacobi
///
/// Returns eigenvalues and a matrix whose columns are the eigenvectors.
fn symmetric_eigen3(mut a: [[f64; 3]; 3]) -> ([f64; 3], [[f64; 3]; 3]) {
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..64 {
        let off = a[0][1].abs() + a[0][2].abs() + a[1][2].abs();
        let scale = a[0][0].abs() + a[1][1].abs() + a[2][2].abs();
        if off <= 1e-15 * scale.max(f64::MIN_POSITIVE) {
            break;
        }

        for p in 0..2 {
            for q in p + 1..3 {
                if a[p][q] == 0.0 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let (akp, akq) = (row[p], row[q]);
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..3 {
                    let (apk, aqk) = (a[p][k], a[q][k]);
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let (vkp, vkq) = (row[p], row[q]);
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    ([a[0][0], a[1][1], a[2][2]], v)
}

/// Eigen-decomposition of a Hermitian matrix
///
/// Returns real eigenvalues and the matching eigenvectors as columns, in
/// no particular order.
pub fn hermitian_eigen(m: &Array2<Complex64>) -> (Vec<f64>, Array2<Complex64>) {
    let mut work = [hermitian_part(m)];
    let settings = JacobiSettings {
        tolerance: 1e-28,
        max_sweeps: 60,
        min_rotation: 0.0,
    };
    let outcome = joint_diagonalize(&mut work, settings);
    let values = work[0].diag().iter().map(|v| v.re).collect();
    (values, outcome.rotation)
}

//! Adaptive higher-order-statistics solver
//!
//! Complex fixed-point iteration with deflation. The contrast is
//! `G(u) = (ε + u)^{c/2}` on `u = |y|²`, with the generalized Gaussian
//! shape `c` re-estimated from the current component so sub- and
//! super-Gaussian sources both get a matched nonlinearity.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::{Separation, Separator, check_input};
use crate::error::BssResult;
use crate::linalg::center_rows;

const MIN_SHAPE: f64 = 0.2;
const MAX_SHAPE: f64 = 8.0;

/// Adaptive solver settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveHosConfig {
    /// Stop when `| |⟨w_new, w⟩| − 1 |` falls below this
    pub tolerance: f64,
    /// Iteration cap per component
    pub max_iterations: usize,
    /// Smoothing constant `ε` of the contrast
    pub epsilon: f64,
    /// Shape used before the first estimate
    pub initial_shape: f64,
    /// Iterations between shape re-estimates (0 disables adaptation)
    pub shape_interval: usize,
}

impl Default for AdaptiveHosConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 500,
            epsilon: 0.1,
            initial_shape: 1.0,
            shape_interval: 10,
        }
    }
}

/// Generalized Gaussian shape matching a normalized fourth moment
///
/// Solves `Γ(6/c)Γ(2/c)/Γ(4/c)² = E|y|⁴ / (E|y|²)²` for `c` by bisection,
/// clamped to `[0.2, 8]`. A complex Gaussian (ratio 2) gives `c = 2`.
pub fn estimate_shape(moment_ratio: f64) -> f64 {
    let log_ratio = |c: f64| libm::lgamma(6.0 / c) + libm::lgamma(2.0 / c) - 2.0 * libm::lgamma(4.0 / c);

    if !moment_ratio.is_finite() || moment_ratio <= 0.0 {
        return 2.0;
    }
    let target = moment_ratio.ln();
    // The ratio falls monotonically with c
    if target >= log_ratio(MIN_SHAPE) {
        return MIN_SHAPE;
    }
    if target <= log_ratio(MAX_SHAPE) {
        return MAX_SHAPE;
    }

    let (mut lo, mut hi) = (MIN_SHAPE, MAX_SHAPE);
    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        if log_ratio(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Keep the shape away from the Gaussian point where the contrast carries no information
fn clamp_shape(c: f64) -> f64 {
    if c < 2.0 { c.clamp(0.5, 1.5) } else { c.clamp(3.0, 6.0) }
}

/// Adaptive higher-order-statistics separator
#[derive(Debug, Clone)]
pub struct AdaptiveHos {
    config: AdaptiveHosConfig,
}

impl AdaptiveHos {
    /// Create with the given settings
    pub fn new(config: AdaptiveHosConfig) -> Self {
        Self { config }
    }

    /// Settings in use
    pub fn config(&self) -> &AdaptiveHosConfig {
        &self.config
    }

    /// Shape for the component `y = wᴴ x`
    fn component_shape(projection: &Array1<Complex64>) -> f64 {
        let n = projection.len().max(1) as f64;
        let m2 = projection.iter().map(|y| y.norm_sqr()).sum::<f64>() / n;
        let m4 = projection.iter().map(|y| y.norm_sqr().powi(2)).sum::<f64>() / n;
        if m2 <= 0.0 {
            return 2.0;
        }
        clamp_shape(estimate_shape(m4 / (m2 * m2)))
    }

    /// One fixed-point update: `E{x y* g(|y|²)} − E{g(|y|²) + |y|² g'(|y|²)} w`
    fn update(&self, x: &Array2<Complex64>, w: &Array1<Complex64>, shape: f64) -> (Array1<Complex64>, Array1<Complex64>) {
        let (n, t) = x.dim();
        let eps = self.config.epsilon;
        let half = shape / 2.0;

        let projection: Array1<Complex64> = (0..t)
            .map(|s| (0..n).map(|j| w[j].conj() * x[[j, s]]).sum())
            .collect();

        let mut first = Array1::<Complex64>::zeros(n);
        let mut second = 0.0;
        for (s, y) in projection.iter().enumerate() {
            let u = y.norm_sqr();
            let base = eps + u;
            let g = half * base.powf(half - 1.0);
            let dg = half * (half - 1.0) * base.powf(half - 2.0);
            let weight = y.conj() * g;
            for j in 0..n {
                first[j] += x[[j, s]] * weight;
            }
            second += g + u * dg;
        }

        let inv_t = 1.0 / t as f64;
        let next = first.mapv(|v| v * inv_t) - w.mapv(|v| v * (second * inv_t));
        (next, projection)
    }
}

impl Default for AdaptiveHos {
    fn default() -> Self {
        Self::new(AdaptiveHosConfig::default())
    }
}

fn inner(a: &Array1<Complex64>, b: &Array1<Complex64>) -> Complex64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum()
}

fn normalize(w: &mut Array1<Complex64>) -> bool {
    let norm = w.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt();
    if norm <= 1e-12 {
        return false;
    }
    w.mapv_inplace(|v| v / norm);
    true
}

fn deflate(w: &mut Array1<Complex64>, found: &[Array1<Complex64>]) {
    for prev in found {
        let proj = inner(prev, w);
        w.zip_mut_with(prev, |a, &b| *a -= proj * b);
    }
}

impl Separator for AdaptiveHos {
    fn separate(&self, whitened: &Array2<Complex64>) -> BssResult<Separation> {
        if !check_input(whitened, 2)? {
            return Ok(Separation::identity(whitened, true));
        }

        let n = whitened.nrows();
        let x = center_rows(whitened);
        let mut found: Vec<Array1<Complex64>> = Vec::with_capacity(n);
        let mut iterations = 0;
        let mut converged = true;

        for p in 0..n {
            let mut w = Array1::from_shape_fn(n, |j| {
                let base = if j == p { 1.0 } else { 0.0 };
                Complex64::new(base, 0.0) + Complex64::new(0.1, 0.05) * ((j + 1) as f64 / n as f64)
            });
            deflate(&mut w, &found);
            if !normalize(&mut w) {
                log::debug!("adaptive solver: component {p} has no free direction");
                return Ok(Separation::identity(whitened, true));
            }

            let mut shape = self.config.initial_shape;
            let mut done = false;
            for iter in 1..=self.config.max_iterations {
                iterations += 1;
                let (mut next, projection) = self.update(&x, &w, shape);
                deflate(&mut next, &found);
                if !normalize(&mut next) {
                    break;
                }

                let delta = (inner(&next, &w).norm() - 1.0).abs();
                w = next;
                if delta < self.config.tolerance {
                    done = true;
                    break;
                }
                if self.config.shape_interval > 0 && iter % self.config.shape_interval == 0 {
                    shape = Self::component_shape(&projection);
                }
            }

            if !done {
                log::debug!(
                    "adaptive solver: component {p} hit the cap of {} iterations",
                    self.config.max_iterations
                );
                converged = false;
            }
            found.push(w);
        }

        let unmixing = Array2::from_shape_fn((n, n), |(i, j)| found[i][j].conj());
        let sources = unmixing.dot(whitened);

        Ok(Separation {
            unmixing,
            sources,
            iterations,
            converged,
            degenerate: false,
        })
    }

    fn name(&self) -> &str {
        "adaptive-hos"
    }
}

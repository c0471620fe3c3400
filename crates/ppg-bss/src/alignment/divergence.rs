//! Distribution-divergence alignment
//!
//! Each component's magnitude is normalized to unit RMS and fitted with a
//! two-parameter Weibull density by maximum likelihood. Densities are
//! compared on a fixed grid with the Jensen-Shannon distance. Alignment
//! starts from the closest pair of bins and grows greedily, matching each
//! new bin against the running mean density of every slot.

use ndarray::Array2;
use num_complex::Complex64;

use super::{AMBIGUITY_EPSILON, Alignment, PermutationAligner, best_permutation, canonicalize, check_sources, permutations};
use crate::error::BssResult;

const MIN_SHAPE: f64 = 0.05;
const MAX_SHAPE: f64 = 50.0;

/// Two-parameter Weibull distribution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeibullFit {
    /// Shape `k`
    pub shape: f64,
    /// Scale `λ`
    pub scale: f64,
}

impl WeibullFit {
    /// Maximum-likelihood fit to the positive, finite samples
    ///
    /// Needs at least two such samples. The shape is found by bisection on
    /// the profile likelihood equation and clamped to `[0.05, 50]`.
    pub fn fit(samples: &[f64]) -> Option<Self> {
        let positive: Vec<f64> = samples.iter().copied().filter(|x| x.is_finite() && *x > 0.0).collect();
        if positive.len() < 2 {
            return None;
        }

        let n = positive.len() as f64;
        let logs: Vec<f64> = positive.iter().map(|x| x.ln()).collect();
        let max_log = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_log = logs.iter().sum::<f64>() / n;

        // Σ x^k ln x / Σ x^k − 1/k − mean(ln x), with x^k scaled by max^k
        let profile = |k: f64| {
            let mut num = 0.0;
            let mut den = 0.0;
            for &l in &logs {
                let w = (k * (l - max_log)).exp();
                num += w * l;
                den += w;
            }
            num / den - 1.0 / k - mean_log
        };

        let shape = if profile(MIN_SHAPE) >= 0.0 {
            MIN_SHAPE
        } else if profile(MAX_SHAPE) <= 0.0 {
            MAX_SHAPE
        } else {
            let (mut lo, mut hi) = (MIN_SHAPE, MAX_SHAPE);
            for _ in 0..100 {
                let mid = 0.5 * (lo + hi);
                if profile(mid) < 0.0 {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            0.5 * (lo + hi)
        };

        let mean_scaled = logs.iter().map(|&l| (shape * (l - max_log)).exp()).sum::<f64>() / n;
        let scale = max_log.exp() * mean_scaled.powf(1.0 / shape);
        if !(scale.is_finite() && scale > 0.0) {
            return None;
        }
        Some(Self { shape, scale })
    }

    /// Probability density at `x`
    pub fn pdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 0.0;
        }
        let z = x / self.scale;
        (self.shape / self.scale) * z.powf(self.shape - 1.0) * (-z.powf(self.shape)).exp()
    }

    /// Density sampled on `grid` and normalized to a probability mass function
    pub fn pmf(&self, grid: &[f64]) -> Option<Vec<f64>> {
        let mut p: Vec<f64> = grid.iter().map(|&x| self.pdf(x)).collect();
        let total: f64 = p.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return None;
        }
        p.iter_mut().for_each(|v| *v /= total);
        Some(p)
    }
}

/// Jensen-Shannon distance (square root of the divergence, natural log)
pub fn jensen_shannon(p: &[f64], q: &[f64]) -> f64 {
    let mut divergence = 0.0;
    for (&a, &b) in p.iter().zip(q) {
        let m = 0.5 * (a + b);
        if a > 0.0 {
            divergence += 0.5 * a * (a / m).ln();
        }
        if b > 0.0 {
            divergence += 0.5 * b * (b / m).ln();
        }
    }
    divergence.max(0.0).sqrt()
}

/// Weibull / Jensen-Shannon aligner
#[derive(Debug, Clone)]
pub struct DivergenceAligner {
    grid: Vec<f64>,
}

impl DivergenceAligner {
    /// Densities compared on `points` midpoints covering `[0, max]` (RMS units)
    pub fn new(points: usize, max: f64) -> Self {
        let points = points.max(2);
        let step = max / points as f64;
        Self {
            grid: (0..points).map(|g| (g as f64 + 0.5) * step).collect(),
        }
    }

    /// Fitted densities of every component of a bin, `None` if any fit fails
    fn bin_densities(&self, bin: &Array2<Complex64>) -> Option<Vec<Vec<f64>>> {
        bin.rows()
            .into_iter()
            .map(|row| {
                let magnitudes: Vec<f64> = row.iter().map(|v| v.norm()).collect();
                let rms = (magnitudes.iter().map(|m| m * m).sum::<f64>() / magnitudes.len().max(1) as f64).sqrt();
                if !(rms.is_finite() && rms > 0.0) {
                    return None;
                }
                let normalized: Vec<f64> = magnitudes.iter().map(|m| m / rms).collect();
                WeibullFit::fit(&normalized)?.pmf(&self.grid)
            })
            .collect()
    }

    fn cost(reference: &[Vec<f64>], candidate: &[Vec<f64>], perm: &[usize]) -> f64 {
        perm.iter()
            .enumerate()
            .map(|(slot, &local)| jensen_shannon(&reference[slot], &candidate[local]))
            .sum()
    }
}

impl Default for DivergenceAligner {
    fn default() -> Self {
        Self::new(64, 5.0)
    }
}

impl PermutationAligner for DivergenceAligner {
    fn align(&self, sources: &[Array2<Complex64>]) -> BssResult<Alignment> {
        let (bins, components, _) = check_sources(sources)?;
        let densities: Vec<Option<Vec<Vec<f64>>>> = sources.iter().map(|s| self.bin_densities(s)).collect();
        let usable: Vec<usize> = (0..bins).filter(|&k| densities[k].is_some()).collect();
        let unaligned: Vec<usize> = (0..bins).filter(|&k| densities[k].is_none()).collect();

        if components < 2 || usable.len() < 2 {
            log::debug!(
                "divergence alignment: {} usable bins, {components} components, keeping bin order",
                usable.len()
            );
            let mut fallback = Alignment::identity(bins, components, false);
            fallback.unaligned_bins = unaligned;
            return Ok(fallback);
        }

        let pmf = |k: usize| densities[k].as_deref().unwrap_or_default();
        let candidates = permutations(components);

        // Pairwise best-permutation distances; seed with the closest pair
        let mut scores = Array2::<f64>::zeros((bins, bins));
        let mut seed: Option<(usize, usize, f64)> = None;
        for (a, &i) in usable.iter().enumerate() {
            for &j in &usable[a + 1..] {
                let (_, best, _) = best_permutation(&candidates, |p| -Self::cost(pmf(i), pmf(j), p));
                scores[[i, j]] = -best;
                scores[[j, i]] = -best;
                if seed.is_none_or(|(_, _, d)| -best < d) {
                    seed = Some((i, j, -best));
                }
            }
        }
        let Some((first, second, _)) = seed else {
            return Ok(Alignment::identity(bins, components, false));
        };

        let mut perms: Vec<Vec<usize>> = vec![(0..components).collect(); bins];
        let mut confident = true;

        let (perm, best, runner_up) = best_permutation(&candidates, |p| -Self::cost(pmf(first), pmf(second), p));
        confident &= best - runner_up >= AMBIGUITY_EPSILON;
        perms[second] = perm;

        let mut means: Vec<Vec<f64>> = (0..components)
            .map(|slot| {
                pmf(first)[slot]
                    .iter()
                    .zip(&pmf(second)[perms[second][slot]])
                    .map(|(a, b)| 0.5 * (a + b))
                    .collect()
            })
            .collect();
        let mut count = 2.0;

        let mut remaining: Vec<usize> = usable.iter().copied().filter(|&k| k != first && k != second).collect();
        while !remaining.is_empty() {
            let mut pick: Option<(usize, Vec<usize>, f64, f64)> = None;
            for (idx, &k) in remaining.iter().enumerate() {
                let (perm, best, runner_up) = best_permutation(&candidates, |p| -Self::cost(&means, pmf(k), p));
                if pick.as_ref().is_none_or(|(_, _, b, _)| best > *b) {
                    pick = Some((idx, perm, best, runner_up));
                }
            }
            let Some((idx, perm, best, runner_up)) = pick else {
                break;
            };
            let k = remaining.remove(idx);
            confident &= best - runner_up >= AMBIGUITY_EPSILON;

            for (slot, mean) in means.iter_mut().enumerate() {
                for (m, v) in mean.iter_mut().zip(&pmf(k)[perm[slot]]) {
                    *m = (*m * count + v) / (count + 1.0);
                }
            }
            count += 1.0;
            perms[k] = perm;
        }

        canonicalize(&mut perms, usable[0]);
        for &k in &unaligned {
            perms[k] = (0..components).collect();
        }
        if !confident {
            log::debug!("divergence alignment: tied permutation scores");
        }

        Ok(Alignment {
            permutations: perms,
            scores,
            confident,
            unaligned_bins: unaligned,
        })
    }

    fn name(&self) -> &str {
        "divergence"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn weibull_samples(shape: f64, scale: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let u: f64 = rng.random_range(1e-12..1.0);
                scale * (-u.ln()).powf(1.0 / shape)
            })
            .collect()
    }

    #[test]
    fn test_weibull_fit_recovers_parameters() {
        let samples = weibull_samples(2.5, 1.5, 20_000, 42);
        let fit = WeibullFit::fit(&samples).unwrap();
        assert!((fit.shape - 2.5).abs() < 0.1, "shape {}", fit.shape);
        assert!((fit.scale - 1.5).abs() < 0.05, "scale {}", fit.scale);
    }

    #[test]
    fn test_weibull_fit_needs_positive_samples() {
        assert!(WeibullFit::fit(&[0.0, 0.0, 0.0]).is_none());
        assert!(WeibullFit::fit(&[1.0]).is_none());
        // Constant data pins the shape at the upper bound
        let fit = WeibullFit::fit(&[2.0; 10]).unwrap();
        assert_eq!(fit.shape, MAX_SHAPE);
    }

    #[test]
    fn test_jensen_shannon_properties() {
        let p = [0.5, 0.5, 0.0];
        let q = [0.0, 0.5, 0.5];
        assert_eq!(jensen_shannon(&p, &p), 0.0);
        assert!((jensen_shannon(&p, &q) - jensen_shannon(&q, &p)).abs() < 1e-15);
        // Disjoint supports reach the ln 2 bound
        let d = jensen_shannon(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - std::f64::consts::LN_2.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_single_bin_falls_back_to_identity() {
        let bin = Array2::from_shape_fn((2, 50), |(i, t)| Complex64::new(1.0 + (t * (i + 1) % 7) as f64, 0.0));
        let alignment = DivergenceAligner::default().align(&[bin]).unwrap();
        assert!(alignment.is_identity());
        assert!(!alignment.confident);
    }
}

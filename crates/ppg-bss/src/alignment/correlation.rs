//! Correlation-of-statistics alignment
//!
//! Components of the same source share their temporal structure across
//! bins: envelopes rise and fall together, lag profiles have similar
//! shapes. The bin × bin affinity is the best normalized correlation
//! between any two components of the two bins. Bins are attached in
//! maximum-affinity order (a spanning tree grown from the best-connected
//! bin) and each takes the permutation that correlates best with the
//! running slot centroids.

use ndarray::{Array2, ArrayView1};
use num_complex::Complex64;

use super::{AMBIGUITY_EPSILON, Alignment, PermutationAligner, best_permutation, canonicalize, check_sources, permutations};
use crate::config::CorrelationFeature;
use crate::error::{BssError, BssResult};

/// Pearson correlation; zero when either side has no variance
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f64::MIN_POSITIVE || !denom.is_finite() {
        return 0.0;
    }
    cov / denom
}

/// Zero-mean unit-variance copy, `None` for constant input
fn standardize(values: Vec<f64>) -> Option<Vec<f64>> {
    let n = values.len() as f64;
    if n < 2.0 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let scale = mean.abs().max(1.0);
    if !(var.is_finite() && var > 1e-24 * scale * scale) {
        return None;
    }
    let std = var.sqrt();
    Some(values.into_iter().map(|v| (v - mean) / std).collect())
}

/// Correlation-based aligner
#[derive(Debug, Clone)]
pub struct CorrelationAligner {
    feature: CorrelationFeature,
}

impl CorrelationAligner {
    /// Create with the statistic to correlate
    pub fn new(feature: CorrelationFeature) -> Self {
        Self { feature }
    }

    /// Statistic of one component
    fn feature(&self, component: ArrayView1<'_, Complex64>) -> BssResult<Vec<f64>> {
        match self.feature {
            CorrelationFeature::Envelope => Ok(component.iter().map(|v| v.norm()).collect()),
            CorrelationFeature::LagProfile { max_lag } => {
                let t = component.len();
                if max_lag >= t {
                    return Err(BssError::InsufficientData {
                        needed: max_lag + 1,
                        got: t,
                    });
                }
                let mean = component.sum() / t as f64;
                Ok((0..=max_lag)
                    .map(|lag| {
                        let count = t - lag;
                        let acc: Complex64 = (0..count)
                            .map(|s| (component[s] - mean) * (component[s + lag] - mean).conj())
                            .sum();
                        (acc / count as f64).norm()
                    })
                    .collect())
            }
        }
    }
}

impl Default for CorrelationAligner {
    fn default() -> Self {
        Self::new(CorrelationFeature::Envelope)
    }
}

impl PermutationAligner for CorrelationAligner {
    fn align(&self, sources: &[Array2<Complex64>]) -> BssResult<Alignment> {
        let (bins, components, _) = check_sources(sources)?;

        // features[k][c]: standardized statistic, None when constant
        let mut features: Vec<Vec<Option<Vec<f64>>>> = Vec::with_capacity(bins);
        for bin in sources {
            let mut per_bin = Vec::with_capacity(components);
            for row in bin.rows() {
                per_bin.push(standardize(self.feature(row)?));
            }
            features.push(per_bin);
        }

        let usable: Vec<usize> = (0..bins).filter(|&k| features[k].iter().any(Option::is_some)).collect();
        let unaligned: Vec<usize> = (0..bins).filter(|&k| !usable.contains(&k)).collect();

        if components < 2 || usable.len() < 2 {
            log::debug!(
                "correlation alignment: {} usable bins, {components} components, keeping bin order",
                usable.len()
            );
            let mut fallback = Alignment::identity(bins, components, false);
            fallback.unaligned_bins = unaligned;
            return Ok(fallback);
        }

        let corr = |a: &Option<Vec<f64>>, b: &Option<Vec<f64>>| match (a, b) {
            (Some(a), Some(b)) => pearson(a, b),
            _ => 0.0,
        };

        // Affinity = best correlation over component pairs
        let mut affinity = Array2::<f64>::zeros((bins, bins));
        for (a, &k) in usable.iter().enumerate() {
            for &j in &usable[a + 1..] {
                let mut best = f64::NEG_INFINITY;
                for q in &features[k] {
                    for p in &features[j] {
                        best = best.max(corr(q, p));
                    }
                }
                affinity[[k, j]] = best;
                affinity[[j, k]] = best;
            }
        }

        // Reference: highest total affinity, lowest index on ties
        let mut reference = usable[0];
        let mut reference_total = f64::NEG_INFINITY;
        for &k in &usable {
            let total: f64 = usable.iter().map(|&j| affinity[[k, j]]).sum();
            if total > reference_total {
                reference = k;
                reference_total = total;
            }
        }

        let candidates = permutations(components);
        let mut perms: Vec<Vec<usize>> = vec![(0..components).collect(); bins];
        let mut centroids: Vec<Option<Vec<f64>>> = features[reference].clone();
        let mut aligned = vec![reference];
        let mut remaining: Vec<usize> = usable.iter().copied().filter(|&k| k != reference).collect();
        let mut confident = true;

        while !remaining.is_empty() {
            // Strongest edge from the aligned set; ties go to the lowest (new, old) pair
            let mut pick: Option<(usize, f64)> = None;
            for (idx, &j) in remaining.iter().enumerate() {
                for &i in &aligned {
                    let a = affinity[[i, j]];
                    if pick.is_none_or(|(_, best)| a > best) {
                        pick = Some((idx, a));
                    }
                }
            }
            let Some((idx, _)) = pick else {
                break;
            };
            let j = remaining.remove(idx);

            let (perm, best, runner_up) = best_permutation(&candidates, |p| {
                p.iter()
                    .enumerate()
                    .map(|(slot, &local)| corr(&centroids[slot], &features[j][local]))
                    .sum()
            });
            confident &= best - runner_up >= AMBIGUITY_EPSILON;

            for (slot, centroid) in centroids.iter_mut().enumerate() {
                if let Some(add) = &features[j][perm[slot]] {
                    match centroid {
                        Some(sum) => sum.iter_mut().zip(add).for_each(|(s, v)| *s += v),
                        None => *centroid = Some(add.clone()),
                    }
                }
            }
            perms[j] = perm;
            aligned.push(j);
        }

        canonicalize(&mut perms, usable[0]);
        for &k in &unaligned {
            perms[k] = (0..components).collect();
        }
        if !confident {
            log::debug!("correlation alignment: tied permutation scores");
        }

        Ok(Alignment {
            permutations: perms,
            scores: affinity,
            confident,
            unaligned_bins: unaligned,
        })
    }

    fn name(&self) -> &str {
        "correlation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_basics() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &b) - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &c) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[1.0; 4]), 0.0);
    }

    #[test]
    fn test_constant_bins_are_unaligned() {
        let varying = Array2::from_shape_fn((2, 40), |(i, t)| Complex64::new(((t * (i + 2)) % 9) as f64, 0.0));
        let constant = Array2::from_elem((2, 40), Complex64::new(1.0, 1.0));
        let alignment = CorrelationAligner::default()
            .align(&[varying.clone(), constant, varying])
            .unwrap();
        assert_eq!(alignment.unaligned_bins, vec![1]);
        assert_eq!(alignment.permutations[1], vec![0, 1]);
    }

    #[test]
    fn test_lag_profile_needs_enough_frames() {
        let aligner = CorrelationAligner::new(CorrelationFeature::LagProfile { max_lag: 10 });
        let short = Array2::from_elem((2, 8), Complex64::new(1.0, 0.0));
        assert!(aligner.align(&[short.clone(), short]).is_err());
    }
}

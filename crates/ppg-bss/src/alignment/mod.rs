//! Cross-bin permutation alignment
//!
//! Every bin is separated on its own, so component `c` of one bin has no
//! relation to component `c` of another. Alignment picks one permutation
//! per bin so that output slot `s` carries the same source in every bin.
//!
//! Two strategies:
//! - [`DivergenceAligner`]: Weibull fit of each component's magnitude,
//!   Jensen-Shannon distance between fitted densities, greedy growth from
//!   the closest bin pair
//! - [`CorrelationAligner`]: normalized correlation of per-component
//!   statistics, spanning-tree growth from the best-connected bin
//!
//! Both are deterministic: candidate permutations are visited in
//! lexicographic order and only a strictly better score replaces the
//! current best, so ties keep the lower-indexed choice.

mod correlation;
mod divergence;

pub use correlation::{CorrelationAligner, pearson};
pub use divergence::{DivergenceAligner, WeibullFit, jensen_shannon};

use ndarray::Array2;
use num_complex::Complex64;

use crate::config::{AlignmentStrategy, BssConfig};
use crate::error::{BssError, BssResult};

/// Margin between best and runner-up permutation below which a decision is a tie
pub const AMBIGUITY_EPSILON: f64 = 1e-12;

/// Per-bin permutations for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// `permutations[k][slot]` is the local component of bin `k` placed in `slot`
    pub permutations: Vec<Vec<usize>>,
    /// Bin × bin score matrix the decision was based on
    pub scores: Array2<f64>,
    /// False when the scores could not justify a decision
    pub confident: bool,
    /// Bins excluded from matching (kept in local order)
    pub unaligned_bins: Vec<usize>,
}

impl Alignment {
    /// Bin-order fallback
    pub fn identity(bins: usize, components: usize, confident: bool) -> Self {
        Self {
            permutations: vec![(0..components).collect(); bins],
            scores: Array2::zeros((bins, bins)),
            confident,
            unaligned_bins: Vec::new(),
        }
    }

    /// True if every bin keeps its local order
    pub fn is_identity(&self) -> bool {
        self.permutations
            .iter()
            .all(|p| p.iter().enumerate().all(|(slot, &c)| slot == c))
    }

    /// Reorder the component rows of every bin
    pub fn apply(&self, sources: &[Array2<Complex64>]) -> BssResult<Vec<Array2<Complex64>>> {
        if sources.len() != self.permutations.len() {
            return Err(BssError::BufferMismatch {
                expected: self.permutations.len(),
                got: sources.len(),
            });
        }
        sources
            .iter()
            .zip(&self.permutations)
            .map(|(s, perm)| {
                if s.nrows() != perm.len() {
                    return Err(BssError::BufferMismatch {
                        expected: perm.len(),
                        got: s.nrows(),
                    });
                }
                Ok(s.select(ndarray::Axis(0), perm))
            })
            .collect()
    }
}

/// Common trait for alignment strategies
pub trait PermutationAligner: Send + Sync {
    /// Align per-bin component sets (each components × frames)
    fn align(&self, sources: &[Array2<Complex64>]) -> BssResult<Alignment>;

    /// Strategy name
    fn name(&self) -> &str;
}

/// Closed set of aligners selected by configuration
#[derive(Debug, Clone)]
pub enum Aligner {
    /// Distribution divergence
    Divergence(DivergenceAligner),
    /// Correlation of statistics
    Correlation(CorrelationAligner),
}

impl Aligner {
    /// Build the aligner selected by `config.alignment`
    pub fn from_config(config: &BssConfig) -> Self {
        match config.alignment {
            AlignmentStrategy::Divergence => Aligner::Divergence(DivergenceAligner::default()),
            AlignmentStrategy::Correlation => Aligner::Correlation(CorrelationAligner::new(config.correlation_feature)),
        }
    }
}

impl PermutationAligner for Aligner {
    fn align(&self, sources: &[Array2<Complex64>]) -> BssResult<Alignment> {
        match self {
            Aligner::Divergence(a) => a.align(sources),
            Aligner::Correlation(a) => a.align(sources),
        }
    }

    fn name(&self) -> &str {
        match self {
            Aligner::Divergence(a) => a.name(),
            Aligner::Correlation(a) => a.name(),
        }
    }
}

/// All permutations of `0..n` in lexicographic order
pub fn permutations(n: usize) -> Vec<Vec<usize>> {
    let mut current: Vec<usize> = (0..n).collect();
    let mut all = vec![current.clone()];
    if n < 2 {
        return all;
    }

    loop {
        // Next lexicographic permutation
        let Some(i) = (0..n - 1).rev().find(|&i| current[i] < current[i + 1]) else {
            return all;
        };
        let j = (i + 1..n).rev().find(|&j| current[j] > current[i]).unwrap_or(i + 1);
        current.swap(i, j);
        current[i + 1..].reverse();
        all.push(current.clone());
    }
}

/// Best permutation under `score` (higher is better) with its runner-up score
///
/// Returns `(permutation, best, runner_up)`; `runner_up` is `-inf` when only
/// one permutation exists.
pub(crate) fn best_permutation<F>(candidates: &[Vec<usize>], mut score: F) -> (Vec<usize>, f64, f64)
where
    F: FnMut(&[usize]) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    let mut runner_up = f64::NEG_INFINITY;
    for (idx, perm) in candidates.iter().enumerate() {
        let value = score(perm);
        match best {
            Some((_, b)) if value > b => {
                runner_up = b;
                best = Some((idx, value));
            }
            Some(_) => runner_up = runner_up.max(value),
            None => best = Some((idx, value)),
        }
    }
    match best {
        Some((idx, value)) => (candidates[idx].clone(), value, runner_up),
        None => (Vec::new(), f64::NEG_INFINITY, f64::NEG_INFINITY),
    }
}

/// Relabel slots so `reference` keeps its local order
pub(crate) fn canonicalize(permutations: &mut [Vec<usize>], reference: usize) {
    let Some(anchor) = permutations.get(reference) else {
        return;
    };
    let mut inverse = vec![0; anchor.len()];
    for (slot, &local) in anchor.iter().enumerate() {
        inverse[local] = slot;
    }
    for perm in permutations.iter_mut() {
        let old = perm.clone();
        for (slot, entry) in perm.iter_mut().enumerate() {
            *entry = old[inverse[slot]];
        }
    }
}

/// Shared shape checks; returns `(bins, components, frames)`
pub(crate) fn check_sources(sources: &[Array2<Complex64>]) -> BssResult<(usize, usize, usize)> {
    let Some(first) = sources.first() else {
        return Ok((0, 0, 0));
    };
    let (components, frames) = first.dim();
    for s in sources {
        if s.dim() != (components, frames) {
            return Err(BssError::BufferMismatch {
                expected: components * frames,
                got: s.len(),
            });
        }
    }
    Ok((sources.len(), components, frames))
}

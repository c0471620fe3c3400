//! End-to-end tests for the frequency-domain separation pipeline
//!
//! Verifies:
//! - Pulse + artifact reassemble the reference channel wherever segments cover it
//! - The pulse output tracks the true pulse better than the raw channel
//! - A non-finite region fails only the segments that contain it
//! - Identical channels degrade gracefully instead of failing
//! - Both alignment strategies keep ordered bins and undo swapped ones
//! - Sequential and parallel processing agree
//! - Pulse rate is recovered from the reassembled output

use approx::assert_abs_diff_eq;
use ndarray::Array2;
use num_complex::Complex64;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::f64::consts::PI;

use ppg_bss::alignment::{CorrelationAligner, DivergenceAligner, pearson};
use ppg_bss::{
    AlignmentStrategy, BssConfig, BssError, FrequencyDomainBss, PermutationAligner, PulseRateEstimator,
    SegmentStatus, SeparationAlgorithm,
};

const SAMPLE_RATE: f64 = 50.0;

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// 72 BPM pulse with a second harmonic
fn generate_pulse(samples: usize) -> Vec<f64> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE;
            (2.0 * PI * 1.2 * t).sin() + 0.35 * (2.0 * PI * 2.4 * t + 0.4).sin()
        })
        .collect()
}

/// Slow swaying motion plus broadband jitter
fn generate_motion(samples: usize, seed: u64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE;
            1.5 * (2.0 * PI * 0.3 * t).sin() + 0.3 * rng.random_range(-1.0..1.0)
        })
        .collect()
}

/// Red and infrared channels with different pulse/motion weights
fn generate_channels(samples: usize) -> (Vec<f64>, Vec<f64>) {
    let pulse = generate_pulse(samples);
    let motion = generate_motion(samples, 42);
    let red = pulse.iter().zip(&motion).map(|(p, m)| 0.5 * p + 1.0 * m).collect();
    let infrared = pulse.iter().zip(&motion).map(|(p, m)| 1.0 * p + 0.4 * m).collect();
    (red, infrared)
}

fn assert_reassembles(reference: &[f64], pulse: &[f64], artifact: &[f64], coverage: &[f64]) {
    let mut checked = 0;
    for i in 0..reference.len() {
        if coverage[i] > 1e-2 {
            let sum = pulse[i] + artifact[i];
            assert!(
                (sum - reference[i]).abs() < 1e-6,
                "sample {i}: pulse + artifact = {sum}, reference {}",
                reference[i]
            );
            checked += 1;
        }
    }
    assert!(checked > reference.len() / 2, "only {checked} covered samples");
}

/// Pearson correlation restricted to samples with reassembly weight
fn covered_correlation(signal: &[f64], truth: &[f64], coverage: &[f64]) -> f64 {
    let (a, b): (Vec<f64>, Vec<f64>) = signal
        .iter()
        .zip(truth)
        .zip(coverage)
        .filter(|&(_, &w)| w > 1e-2)
        .map(|((&s, &t), _)| (s, t))
        .unzip();
    pearson(&a, &b)
}

/// Bin-slices whose two components carry distinct envelopes and magnitude laws
fn generate_bins(bins: usize, frames: usize, swapped: &[usize]) -> Vec<Array2<Complex64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..bins)
        .map(|k| {
            let gain = 1.0 + 0.2 * k as f64;
            let mut slice = Array2::<Complex64>::zeros((2, frames));
            for t in 0..frames {
                let phase_a = Complex64::from_polar(1.0, rng.random_range(0.0..2.0 * PI));
                let phase_b = Complex64::from_polar(1.0, rng.random_range(0.0..2.0 * PI));
                // Heavy-tailed magnitude riding a slow envelope
                let spike = (-(rng.random_range(1e-12..1.0f64)).ln()).powf(1.25);
                let a = (1.0 + 0.8 * (2.0 * PI * t as f64 / 40.0).sin()) * spike;
                // Near-constant magnitude riding a faster envelope
                let b = 1.0 + 0.5 * (2.0 * PI * t as f64 / 13.0 + 1.0).sin();
                let (first, second) = (phase_a * a * gain, phase_b * b * gain);
                if swapped.contains(&k) {
                    slice[[0, t]] = second;
                    slice[[1, t]] = first;
                } else {
                    slice[[0, t]] = first;
                    slice[[1, t]] = second;
                }
            }
            slice
        })
        .collect()
}

fn expected_permutations(bins: usize, swapped: &[usize]) -> Vec<Vec<usize>> {
    (0..bins)
        .map(|k| if swapped.contains(&k) { vec![1, 0] } else { vec![0, 1] })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// REASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_output_reassembles_reference_channel() {
    let (red, infrared) = generate_channels(2048);
    for algorithm in [
        SeparationAlgorithm::SecondOrder,
        SeparationAlgorithm::JointDiagonalization,
        SeparationAlgorithm::AdaptiveHos,
    ] {
        let bss = FrequencyDomainBss::new(BssConfig::default().with_algorithm(algorithm)).unwrap();
        let output = bss.process(&red, &infrared).unwrap();

        assert_eq!(output.pulse.len(), red.len());
        assert_eq!(output.artifact.len(), red.len());
        assert_eq!(output.failed_segments(), 0, "{algorithm:?}");
        assert!(output.segments.iter().all(|s| s.pulse_component.is_some()));
        assert_reassembles(&infrared, &output.pulse, &output.artifact, &output.coverage);
    }
}

#[test]
fn test_trailing_samples_have_no_coverage() {
    let (red, infrared) = generate_channels(700);
    let bss = FrequencyDomainBss::new(BssConfig::default()).unwrap();
    let output = bss.process(&red, &infrared).unwrap();

    // 512-sample segments every 256: only one fits in 700 samples
    assert_eq!(output.segments.len(), 1);
    assert!(output.coverage[512..].iter().all(|&w| w == 0.0));
    assert!(output.pulse[512..].iter().all(|&p| p == 0.0));
}

#[test]
fn test_identical_channels_degrade_gracefully() {
    let (_, infrared) = generate_channels(1024);
    let bss = FrequencyDomainBss::new(BssConfig::default()).unwrap();
    let output = bss.process(&infrared, &infrared).unwrap();

    let bins = bss.config().num_bins();
    for segment in &output.segments {
        assert_eq!(segment.status, SegmentStatus::Degraded);
        assert_eq!(segment.degenerate_bins.len(), bins);
    }
    assert!(output.pulse.iter().chain(&output.artifact).all(|x| x.is_finite()));
    assert_reassembles(&infrared, &output.pulse, &output.artifact, &output.coverage);
}

#[test]
fn test_sequential_matches_parallel() {
    let (red, infrared) = generate_channels(1536);
    let config = BssConfig::default().with_alignment(AlignmentStrategy::Divergence);

    let parallel = FrequencyDomainBss::new(config.clone().with_parallel(true))
        .unwrap()
        .process(&red, &infrared)
        .unwrap();
    let sequential = FrequencyDomainBss::new(config.with_parallel(false))
        .unwrap()
        .process(&red, &infrared)
        .unwrap();

    assert_abs_diff_eq!(parallel.pulse.as_slice(), sequential.pulse.as_slice(), epsilon = 1e-12);
    assert_abs_diff_eq!(parallel.artifact.as_slice(), sequential.artifact.as_slice(), epsilon = 1e-12);
    assert_eq!(parallel.segments, sequential.segments);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEPARATION QUALITY
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_default_pipeline_extracts_pulse() {
    let (red, infrared) = generate_channels(4096);
    let truth = generate_pulse(4096);
    let bss = FrequencyDomainBss::new(BssConfig::default()).unwrap();
    let output = bss.process(&red, &infrared).unwrap();

    let raw = covered_correlation(&infrared, &truth, &output.coverage);
    let separated = covered_correlation(&output.pulse, &truth, &output.coverage);
    assert!(separated > raw, "pulse output {separated:.3} vs raw infrared {raw:.3}");
    assert!(separated > 0.95, "pulse output correlation {separated:.3}");
}

#[test]
fn test_pulse_correlation_floor_per_strategy() {
    let (red, infrared) = generate_channels(4096);
    let truth = generate_pulse(4096);

    // Only the second-order solver with correlation alignment beats the raw
    // channel on this mixture; the other floors guard against regressions.
    let floors = [
        (SeparationAlgorithm::SecondOrder, AlignmentStrategy::Correlation, 0.95),
        (SeparationAlgorithm::SecondOrder, AlignmentStrategy::Divergence, 0.8),
        (SeparationAlgorithm::JointDiagonalization, AlignmentStrategy::Correlation, 0.55),
        (SeparationAlgorithm::AdaptiveHos, AlignmentStrategy::Correlation, 0.6),
        (SeparationAlgorithm::JointDiagonalization, AlignmentStrategy::Divergence, 0.3),
        (SeparationAlgorithm::AdaptiveHos, AlignmentStrategy::Divergence, 0.2),
    ];
    for (algorithm, alignment, floor) in floors {
        let config = BssConfig::default().with_algorithm(algorithm).with_alignment(alignment);
        let output = FrequencyDomainBss::new(config).unwrap().process(&red, &infrared).unwrap();
        let separated = covered_correlation(&output.pulse, &truth, &output.coverage);
        assert!(
            separated > floor,
            "{algorithm:?}/{alignment:?}: pulse correlation {separated:.3} below {floor}"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEGMENT ISOLATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_non_finite_region_fails_only_its_segment() {
    // 512-sample segments every 384: [0, 512), [384, 896), [768, 1280), [1152, 1664)
    let (mut red, infrared) = generate_channels(1664);
    red[600] = f64::NAN;
    let bss = FrequencyDomainBss::new(BssConfig::default().with_segments(512, 128)).unwrap();
    let output = bss.process(&red, &infrared).unwrap();

    assert_eq!(output.segments.len(), 4);
    assert_eq!(output.failed_segments(), 1);
    assert!(matches!(
        output.segments[1].status,
        SegmentStatus::Failed(BssError::InvalidInput(_))
    ));
    for index in [0, 2, 3] {
        assert!(output.segments[index].is_usable(), "segment {index}");
        assert!(output.segments[index].pulse_component.is_some());
    }

    assert!(output.pulse.iter().chain(&output.artifact).all(|x| x.is_finite()));
    // Only the failed segment covers [512, 768)
    for i in 512..768 {
        assert_eq!(output.coverage[i], 0.0, "coverage at {i}");
        assert_eq!(output.pulse[i], 0.0);
        assert_eq!(output.artifact[i], 0.0);
    }
    assert_reassembles(&infrared, &output.pulse, &output.artifact, &output.coverage);
}

// ═══════════════════════════════════════════════════════════════════════════════
// ALIGNMENT
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_aligners_keep_ordered_bins() {
    let bins = generate_bins(6, 400, &[]);
    let aligners: [&dyn PermutationAligner; 2] = [&CorrelationAligner::default(), &DivergenceAligner::default()];
    for aligner in aligners {
        let alignment = aligner.align(&bins).unwrap();
        assert!(alignment.is_identity(), "{}: {:?}", aligner.name(), alignment.permutations);
        assert!(alignment.confident);
        assert!(alignment.unaligned_bins.is_empty());
    }
}

#[test]
fn test_aligners_undo_swapped_bins() {
    let swapped = [1, 4];
    let bins = generate_bins(6, 400, &swapped);
    let aligners: [&dyn PermutationAligner; 2] = [&CorrelationAligner::default(), &DivergenceAligner::default()];
    for aligner in aligners {
        let alignment = aligner.align(&bins).unwrap();
        assert_eq!(
            alignment.permutations,
            expected_permutations(6, &swapped),
            "{}",
            aligner.name()
        );

        // After applying, slot 0 carries the heavy-tailed source everywhere
        let aligned = alignment.apply(&bins).unwrap();
        let reference = generate_bins(6, 400, &[]);
        for (k, (got, want)) in aligned.iter().zip(&reference).enumerate() {
            assert_eq!(got, want, "{} bin {k}", aligner.name());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PULSE RATE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_pulse_rate_from_output() {
    let (red, infrared) = generate_channels(3000);
    let bss = FrequencyDomainBss::new(BssConfig::default()).unwrap();
    let output = bss.process(&red, &infrared).unwrap();

    let covered: Vec<f64> = output
        .pulse
        .iter()
        .zip(&output.artifact)
        .zip(&output.coverage)
        .filter(|&(_, &w)| w > 0.0)
        .map(|((p, a), _)| p + a)
        .collect();
    let total_rate = PulseRateEstimator::new(SAMPLE_RATE).unwrap().estimate(&covered).unwrap();
    assert!((total_rate - 72.0).abs() < 2.0, "reassembled rate {total_rate}");

    let pulse_rate = bss.pulse_rate(&output).unwrap();
    assert!((30.0..=250.0).contains(&pulse_rate), "pulse rate {pulse_rate}");
}

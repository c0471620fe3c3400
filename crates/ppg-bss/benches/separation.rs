//! Separation benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ppg_bss::{BssConfig, FrequencyDomainBss, SeparationAlgorithm, Separator, Solver, Stft, WindowKind};
use ppg_bss::{WhiteningMode, whiten};

fn channels(len: usize) -> (Vec<f64>, Vec<f64>) {
    let pulse: Vec<f64> = (0..len).map(|i| (i as f64 * 0.15).sin()).collect();
    let motion: Vec<f64> = (0..len).map(|i| (i as f64 * 0.037).sin() + 0.2 * (i as f64 * 1.3).cos()).collect();
    let red = pulse.iter().zip(&motion).map(|(p, m)| 0.5 * p + m).collect();
    let infrared = pulse.iter().zip(&motion).map(|(p, m)| p + 0.4 * m).collect();
    (red, infrared)
}

fn bench_stft(c: &mut Criterion) {
    let stft = Stft::new(WindowKind::Hamming, 32, 8).unwrap();
    let (_, signal) = channels(512);

    c.bench_function("stft_forward_512", |b| {
        b.iter(|| stft.forward(black_box(&signal)).unwrap())
    });

    let spectrogram = stft.forward(&signal).unwrap();
    c.bench_function("stft_inverse_512", |b| {
        b.iter(|| stft.inverse(black_box(&spectrogram)).unwrap())
    });
}

fn bench_solvers(c: &mut Criterion) {
    let config = BssConfig::default();
    let stft = Stft::new(config.window, config.window_len, config.hop).unwrap();
    let (red, infrared) = channels(config.segment_len);
    let red_spec = stft.forward(&red).unwrap();
    let ir_spec = stft.forward(&infrared).unwrap();

    let mut x = ndarray::Array2::zeros((2, red_spec.num_frames()));
    x.row_mut(0).assign(&red_spec.bin(3));
    x.row_mut(1).assign(&ir_spec.bin(3));
    let whitened = whiten(&x, WhiteningMode::Covariance).unwrap().data;

    let mut group = c.benchmark_group("solver_bin");
    for algorithm in [
        SeparationAlgorithm::AdaptiveHos,
        SeparationAlgorithm::JointDiagonalization,
        SeparationAlgorithm::SecondOrder,
    ] {
        let solver = Solver::from_config(&config.clone().with_algorithm(algorithm));
        group.bench_with_input(BenchmarkId::from_parameter(solver.name()), &whitened, |b, w| {
            b.iter(|| solver.separate(black_box(w)).unwrap())
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let (red, infrared) = channels(50 * 60);

    for parallel in [false, true] {
        let bss = FrequencyDomainBss::new(BssConfig::default().with_parallel(parallel)).unwrap();
        let name = if parallel { "pipeline_60s_parallel" } else { "pipeline_60s_sequential" };
        c.bench_function(name, |b| {
            b.iter(|| bss.process(black_box(&red), black_box(&infrared)).unwrap())
        });
    }
}

criterion_group!(benches, bench_stft, bench_solvers, bench_pipeline);
criterion_main!(benches);

//! Frequency-domain BSS pipeline
//!
//! Segment → STFT → per-bin whitening and separation → permutation
//! alignment → projection back → ISTFT → entropy classification →
//! overlap-add. Segments are independent work units; inside a segment the
//! bins are independent up to alignment.

use ndarray::{Array2, Axis};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::alignment::{Aligner, Alignment, PermutationAligner};
use crate::config::BssConfig;
use crate::entropy::{EntropyClassifier, kurtosis};
use crate::error::{BssError, BssResult};
use crate::linalg::{identity, invert};
use crate::rate::PulseRateEstimator;
use crate::segment::{OverlapAdd, Segment, Segmenter};
use crate::separation::{Separator, Solver};
use crate::stft::{Spectrogram, Stft};
use crate::whitening::{WhiteningMode, whiten};

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome class of one segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentStatus {
    /// Every bin separated and aligned with confidence
    Clean,
    /// Output produced, but some bins fell back or alignment was ambiguous
    Degraded,
    /// No output; the segment contributes nothing to reassembly
    Failed(BssError),
}

/// Diagnostics for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReport {
    /// Segment index
    pub index: usize,
    /// First sample in the input channels
    pub start: usize,
    /// Bins whose covariance or mixing matrix was singular (identity used)
    pub degenerate_bins: Vec<usize>,
    /// Bins whose solver hit its iteration cap
    pub unconverged_bins: Vec<usize>,
    /// False when alignment could not justify its permutations
    pub alignment_confident: bool,
    /// Bins left out of alignment
    pub unaligned_bins: Vec<usize>,
    /// Histogram entropy per aligned component (empty until classified)
    pub entropies: Vec<f64>,
    /// Excess kurtosis per aligned component
    pub kurtosis: Vec<f64>,
    /// Component designated as pulse
    pub pulse_component: Option<usize>,
    /// Outcome class
    pub status: SegmentStatus,
}

impl SegmentReport {
    fn failed(index: usize, start: usize, error: BssError) -> Self {
        Self {
            index,
            start,
            degenerate_bins: Vec::new(),
            unconverged_bins: Vec::new(),
            alignment_confident: false,
            unaligned_bins: Vec::new(),
            entropies: Vec::new(),
            kurtosis: Vec::new(),
            pulse_component: None,
            status: SegmentStatus::Failed(error),
        }
    }

    /// True if the segment produced output
    pub fn is_usable(&self) -> bool {
        !matches!(self.status, SegmentStatus::Failed(_))
    }
}

/// Aligned source set of one segment (classification deferred)
#[derive(Debug, Clone)]
pub struct SegmentSeparation {
    /// Segment index
    pub index: usize,
    /// First sample in the input channels
    pub start: usize,
    /// Aligned component spectrograms, one per output slot
    pub spectra: Vec<Spectrogram>,
    /// Time-domain components (segment length, still Bartlett-tapered)
    pub sources: Vec<Vec<f64>>,
    /// Permutations chosen for the bins
    pub alignment: Option<Alignment>,
    /// Diagnostics
    pub report: SegmentReport,
}

/// Reassembled, classified output
#[derive(Debug, Clone)]
pub struct BssOutput {
    /// Pulse-designated signal, input length
    pub pulse: Vec<f64>,
    /// Sum of the artifact-designated signals, input length
    pub artifact: Vec<f64>,
    /// Accumulated segment weights; zero where no segment contributed
    pub coverage: Vec<f64>,
    /// Per-segment diagnostics
    pub segments: Vec<SegmentReport>,
}

impl BssOutput {
    /// Number of segments that produced output but were flagged
    pub fn degraded_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Degraded)
            .count()
    }

    /// Number of segments that produced no output
    pub fn failed_segments(&self) -> usize {
        self.segments.iter().filter(|s| !s.is_usable()).count()
    }
}

/// Separation result of one bin
struct BinOutcome {
    sources: Array2<Complex64>,
    mixing: Array2<Complex64>,
    degenerate: bool,
    converged: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

fn map_units<T, F>(parallel: bool, count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if parallel {
        (0..count).into_par_iter().map(f).collect()
    } else {
        (0..count).map(f).collect()
    }
}

/// Two-channel frequency-domain blind source separation
#[derive(Debug)]
pub struct FrequencyDomainBss {
    config: BssConfig,
    segmenter: Segmenter,
    stft: Stft,
    solver: Solver,
    aligner: Aligner,
    classifier: EntropyClassifier,
}

impl FrequencyDomainBss {
    /// Validate the configuration and build every stage
    pub fn new(config: BssConfig) -> BssResult<Self> {
        config.validate()?;
        Ok(Self {
            segmenter: Segmenter::new(config.segment_len, config.segment_overlap)?,
            stft: Stft::new(config.window, config.window_len, config.hop)?,
            solver: Solver::from_config(&config),
            aligner: Aligner::from_config(&config),
            classifier: EntropyClassifier::from_config(&config),
            config,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &BssConfig {
        &self.config
    }

    /// Short-time transform in use
    pub fn stft(&self) -> &Stft {
        &self.stft
    }

    fn check_channels(&self, red: &[f64], infrared: &[f64]) -> BssResult<()> {
        if red.len() != infrared.len() {
            return Err(BssError::BufferMismatch {
                expected: red.len(),
                got: infrared.len(),
            });
        }
        if self.segmenter.count(red.len()) == 0 {
            return Err(BssError::InsufficientData {
                needed: self.config.segment_len,
                got: red.len(),
            });
        }
        Ok(())
    }

    /// Whiten and separate one bin-slice (channels × frames)
    fn separate_bin(&self, x: &Array2<Complex64>) -> BssResult<BinOutcome> {
        let fallback = |x: &Array2<Complex64>| BinOutcome {
            sources: x.clone(),
            mixing: identity(x.nrows()),
            degenerate: true,
            converged: true,
        };

        let whitening = match whiten(x, WhiteningMode::Covariance) {
            Ok(w) => w,
            Err(e) if e.is_recoverable() => return Ok(fallback(x)),
            Err(e) => return Err(e),
        };

        let separation = self.solver.separate(&whitening.data)?;
        if separation.degenerate {
            return Ok(fallback(x));
        }

        // Mixing of the raw bin: (W K)⁻¹
        let total = separation.unmixing.dot(&whitening.sphering);
        let Some(mixing) = invert(&total) else {
            return Ok(fallback(x));
        };

        Ok(BinOutcome {
            sources: separation.sources,
            mixing,
            degenerate: false,
            converged: separation.converged,
        })
    }

    /// Separate and align one segment pair
    fn separate_segment(&self, index: usize, red: &Segment, infrared: &Segment) -> BssResult<SegmentSeparation> {
        if red.samples.iter().chain(&infrared.samples).any(|x| !x.is_finite()) {
            return Err(BssError::InvalidInput(format!(
                "segment {index} at sample {} contains non-finite samples",
                red.start
            )));
        }

        let red_spec = self.stft.forward(&red.samples)?;
        let ir_spec = self.stft.forward(&infrared.samples)?;
        let bins = red_spec.num_bins();
        let frames = red_spec.num_frames();

        let outcomes = map_units(self.config.parallel, bins, |k| {
            let mut x = Array2::<Complex64>::zeros((2, frames));
            x.row_mut(0).assign(&red_spec.bin(k));
            x.row_mut(1).assign(&ir_spec.bin(k));
            self.separate_bin(&x)
        })
        .into_iter()
        .collect::<BssResult<Vec<BinOutcome>>>()?;

        let degenerate_bins: Vec<usize> = (0..bins).filter(|&k| outcomes[k].degenerate).collect();
        let unconverged_bins: Vec<usize> = (0..bins).filter(|&k| !outcomes[k].converged).collect();
        if !degenerate_bins.is_empty() {
            log::warn!("segment {index}: identity fallback in bins {degenerate_bins:?}");
        }
        if !unconverged_bins.is_empty() {
            log::warn!("segment {index}: solver did not converge in bins {unconverged_bins:?}");
        }

        let sources: Vec<Array2<Complex64>> = outcomes.iter().map(|o| o.sources.clone()).collect();
        let alignment = self.aligner.align(&sources)?;
        if !alignment.confident {
            log::warn!("segment {index}: {} alignment is ambiguous", self.aligner.name());
        }
        let aligned = alignment.apply(&sources)?;

        let components = aligned.first().map_or(0, |s| s.nrows());
        let reference = self.config.reference.index();
        let mut spectra = Vec::with_capacity(components);
        for slot in 0..components {
            let mut data = Array2::<Complex64>::zeros((frames, bins));
            for (k, bin) in aligned.iter().enumerate() {
                let local = alignment.permutations[k][slot];
                let gain = if self.config.projection_back {
                    outcomes[k].mixing[[reference, local]]
                } else {
                    Complex64::new(1.0, 0.0)
                };
                data.column_mut(k).assign(&bin.row(slot).mapv(|v| v * gain));
            }
            spectra.push(Spectrogram {
                data,
                signal_len: red_spec.signal_len,
            });
        }

        let time_sources = spectra
            .iter()
            .map(|s| self.stft.inverse(s))
            .collect::<BssResult<Vec<Vec<f64>>>>()?;

        let degraded = !degenerate_bins.is_empty() || !unconverged_bins.is_empty() || !alignment.confident;
        let report = SegmentReport {
            index,
            start: red.start,
            degenerate_bins,
            unconverged_bins,
            alignment_confident: alignment.confident,
            unaligned_bins: alignment.unaligned_bins.clone(),
            entropies: Vec::new(),
            kurtosis: time_sources.iter().map(|s| kurtosis(s)).collect(),
            pulse_component: None,
            status: if degraded {
                SegmentStatus::Degraded
            } else {
                SegmentStatus::Clean
            },
        };

        log::debug!(
            "segment {index}: {bins} bins, {} degenerate, {} unconverged, alignment {}",
            report.degenerate_bins.len(),
            report.unconverged_bins.len(),
            if report.alignment_confident { "confident" } else { "ambiguous" }
        );

        Ok(SegmentSeparation {
            index,
            start: red.start,
            spectra,
            sources: time_sources,
            alignment: Some(alignment),
            report,
        })
    }

    /// Aligned per-segment source sets, classification deferred
    ///
    /// A segment that fails is returned with [`SegmentStatus::Failed`] and
    /// no sources; the other segments are unaffected.
    pub fn separate_segments(&self, red: &[f64], infrared: &[f64]) -> BssResult<Vec<SegmentSeparation>> {
        self.check_channels(red, infrared)?;

        let red_segments: Vec<Segment> = self.segmenter.segments(red).collect();
        let ir_segments: Vec<Segment> = self.segmenter.segments(infrared).collect();

        Ok(map_units(self.config.parallel, red_segments.len(), |i| {
            let (r, ir) = (&red_segments[i], &ir_segments[i]);
            self.separate_segment(i, r, ir).unwrap_or_else(|e| {
                log::warn!("segment {i} at sample {} failed: {e}", r.start);
                SegmentSeparation {
                    index: i,
                    start: r.start,
                    spectra: Vec::new(),
                    sources: Vec::new(),
                    alignment: None,
                    report: SegmentReport::failed(i, r.start, e),
                }
            })
        }))
    }

    /// Separate, classify and reassemble both channels
    pub fn process(&self, red: &[f64], infrared: &[f64]) -> BssResult<BssOutput> {
        let separations = self.separate_segments(red, infrared)?;

        let len = red.len();
        let window = self.segmenter.window();
        let mut pulse = OverlapAdd::new(len);
        let mut artifact = OverlapAdd::new(len);
        let mut reports = Vec::with_capacity(separations.len());

        for separation in separations {
            let SegmentSeparation {
                index,
                start,
                sources,
                mut report,
                ..
            } = separation;
            if !report.is_usable() {
                reports.push(report);
                continue;
            }

            let candidates: Vec<&[f64]> = sources.iter().map(Vec::as_slice).collect();
            let classification = match self.classifier.classify(&candidates) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("segment {index}: classification failed: {e}");
                    reports.push(SegmentReport::failed(index, start, e));
                    continue;
                }
            };

            let mut rest = vec![0.0; window.len()];
            for c in classification.artifacts() {
                rest.iter_mut().zip(&sources[c]).for_each(|(a, s)| *a += s);
            }
            pulse.add(start, &sources[classification.pulse], window)?;
            artifact.add(start, &rest, window)?;

            report.pulse_component = Some(classification.pulse);
            report.entropies = classification.entropies;
            reports.push(report);
        }

        let (pulse, coverage) = pulse.finish();
        let (artifact, _) = artifact.finish();

        let output = BssOutput {
            pulse,
            artifact,
            coverage,
            segments: reports,
        };
        log::info!(
            "separated {} segments with {} ({} degraded, {} failed)",
            output.segments.len(),
            self.solver.name(),
            output.degraded_segments(),
            output.failed_segments()
        );
        Ok(output)
    }

    /// Pulse rate of a processed output in BPM
    pub fn pulse_rate(&self, output: &BssOutput) -> BssResult<f64> {
        let covered: Vec<f64> = output
            .pulse
            .iter()
            .zip(&output.coverage)
            .filter(|&(_, &w)| w > 0.0)
            .map(|(&p, _)| p)
            .collect();
        PulseRateEstimator::new(self.config.sample_rate)?.estimate(&covered)
    }
}

/// Stack per-slot spectrogram bins into a bin-slice (slots × frames)
pub fn bin_slice(spectra: &[Spectrogram], bin: usize) -> Array2<Complex64> {
    let frames = spectra.first().map_or(0, Spectrogram::num_frames);
    let mut out = Array2::<Complex64>::zeros((spectra.len(), frames));
    for (mut row, spec) in out.axis_iter_mut(Axis(0)).zip(spectra) {
        row.assign(&spec.bin(bin));
    }
    out
}

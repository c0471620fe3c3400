//! Short-time Fourier transform for segment spectrograms
//!
//! Forward: zero-pad the segment to a whole number of hops, window each
//! frame, one-sided real FFT. Inverse: windowed overlap-add normalized by
//! the accumulated squared window; samples where that normalization is zero
//! are left at zero.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use num_complex::Complex64;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::config::WindowKind;
use crate::error::{BssError, BssResult};

/// Symmetric window of length `n`
pub fn window(kind: WindowKind, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / denom;
            match kind {
                WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                WindowKind::Hanning => 0.5 - 0.5 * phase.cos(),
            }
        })
        .collect()
}

/// Complex spectrogram of one segment of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    /// Frames × one-sided frequency bins
    pub data: Array2<Complex64>,
    /// Length of the time-domain signal it was computed from
    pub signal_len: usize,
}

impl Spectrogram {
    /// Number of frames
    pub fn num_frames(&self) -> usize {
        self.data.nrows()
    }

    /// Number of frequency bins
    pub fn num_bins(&self) -> usize {
        self.data.ncols()
    }

    /// Values of one bin across all frames
    pub fn bin(&self, k: usize) -> ArrayView1<'_, Complex64> {
        self.data.column(k)
    }
}

/// STFT/ISTFT pair with fixed window and hop
///
/// FFT plans are built once and shared; buffers are allocated per call so
/// one instance can serve many threads.
pub struct Stft {
    window_len: usize,
    hop: usize,
    window: Vec<f64>,
    forward_plan: Arc<dyn RealToComplex<f64>>,
    inverse_plan: Arc<dyn ComplexToReal<f64>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("window_len", &self.window_len)
            .field("hop", &self.hop)
            .finish()
    }
}

impl Stft {
    /// Create a transform; `hop` must be in `1..=window_len`
    pub fn new(kind: WindowKind, window_len: usize, hop: usize) -> BssResult<Self> {
        if window_len < 2 {
            return Err(BssError::InvalidConfig(format!(
                "window length must be >= 2, got {window_len}"
            )));
        }
        if hop == 0 {
            return Err(BssError::InvalidConfig("hop must be > 0".into()));
        }
        if hop > window_len {
            return Err(BssError::InvalidConfig(format!(
                "hop {hop} is longer than the window ({window_len})"
            )));
        }

        let mut planner = RealFftPlanner::<f64>::new();
        Ok(Self {
            window_len,
            hop,
            window: window(kind, window_len),
            forward_plan: planner.plan_fft_forward(window_len),
            inverse_plan: planner.plan_fft_inverse(window_len),
        })
    }

    /// Window length (= FFT length)
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Hop size
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// One-sided bin count
    pub fn num_bins(&self) -> usize {
        self.window_len / 2 + 1
    }

    /// Frame count for a signal of `len` samples (at least one frame)
    pub fn num_frames(&self, len: usize) -> usize {
        if len <= self.window_len {
            return 1;
        }
        (len - self.window_len + self.hop).div_ceil(self.hop)
    }

    /// Center frequency of bin `k` in Hz
    pub fn bin_frequency(&self, k: usize, sample_rate: f64) -> f64 {
        k as f64 * sample_rate / self.window_len as f64
    }

    /// Forward transform
    pub fn forward(&self, signal: &[f64]) -> BssResult<Spectrogram> {
        if signal.is_empty() {
            return Err(BssError::InsufficientData { needed: 1, got: 0 });
        }

        let frames = self.num_frames(signal.len());
        let padded_len = self.window_len + (frames - 1) * self.hop;
        let mut padded = vec![0.0; padded_len];
        padded[..signal.len()].copy_from_slice(signal);

        let mut data = Array2::<Complex64>::zeros((frames, self.num_bins()));
        let mut frame_time = self.forward_plan.make_input_vec();
        let mut frame_freq = self.forward_plan.make_output_vec();
        let mut scratch = self.forward_plan.make_scratch_vec();

        for m in 0..frames {
            let start = m * self.hop;
            for ((x, &s), &w) in frame_time
                .iter_mut()
                .zip(&padded[start..start + self.window_len])
                .zip(&self.window)
            {
                *x = s * w;
            }

            self.forward_plan
                .process_with_scratch(&mut frame_time, &mut frame_freq, &mut scratch)
                .map_err(|e| BssError::Fft(format!("forward FFT failed: {e}")))?;

            for (dst, src) in data.row_mut(m).iter_mut().zip(&frame_freq) {
                *dst = *src;
            }
        }

        Ok(Spectrogram {
            data,
            signal_len: signal.len(),
        })
    }

    /// Inverse transform, trimmed to the original signal length
    pub fn inverse(&self, spectrogram: &Spectrogram) -> BssResult<Vec<f64>> {
        let mut out = self.inverse_full(spectrogram)?;
        out.truncate(spectrogram.signal_len);
        Ok(out)
    }

    /// Inverse transform over the full padded span
    pub fn inverse_full(&self, spectrogram: &Spectrogram) -> BssResult<Vec<f64>> {
        let bins = self.num_bins();
        if spectrogram.num_bins() != bins {
            return Err(BssError::BufferMismatch {
                expected: bins,
                got: spectrogram.num_bins(),
            });
        }

        let frames = spectrogram.num_frames();
        let total = self.window_len + frames.saturating_sub(1) * self.hop;
        let mut out = vec![0.0; total];
        let wsum = self.synthesis_weights(frames);

        let mut frame_freq = self.inverse_plan.make_input_vec();
        let mut frame_time = self.inverse_plan.make_output_vec();
        let mut scratch = self.inverse_plan.make_scratch_vec();
        let norm = 1.0 / self.window_len as f64;

        for m in 0..frames {
            for (dst, src) in frame_freq.iter_mut().zip(spectrogram.data.row(m)) {
                *dst = *src;
            }
            // DC (and Nyquist for even lengths) must be real for a real inverse
            frame_freq[0].im = 0.0;
            if self.window_len % 2 == 0 {
                frame_freq[bins - 1].im = 0.0;
            }

            self.inverse_plan
                .process_with_scratch(&mut frame_freq, &mut frame_time, &mut scratch)
                .map_err(|e| BssError::Fft(format!("inverse FFT failed: {e}")))?;

            let start = m * self.hop;
            for (i, (&x, &w)) in frame_time.iter().zip(&self.window).enumerate() {
                out[start + i] += x * norm * w;
            }
        }

        for (y, &w) in out.iter_mut().zip(&wsum) {
            if w != 0.0 {
                *y /= w;
            }
        }

        Ok(out)
    }

    /// Accumulated squared window for `frames` frames (the ISTFT normalization)
    pub fn synthesis_weights(&self, frames: usize) -> Vec<f64> {
        let total = self.window_len + frames.saturating_sub(1) * self.hop;
        let mut wsum = vec![0.0; total];
        for m in 0..frames {
            let start = m * self.hop;
            for (i, &w) in self.window.iter().enumerate() {
                wsum[start + i] += w * w;
            }
        }
        wsum
    }
}

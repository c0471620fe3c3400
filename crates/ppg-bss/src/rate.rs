//! Pulse rate from the separated pulse waveform

use realfft::RealFftPlanner;

use crate::error::{BssError, BssResult};

/// Dominant-frequency pulse rate estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseRateEstimator {
    sample_rate: f64,
    min_bpm: f64,
    max_bpm: f64,
}

impl PulseRateEstimator {
    /// Smallest FFT length; shorter inputs are zero-padded for resolution
    pub const MIN_FFT_LEN: usize = 4096;

    /// Estimator searching 30–250 BPM
    pub fn new(sample_rate: f64) -> BssResult<Self> {
        Self::with_range(sample_rate, 30.0, 250.0)
    }

    /// Estimator searching `min_bpm..=max_bpm`
    pub fn with_range(sample_rate: f64, min_bpm: f64, max_bpm: f64) -> BssResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(BssError::InvalidConfig(format!("sample rate must be positive, got {sample_rate}")));
        }
        if !(min_bpm > 0.0 && max_bpm > min_bpm) {
            return Err(BssError::InvalidConfig(format!(
                "invalid pulse range {min_bpm}..{max_bpm} BPM"
            )));
        }
        if min_bpm / 60.0 >= sample_rate / 2.0 {
            return Err(BssError::InvalidConfig(format!(
                "pulse range starts above Nyquist ({} Hz)",
                sample_rate / 2.0
            )));
        }
        Ok(Self {
            sample_rate,
            min_bpm,
            max_bpm,
        })
    }

    /// Rate in beats per minute of the strongest spectral peak in range
    pub fn estimate(&self, signal: &[f64]) -> BssResult<f64> {
        if signal.len() < 4 {
            return Err(BssError::InsufficientData {
                needed: 4,
                got: signal.len(),
            });
        }

        let mean = signal.iter().sum::<f64>() / signal.len() as f64;
        let fft_len = signal.len().next_power_of_two().max(Self::MIN_FFT_LEN);
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_len);

        let mut input = fft.make_input_vec();
        let n = signal.len();
        for (i, (dst, &x)) in input.iter_mut().zip(signal).enumerate() {
            // Hann taper against leakage from the segment edges
            let w = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos();
            *dst = (x - mean) * w;
        }
        let mut spectrum = fft.make_output_vec();
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| BssError::Fft(format!("rate FFT failed: {e}")))?;

        let resolution = self.sample_rate / fft_len as f64;
        let last = spectrum.len() - 1;
        let lo = ((self.min_bpm / 60.0) / resolution).ceil().max(1.0) as usize;
        let hi = (((self.max_bpm / 60.0) / resolution).floor() as usize).min(last);
        if lo > hi {
            return Err(BssError::InvalidConfig("pulse range is empty at this resolution".into()));
        }

        let magnitude: Vec<f64> = spectrum.iter().map(|c| c.norm()).collect();
        let peak = (lo..=hi)
            .max_by(|&a, &b| magnitude[a].total_cmp(&magnitude[b]))
            .unwrap_or(lo);
        if magnitude[peak] <= f64::MIN_POSITIVE {
            return Err(BssError::Degenerate("no spectral energy in pulse range".into()));
        }

        let refined = if peak > 0 && peak < last {
            let (s0, s1, s2) = (magnitude[peak - 1], magnitude[peak], magnitude[peak + 1]);
            let adjustment = (s2 - s0) / (2.0 * (2.0 * s1 - s0 - s2));
            if adjustment.is_finite() {
                peak as f64 + adjustment.clamp(-0.5, 0.5)
            } else {
                peak as f64
            }
        } else {
            peak as f64
        };

        Ok(refined * resolution * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_rate_of_pure_tone() {
        let fs = 50.0;
        // 72 BPM
        let signal: Vec<f64> = (0..1500).map(|i| (2.0 * PI * 1.2 * i as f64 / fs).sin() + 3.0).collect();
        let bpm = PulseRateEstimator::new(fs).unwrap().estimate(&signal).unwrap();
        assert!((bpm - 72.0).abs() < 1.0, "estimated {bpm}");
    }

    #[test]
    fn test_out_of_range_tone_ignored() {
        let fs = 50.0;
        // Strong 0.2 Hz drift (12 BPM) plus a weaker 1.5 Hz pulse (90 BPM)
        let signal: Vec<f64> = (0..3000)
            .map(|i| {
                let t = i as f64 / fs;
                5.0 * (2.0 * PI * 0.2 * t).sin() + (2.0 * PI * 1.5 * t).sin()
            })
            .collect();
        let bpm = PulseRateEstimator::new(fs).unwrap().estimate(&signal).unwrap();
        assert!((bpm - 90.0).abs() < 1.5, "estimated {bpm}");
    }

    #[test]
    fn test_invalid_settings() {
        assert!(PulseRateEstimator::new(0.0).is_err());
        assert!(PulseRateEstimator::with_range(50.0, 100.0, 60.0).is_err());
        assert!(PulseRateEstimator::new(50.0).unwrap().estimate(&[1.0, 2.0]).is_err());
        assert!(PulseRateEstimator::new(50.0).unwrap().estimate(&[0.0; 100]).is_err());
    }
}

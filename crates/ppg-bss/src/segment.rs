//! Segmentation and segment reassembly
//!
//! - Overlapping fixed-length segments tapered by a Bartlett window
//! - The trailing partial segment is dropped, never padded
//! - Weighted overlap-add back into a continuous channel

use crate::error::{BssError, BssResult};

/// Symmetric Bartlett (triangular) window with zero end points
pub fn bartlett(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let half = (n - 1) as f64 / 2.0;
    (0..n)
        .map(|i| 1.0 - ((i as f64 - half) / half).abs())
        .collect()
}

/// One tapered slice of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position of the first sample in the source channel
    pub start: usize,
    /// Windowed samples, always `len` long
    pub samples: Vec<f64>,
}

/// Splits a channel into overlapping Bartlett-tapered segments
#[derive(Debug, Clone)]
pub struct Segmenter {
    len: usize,
    overlap: usize,
    window: Vec<f64>,
}

impl Segmenter {
    /// Create a segmenter; `overlap` must be smaller than `len`
    pub fn new(len: usize, overlap: usize) -> BssResult<Self> {
        if len == 0 {
            return Err(BssError::InvalidConfig("segment length must be > 0".into()));
        }
        if overlap >= len {
            return Err(BssError::InvalidConfig(format!(
                "segment overlap {overlap} must be smaller than segment length {len}"
            )));
        }
        Ok(Self {
            len,
            overlap,
            window: bartlett(len),
        })
    }

    /// Segment length
    pub fn segment_len(&self) -> usize {
        self.len
    }

    /// Samples between consecutive segment starts
    pub fn step(&self) -> usize {
        self.len - self.overlap
    }

    /// Taper applied to every segment
    pub fn window(&self) -> &[f64] {
        &self.window
    }

    /// Number of full segments in a channel of `channel_len` samples
    pub fn count(&self, channel_len: usize) -> usize {
        if channel_len < self.len {
            0
        } else {
            (channel_len - self.len) / self.step() + 1
        }
    }

    /// Lazily iterate over the segments of a channel
    pub fn segments<'a>(&'a self, channel: &'a [f64]) -> Segments<'a> {
        Segments {
            segmenter: self,
            channel,
            next_start: 0,
        }
    }
}

/// Iterator returned by [`Segmenter::segments`]
pub struct Segments<'a> {
    segmenter: &'a Segmenter,
    channel: &'a [f64],
    next_start: usize,
}

impl Iterator for Segments<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let start = self.next_start;
        let end = start.checked_add(self.segmenter.len)?;
        if end > self.channel.len() {
            return None;
        }
        self.next_start = start + self.segmenter.step();

        let samples = self.channel[start..end]
            .iter()
            .zip(&self.segmenter.window)
            .map(|(x, w)| x * w)
            .collect();

        Some(Segment { start, samples })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .segmenter
            .count(self.channel.len().saturating_sub(self.next_start));
        (remaining, Some(remaining))
    }
}

/// Weighted overlap-add of processed segments
///
/// Each segment was tapered once on the way in, so the accumulated taper
/// (not its square) is the normalization. Positions no segment covers, or
/// covered only by zero weight, stay zero.
#[derive(Debug, Clone)]
pub struct OverlapAdd {
    output: Vec<f64>,
    weights: Vec<f64>,
}

impl OverlapAdd {
    /// Accumulator for a channel of `len` samples
    pub fn new(len: usize) -> Self {
        Self {
            output: vec![0.0; len],
            weights: vec![0.0; len],
        }
    }

    /// Add a processed segment starting at `start`, tapered by `window`
    pub fn add(&mut self, start: usize, samples: &[f64], window: &[f64]) -> BssResult<()> {
        if samples.len() != window.len() {
            return Err(BssError::BufferMismatch {
                expected: window.len(),
                got: samples.len(),
            });
        }
        if start + samples.len() > self.output.len() {
            return Err(BssError::BufferMismatch {
                expected: self.output.len(),
                got: start + samples.len(),
            });
        }

        for (i, (&s, &w)) in samples.iter().zip(window).enumerate() {
            self.output[start + i] += s;
            self.weights[start + i] += w;
        }
        Ok(())
    }

    /// Normalize and return `(signal, accumulated weights)`
    pub fn finish(self) -> (Vec<f64>, Vec<f64>) {
        let Self { mut output, weights } = self;
        for (y, &w) in output.iter_mut().zip(&weights) {
            if w > 0.0 {
                *y /= w;
            } else {
                *y = 0.0;
            }
        }
        (output, weights)
    }
}

//! Stereo sample blocks and the buffers that produce or consume them.
//!
//! Two buffers exist: `ToneBuffer`, a precomputed read-only sine tone that
//! shrinks as it is read, and `RelayBuffer`, the growable FIFO between the
//! capture and playback sides of the relay.

use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;
use tracing::{debug, warn};

/// Fixed integer sample type used across the engine.
pub type Sample = i16;

/// Default number of silent frames a fresh relay buffer starts with.
pub const DEFAULT_RELAY_PRELOAD: usize = 500;

/// A pair of equal-length channel blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoBlock {
    pub left: Vec<Sample>,
    pub right: Vec<Sample>,
}

impl StereoBlock {
    pub fn silent(frames: usize) -> Self {
        StereoBlock {
            left: vec![0; frames],
            right: vec![0; frames],
        }
    }

    pub fn with_capacity(frames: usize) -> Self {
        StereoBlock {
            left: Vec::with_capacity(frames),
            right: Vec::with_capacity(frames),
        }
    }

    /// Frames in the block (the shorter channel if they ever differ).
    pub fn len(&self) -> usize {
        self.left.len().min(self.right.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split interleaved samples into left/right. Mono input is duplicated to
    /// both channels; channels beyond the second are ignored.
    pub fn from_interleaved(data: &[Sample], channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let mut block = StereoBlock::with_capacity(frames);
        for frame in data.chunks_exact(channels) {
            let left = frame[0];
            let right = if channels == 1 { left } else { frame[1] };
            block.left.push(left);
            block.right.push(right);
        }
        block
    }

    /// Write the block into an interleaved stereo buffer. Frames past the end
    /// of the block are zeroed.
    pub fn write_interleaved(&self, out: &mut [Sample]) {
        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            frame[0] = self.left.get(i).copied().unwrap_or(0);
            frame[1] = self.right.get(i).copied().unwrap_or(0);
        }
    }

    /// Sample-wise saturating add of `other` into this block.
    pub fn mix(&mut self, other: &StereoBlock) {
        for (dst, src) in self.left.iter_mut().zip(&other.left) {
            *dst = dst.saturating_add(*src);
        }
        for (dst, src) in self.right.iter_mut().zip(&other.right) {
            *dst = dst.saturating_add(*src);
        }
    }

    pub fn extend(&mut self, other: &StereoBlock) {
        self.left.extend_from_slice(&other.left);
        self.right.extend_from_slice(&other.right);
    }

    /// Zero-pad both channels up to `frames`.
    pub fn pad_to(&mut self, frames: usize) {
        self.left.resize(frames.max(self.left.len()), 0);
        self.right.resize(frames.max(self.right.len()), 0);
    }
}

/// Something the playback side can pull stereo frames from.
pub trait SampleBuffer: Send {
    /// Read up to `frames` frames. Implementations may return fewer.
    fn read(&mut self, frames: usize) -> StereoBlock;

    /// Append frames. Read-only buffers ignore the request.
    fn write(&mut self, block: StereoBlock);

    /// Frames still available to `read`.
    fn remaining(&self) -> usize;
}

// ── Tone ─────────────────────────────────────────────────────────────────────

/// Precomputed sine tone. Each read consumes from the front; once drained the
/// buffer reports zero remaining.
#[derive(Debug, Clone)]
pub struct ToneBuffer {
    left: Vec<Sample>,
    right: Vec<Sample>,
    position: usize,
    sample_rate: u32,
}

impl ToneBuffer {
    /// Synthesize `sample_rate * duration` frames at `frequency` Hz, with peak
    /// amplitude `Sample::MAX * 10^(level_dbfs / 20)`.
    pub fn new(sample_rate: u32, frequency: f64, duration: Duration, level_dbfs: f64) -> Self {
        let frames = (sample_rate as f64 * duration.as_secs_f64()) as usize;
        let amplitude = Sample::MAX as f64 * 10f64.powf(level_dbfs / 20.0);
        debug!(frequency, level_dbfs, frames, "generating tone buffer");

        let left: Vec<Sample> = (0..frames)
            .map(|i| {
                let phase = 2.0 * PI * frequency * i as f64 / sample_rate as f64;
                (amplitude * phase.sin())
                    .round()
                    .clamp(Sample::MIN as f64, Sample::MAX as f64) as Sample
            })
            .collect();
        let right = left.clone();

        ToneBuffer {
            left,
            right,
            position: 0,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total frames the tone was generated with.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

impl SampleBuffer for ToneBuffer {
    fn read(&mut self, frames: usize) -> StereoBlock {
        let end = (self.position + frames).min(self.left.len());
        let block = StereoBlock {
            left: self.left[self.position..end].to_vec(),
            right: self.right[self.position..end].to_vec(),
        };
        self.position = end;
        block
    }

    fn write(&mut self, block: StereoBlock) {
        warn!(frames = block.len(), "tone buffer is read-only; write ignored");
    }

    fn remaining(&self) -> usize {
        self.left.len() - self.position
    }
}

// ── Relay ────────────────────────────────────────────────────────────────────

/// FIFO of captured frames awaiting playback.
///
/// Starts with `preload` silent frames to absorb the capture→playback
/// hand-off. Reads never return short: an underrun left-pads what is buffered
/// with silence and leaves the buffer empty.
#[derive(Debug, Clone)]
pub struct RelayBuffer {
    left: VecDeque<Sample>,
    right: VecDeque<Sample>,
}

impl RelayBuffer {
    pub fn new(preload: usize) -> Self {
        RelayBuffer {
            left: VecDeque::from(vec![0; preload]),
            right: VecDeque::from(vec![0; preload]),
        }
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Append a single frame.
    pub fn push_frame(&mut self, left: Sample, right: Sample) {
        self.left.push_back(left);
        self.right.push_back(right);
    }
}

impl SampleBuffer for RelayBuffer {
    fn read(&mut self, frames: usize) -> StereoBlock {
        let buffered = self.len();
        if frames > buffered {
            let shortfall = frames - buffered;
            warn!(shortfall, "relay buffer underrun");
            let mut block = StereoBlock::silent(shortfall);
            block.left.extend(self.left.drain(..));
            block.right.extend(self.right.drain(..));
            return block;
        }
        StereoBlock {
            left: self.left.drain(..frames).collect(),
            right: self.right.drain(..frames).collect(),
        }
    }

    fn write(&mut self, block: StereoBlock) {
        let StereoBlock { mut left, mut right } = block;
        if left.len() != right.len() {
            let frames = left.len().min(right.len());
            warn!(
                left = left.len(),
                right = right.len(),
                frames,
                "relay write channel length mismatch; truncating"
            );
            left.truncate(frames);
            right.truncate(frames);
        }
        self.left.extend(left);
        self.right.extend(right);
    }

    fn remaining(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(from: i16, frames: usize) -> StereoBlock {
        StereoBlock {
            left: (0..frames as i16).map(|i| from + i).collect(),
            right: (0..frames as i16).map(|i| -(from + i)).collect(),
        }
    }

    #[test]
    fn relay_starts_with_preload_silence() {
        let mut relay = RelayBuffer::new(4);
        assert_eq!(relay.len(), 4);
        let block = relay.read(4);
        assert_eq!(block, StereoBlock::silent(4));
        assert!(relay.is_empty());
    }

    #[test]
    fn relay_round_trip_in_uneven_chunks() {
        let mut relay = RelayBuffer::new(0);
        relay.write(ramp(1, 5));
        relay.write(ramp(6, 7));

        let mut out = StereoBlock::default();
        for chunk in [3, 1, 6, 2] {
            out.extend(&relay.read(chunk));
        }
        assert_eq!(out, ramp(1, 12));
        assert!(relay.is_empty());
    }

    #[test]
    fn relay_partial_read_keeps_the_rest() {
        let mut relay = RelayBuffer::new(0);
        relay.write(ramp(1, 10));
        assert_eq!(relay.read(4), ramp(1, 4));
        assert_eq!(relay.remaining(), 6);
        assert_eq!(relay.read(6), ramp(5, 6));
    }

    #[test]
    fn relay_underrun_left_pads_and_empties() {
        let mut relay = RelayBuffer::new(0);
        relay.write(ramp(1, 3));
        let block = relay.read(8);
        assert_eq!(block.len(), 8);
        assert_eq!(&block.left[..5], &[0; 5]);
        assert_eq!(&block.left[5..], &[1, 2, 3]);
        assert_eq!(&block.right[5..], &[-1, -2, -3]);
        assert!(relay.is_empty());
    }

    #[test]
    fn relay_write_truncates_mismatched_channels() {
        let mut relay = RelayBuffer::new(0);
        relay.write(StereoBlock {
            left: vec![1, 2, 3],
            right: vec![4, 5],
        });
        assert_eq!(relay.len(), 2);
        let block = relay.read(2);
        assert_eq!(block.left, vec![1, 2]);
        assert_eq!(block.right, vec![4, 5]);
    }

    #[test]
    fn tone_length_and_channels() {
        let tone = ToneBuffer::new(8000, 1000.0, Duration::from_millis(500), -6.0);
        assert_eq!(tone.len(), 4000);
        assert_eq!(tone.remaining(), 4000);
        assert_eq!(tone.left, tone.right);
    }

    #[test]
    fn tone_peak_follows_level() {
        // 2 kHz at 8 kHz hits the sine peak every fourth sample.
        let tone = ToneBuffer::new(8000, 2000.0, Duration::from_millis(10), -6.0);
        let peak = tone.left.iter().map(|s| s.unsigned_abs()).max().unwrap();
        let expected = i16::MAX as f64 * 10f64.powf(-6.0 / 20.0);
        assert_relative_eq!(peak as f64, expected, max_relative = 0.001);
    }

    #[test]
    fn tone_truncates_reads_at_its_end() {
        let mut tone = ToneBuffer::new(1000, 100.0, Duration::from_millis(10), 0.0);
        assert_eq!(tone.read(6).len(), 6);
        assert_eq!(tone.read(6).len(), 4);
        assert_eq!(tone.remaining(), 0);
        assert!(tone.read(6).is_empty());
    }

    #[test]
    fn tone_write_is_ignored() {
        let mut tone = ToneBuffer::new(1000, 100.0, Duration::from_millis(10), 0.0);
        tone.write(StereoBlock::silent(50));
        assert_eq!(tone.remaining(), 10);
    }

    #[test]
    fn interleave_helpers() {
        let mono = StereoBlock::from_interleaved(&[1, 2, 3], 1);
        assert_eq!(mono.left, vec![1, 2, 3]);
        assert_eq!(mono.right, vec![1, 2, 3]);

        let stereo = StereoBlock::from_interleaved(&[1, -1, 2, -2], 2);
        assert_eq!(stereo.left, vec![1, 2]);
        assert_eq!(stereo.right, vec![-1, -2]);

        let mut out = [9i16; 6];
        stereo.write_interleaved(&mut out);
        assert_eq!(out, [1, -1, 2, -2, 0, 0]);
    }

    #[test]
    fn mix_adds_and_saturates() {
        let mut a = StereoBlock {
            left: vec![1, i16::MAX],
            right: vec![-1, i16::MIN],
        };
        let b = StereoBlock {
            left: vec![2, 10],
            right: vec![-2, -10],
        };
        a.mix(&b);
        assert_eq!(a.left, vec![3, i16::MAX]);
        assert_eq!(a.right, vec![-3, i16::MIN]);
    }
}

use crate::observers::{SubscriptionId, Subscribers};
use crate::sample_buffer::{Sample, StereoBlock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const FULL_SCALE: f64 = Sample::MAX as f64;

/// Loudness of one block per channel, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StereoLevel {
    pub left: f64,
    pub right: f64,
}

/// Level of a single channel: `20 * log10(rms / full scale)`.
/// An all-zero (or empty) block reports exactly `0`.
pub fn channel_level(samples: &[Sample]) -> f64 {
    let sum: u64 = samples
        .iter()
        .map(|&s| {
            let s = s as i64;
            (s * s) as u64
        })
        .sum();
    if sum == 0 {
        return 0.0;
    }
    let rms = (sum as f64 / samples.len() as f64).sqrt();
    20.0 * (rms / FULL_SCALE).log10()
}

pub fn stereo_level(block: &StereoBlock) -> StereoLevel {
    StereoLevel {
        left: channel_level(&block.left),
        right: channel_level(&block.right),
    }
}

struct MeterInner {
    left: AtomicU64,
    right: AtomicU64,
    observers: Subscribers<StereoLevel>,
}

/// Latest stereo level for one direction plus the observers that want every
/// reading. Published from the audio callbacks, read anywhere.
#[derive(Clone)]
pub struct LevelMonitor {
    inner: Arc<MeterInner>,
}

impl LevelMonitor {
    pub fn new() -> Self {
        LevelMonitor {
            inner: Arc::new(MeterInner {
                left: AtomicU64::new(0f64.to_bits()),
                right: AtomicU64::new(0f64.to_bits()),
                observers: Subscribers::new(),
            }),
        }
    }

    /// Most recent reading.
    pub fn level(&self) -> StereoLevel {
        StereoLevel {
            left: f64::from_bits(self.inner.left.load(Ordering::Relaxed)),
            right: f64::from_bits(self.inner.right.load(Ordering::Relaxed)),
        }
    }

    /// Store a reading and fan it out to observers.
    pub fn publish(&self, level: StereoLevel) {
        self.inner.left.store(level.left.to_bits(), Ordering::Relaxed);
        self.inner.right.store(level.right.to_bits(), Ordering::Relaxed);
        self.inner.observers.notify(level);
    }

    /// Measure a block and publish the result.
    pub fn measure(&self, block: &StereoBlock) -> StereoLevel {
        let level = stereo_level(block);
        self.publish(level);
        level
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(StereoLevel) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Reset the stored reading to zero (e.g. when streams close).
    pub fn reset(&self) {
        self.inner.left.store(0f64.to_bits(), Ordering::Relaxed);
        self.inner.right.store(0f64.to_bits(), Ordering::Relaxed);
    }
}

impl Default for LevelMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::Mutex;

    #[test]
    fn silence_is_exactly_zero() {
        assert_eq!(channel_level(&[0; 256]), 0.0);
        assert_eq!(channel_level(&[]), 0.0);
        let level = stereo_level(&StereoBlock::silent(64));
        assert_eq!(level, StereoLevel { left: 0.0, right: 0.0 });
    }

    #[test]
    fn full_scale_is_near_zero_dbfs() {
        assert_abs_diff_eq!(channel_level(&[i16::MAX; 512]), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn doubling_amplitude_adds_six_db() {
        let quiet = channel_level(&[1000; 512]);
        let loud = channel_level(&[2000; 512]);
        assert_abs_diff_eq!(loud - quiet, 20.0 * 2f64.log10(), epsilon = 1e-9);
    }

    #[test]
    fn extreme_samples_do_not_overflow() {
        let level = channel_level(&[i16::MIN; 100_000]);
        assert!(level > 0.0 && level < 0.001);
    }

    #[test]
    fn mono_mirrored_block_reports_equal_channels() {
        let block = StereoBlock::from_interleaved(&[500, -500, 700], 1);
        let level = stereo_level(&block);
        assert_eq!(level.left, level.right);
    }

    #[test]
    fn monitor_starts_at_zero_and_stores_latest() {
        let monitor = LevelMonitor::new();
        assert_eq!(monitor.level(), StereoLevel::default());
        monitor.publish(StereoLevel { left: -6.0, right: -12.0 });
        assert_eq!(monitor.level(), StereoLevel { left: -6.0, right: -12.0 });
        monitor.reset();
        assert_eq!(monitor.level(), StereoLevel::default());
    }

    #[test]
    fn monitor_fans_out_to_observers() {
        let monitor = LevelMonitor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = {
            let seen = seen.clone();
            monitor.subscribe(move |level| seen.lock().unwrap().push(level.left))
        };
        monitor.measure(&StereoBlock {
            left: vec![i16::MAX; 8],
            right: vec![0; 8],
        });
        assert!(monitor.unsubscribe(id));
        monitor.publish(StereoLevel::default());
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_abs_diff_eq!(seen[0], 0.0, epsilon = 1e-9);
    }
}

use crate::error::EngineError;
use crate::recurrence::ChimeKind;
use crate::sample_buffer::{Sample, SampleBuffer, StereoBlock, ToneBuffer};
use crate::scheduler::ChimeConfig;
use rodio::{OutputStream, Sink, Source};
use std::time::Duration;

/// A tone as a rodio source: interleaved stereo i16.
pub struct ToneSource {
    block: StereoBlock,
    sample_rate: u32,
    pos: usize,
}

impl ToneSource {
    pub fn new(mut tone: ToneBuffer) -> Self {
        let sample_rate = tone.sample_rate();
        let block = tone.read(tone.remaining());
        ToneSource {
            block,
            sample_rate,
            pos: 0,
        }
    }

    fn total_samples(&self) -> usize {
        self.block.len() * 2
    }
}

impl Iterator for ToneSource {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        let frame = self.pos / 2;
        let channel = if self.pos % 2 == 0 {
            &self.block.left
        } else {
            &self.block.right
        };
        let sample = *channel.get(frame)?;
        self.pos += 1;
        Some(sample)
    }
}

impl Source for ToneSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.total_samples() - self.pos)
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        let nanos = self.block.len() as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64;
        Some(Duration::from_nanos(nanos))
    }
}

/// Plays tones on the system default output, outside the relay engine.
/// Used to check chime settings by ear.
pub struct Player {
    _stream: OutputStream,
    sink: Sink,
}

impl Player {
    /// Initialize audio output and create a playback sink.
    pub fn new() -> Result<Self, EngineError> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| EngineError::Preview(format!("Failed to open audio output: {}", e)))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| EngineError::Preview(format!("Failed to create audio sink: {}", e)))?;
        Ok(Player {
            _stream: stream,
            sink,
        })
    }

    pub fn play_tone(&self, tone: ToneBuffer) {
        self.sink.append(ToneSource::new(tone));
        self.sink.play();
    }

    /// Block until everything queued has played.
    pub fn wait(&self) {
        self.sink.sleep_until_end();
    }
}

/// Play one chime as the schedule would, and wait for it to finish.
pub fn preview_chime(
    chimes: &ChimeConfig,
    kind: ChimeKind,
    sample_rate: u32,
) -> Result<(), EngineError> {
    let player = Player::new()?;
    player.play_tone(ToneBuffer::new(
        sample_rate,
        chimes.frequency,
        chimes.duration(kind),
        chimes.level_dbfs,
    ));
    player.wait();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone() -> ToneBuffer {
        ToneBuffer::new(8000, 1000.0, Duration::from_millis(10), -6.0)
    }

    #[test]
    fn source_interleaves_both_channels() {
        let source = ToneSource::new(tone());
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.current_frame_len(), Some(160));

        let samples: Vec<Sample> = source.collect();
        assert_eq!(samples.len(), 160);
        for frame in samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn source_reports_duration() {
        let source = ToneSource::new(tone());
        assert_eq!(source.total_duration(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn player_creation_succeeds_or_fails_gracefully() {
        match Player::new() {
            Ok(_player) => {}
            Err(e) => assert!(e.to_string().contains("Failed to open audio output")),
        }
    }
}

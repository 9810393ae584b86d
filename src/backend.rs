//! Boundary to the platform audio layer.
//!
//! The engine only needs two things from the platform: a device list and a
//! way to open a hardware-clocked stream that calls back once per buffer
//! period. `CpalBackend` talks to real hardware; `SimulatedBackend` stands in
//! for it in tests and dry runs.

use crate::error::EngineError;
use crate::sample_buffer::Sample;
use crate::sound_card::{Direction, SoundCard};

/// Receives each captured buffer as interleaved samples.
pub type CaptureCallback = Box<dyn FnMut(&[Sample]) + Send + 'static>;

/// Fills each playback buffer with interleaved stereo samples.
pub type PlaybackCallback = Box<dyn FnMut(&mut [Sample]) + Send + 'static>;

/// Receives asynchronous stream failures from the platform.
pub type StreamErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// Shape of a stream to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub channels: u16,
    pub sample_rate: u32,
    pub buffer_frames: u32,
}

/// A running stream. Closing stops the callbacks before returning.
pub trait ActiveStream: Send {
    fn close(self: Box<Self>);
}

pub trait AudioBackend: Send + Sync {
    /// Enumerate devices usable in `direction`. Called fresh for every decision.
    fn sound_cards(&self, direction: Direction) -> Result<Vec<SoundCard>, EngineError>;

    fn open_capture(
        &self,
        card: &SoundCard,
        spec: StreamSpec,
        on_data: CaptureCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn ActiveStream>, EngineError>;

    fn open_playback(
        &self,
        card: &SoundCard,
        spec: StreamSpec,
        on_data: PlaybackCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn ActiveStream>, EngineError>;
}

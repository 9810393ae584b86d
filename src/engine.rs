//! AudioEngine: relays one input device to one output device.
//!
//! Three contexts touch the engine: the control side (these methods), the
//! capture callback and the playback callback, the last two clocked by the
//! hardware. They share only:
//!
//! - the `EngineState` tag, an atomic updated by compare-and-swap;
//! - an SPSC ring of captured frames (capture → playback);
//! - an SPSC ring of tone buffers (control → playback);
//! - the level monitors.
//!
//! The relay buffer and the playlist are owned by the playback callback.

use crate::backend::{ActiveStream, AudioBackend, StreamErrorCallback, StreamSpec};
use crate::error::EngineError;
use crate::level_monitor::{LevelMonitor, StereoLevel};
use crate::observers::{SubscriptionId, Subscribers};
use crate::playlist::Playlist;
use crate::sample_buffer::{
    DEFAULT_RELAY_PRELOAD, RelayBuffer, Sample, SampleBuffer, StereoBlock, ToneBuffer,
};
use crate::sound_card::{Direction, SoundCard};
use rtrb::{Consumer, Producer, RingBuffer};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type Frame = [Sample; 2];
type Tone = Box<dyn SampleBuffer>;

const SETTLE_POLL: Duration = Duration::from_millis(2);

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per hardware buffer period requested from the platform.
    pub buffer_frames: u32,
    /// Silent frames a fresh relay buffer starts with.
    pub relay_preload: usize,
    /// Capacity of the capture → playback frame ring.
    pub relay_capacity: usize,
    /// Tones that may wait for the playback callback at once.
    pub tone_capacity: usize,
    /// Longest `stop()` waits for a pending fade edge to resolve.
    pub flush_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44100,
            buffer_frames: 1024,
            relay_preload: DEFAULT_RELAY_PRELOAD,
            relay_capacity: 44100 * 2,
            tone_capacity: 32,
            flush_timeout: Duration::from_millis(500),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    Stopped = 0,
    Started = 1,
    FadeIn = 2,
    Relaying = 3,
    FadeOut = 4,
    Error = 5,
}

impl EngineState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => EngineState::Stopped,
            1 => EngineState::Started,
            2 => EngineState::FadeIn,
            3 => EngineState::Relaying,
            4 => EngineState::FadeOut,
            _ => EngineState::Error,
        }
    }

    /// Whether captured audio flows through the relay in this state.
    pub fn carries_relay(self) -> bool {
        matches!(
            self,
            EngineState::FadeIn | EngineState::Relaying | EngineState::FadeOut
        )
    }

    /// Edge taken by the playback callback once it has mixed a relay read.
    pub fn after_relay_read(self) -> Option<EngineState> {
        match self {
            EngineState::FadeIn => Some(EngineState::Relaying),
            EngineState::FadeOut => Some(EngineState::Started),
            _ => None,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Stopped => "stopped",
            EngineState::Started => "started",
            EngineState::FadeIn => "fade-in",
            EngineState::Relaying => "relaying",
            EngineState::FadeOut => "fade-out",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Atomic state tag plus the observers of its edges.
struct StateCell {
    tag: AtomicU8,
    observers: Subscribers<EngineState>,
}

impl StateCell {
    fn new() -> Self {
        StateCell {
            tag: AtomicU8::new(EngineState::Stopped as u8),
            observers: Subscribers::new(),
        }
    }

    fn get(&self) -> EngineState {
        EngineState::from_tag(self.tag.load(Ordering::Acquire))
    }

    /// Move `from` → `to` only if the state is still `from`.
    fn transition(&self, from: EngineState, to: EngineState) -> bool {
        let moved = self
            .tag
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(%from, %to, "engine state");
            self.observers.notify(to);
        }
        moved
    }

    fn set(&self, to: EngineState) {
        let from = EngineState::from_tag(self.tag.swap(to as u8, Ordering::AcqRel));
        if from != to {
            debug!(%from, %to, "engine state");
            self.observers.notify(to);
        }
    }
}

// ── Callback sides ───────────────────────────────────────────────────────────

/// State owned by the capture callback.
struct CaptureSide {
    channels: usize,
    state: Arc<StateCell>,
    relay_tx: Producer<Frame>,
    levels: LevelMonitor,
}

impl CaptureSide {
    fn process(&mut self, data: &[Sample]) {
        let block = StereoBlock::from_interleaved(data, self.channels);

        if self.state.get().carries_relay() {
            let mut dropped = 0usize;
            for (&left, &right) in block.left.iter().zip(&block.right) {
                if self.relay_tx.push([left, right]).is_err() {
                    dropped += 1;
                }
            }
            if dropped > 0 {
                warn!(dropped, "relay queue full; captured frames dropped");
            }
        }

        self.levels.measure(&block);
    }
}

/// State owned by the playback callback.
struct PlaybackSide {
    state: Arc<StateCell>,
    relay_rx: Consumer<Frame>,
    relay: Option<RelayBuffer>,
    relay_preload: usize,
    tones_rx: Consumer<Tone>,
    playlist: Playlist,
    levels: LevelMonitor,
}

impl PlaybackSide {
    fn process(&mut self, out: &mut [Sample]) {
        let frames = out.len() / 2;

        while let Ok(tone) = self.tones_rx.pop() {
            self.playlist.push(tone);
        }

        let mut block = StereoBlock::silent(frames);

        let state = self.state.get();
        if state.carries_relay() {
            block.mix(&self.read_relay(frames));
            if let Some(next) = state.after_relay_read() {
                if self.state.transition(state, next) && next == EngineState::Started {
                    self.discard_relay();
                }
            }
        } else {
            self.discard_relay();
        }

        if self.state.get() == EngineState::Started && !self.playlist.is_empty() {
            block.mix(&self.playlist.fill(frames));
        }

        self.levels.measure(&block);
        block.write_interleaved(out);
    }

    fn read_relay(&mut self, frames: usize) -> StereoBlock {
        if self.relay.is_none() {
            debug!(preload = self.relay_preload, "relay buffer created");
            self.relay = Some(RelayBuffer::new(self.relay_preload));
        }
        let Some(relay) = self.relay.as_mut() else {
            return StereoBlock::silent(frames);
        };
        while let Ok([left, right]) = self.relay_rx.pop() {
            relay.push_frame(left, right);
        }
        relay.read(frames)
    }

    /// Drop the relay buffer along with anything captured but not yet relayed.
    fn discard_relay(&mut self) {
        let stale = self.drain_queue();
        if self.relay.take().is_some() {
            debug!(stale, "relay buffer discarded");
        }
    }

    fn drain_queue(&mut self) -> usize {
        let mut count = 0;
        while self.relay_rx.pop().is_ok() {
            count += 1;
        }
        count
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

struct OpenStreams {
    capture: Box<dyn ActiveStream>,
    playback: Box<dyn ActiveStream>,
    tones_tx: Producer<Tone>,
}

impl OpenStreams {
    fn close(self) {
        self.capture.close();
        self.playback.close();
    }
}

#[derive(Default)]
struct Control {
    input: Option<SoundCard>,
    output: Option<SoundCard>,
    streams: Option<OpenStreams>,
}

pub struct AudioEngine {
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    state: Arc<StateCell>,
    input_levels: LevelMonitor,
    output_levels: LevelMonitor,
    control: Mutex<Control>,
}

impl AudioEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Self {
        AudioEngine {
            backend,
            config,
            state: Arc::new(StateCell::new()),
            input_levels: LevelMonitor::new(),
            output_levels: LevelMonitor::new(),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh enumeration from the platform layer.
    pub fn sound_cards(&self, direction: Direction) -> Result<Vec<SoundCard>, EngineError> {
        self.backend.sound_cards(direction)
    }

    pub fn device(&self, direction: Direction) -> Option<SoundCard> {
        let control = self.lock_control();
        match direction {
            Direction::Input => control.input.clone(),
            Direction::Output => control.output.clone(),
        }
    }

    pub fn set_input_device(&self, card: SoundCard) {
        self.set_device(Direction::Input, card);
    }

    pub fn set_output_device(&self, card: SoundCard) {
        self.set_device(Direction::Output, card);
    }

    /// Reassign a device. A different device (any field) restarts the
    /// streams; if the relay was on air it is faded back in afterwards.
    fn set_device(&self, direction: Direction, card: SoundCard) {
        let mut control = self.lock_control();
        let current = match direction {
            Direction::Input => &control.input,
            Direction::Output => &control.output,
        };
        if current.as_ref() == Some(&card) {
            debug!(%direction, device = %card, "device unchanged");
            return;
        }

        info!(%direction, device = %card, "selecting device");
        let previous = self.state.get();
        if previous != EngineState::Stopped {
            self.stop_locked(&mut control);
        }
        match direction {
            Direction::Input => control.input = Some(card),
            Direction::Output => control.output = Some(card),
        }
        self.start_locked(&mut control);

        if matches!(previous, EngineState::FadeIn | EngineState::Relaying) {
            self.fade_in();
        }
    }

    /// Open both streams. Valid from Stopped (or Error, as an operator retry)
    /// with both devices set.
    pub fn start(&self) {
        let mut control = self.lock_control();
        self.start_locked(&mut control);
    }

    fn start_locked(&self, control: &mut Control) {
        let state = self.state.get();
        if !matches!(state, EngineState::Stopped | EngineState::Error) {
            warn!(%state, "start ignored: engine is already running");
            return;
        }
        let (Some(input), Some(output)) = (control.input.clone(), control.output.clone()) else {
            warn!("start ignored: input and output devices must both be set");
            return;
        };
        if let Some(stale) = control.streams.take() {
            stale.close();
        }

        match self.open_streams(&input, &output) {
            Ok(streams) => {
                control.streams = Some(streams);
                self.state.set(EngineState::Started);
                info!(input = %input, output = %output, "audio streams started");
            }
            Err(e) => {
                error!(error = %e, "failed to open audio streams");
                self.state.set(EngineState::Error);
            }
        }
    }

    fn open_streams(&self, input: &SoundCard, output: &SoundCard) -> Result<OpenStreams, EngineError> {
        let (relay_tx, relay_rx) = RingBuffer::<Frame>::new(self.config.relay_capacity.max(1));
        let (tones_tx, tones_rx) = RingBuffer::<Tone>::new(self.config.tone_capacity.max(1));
        let capture_channels = input.channel_count.clamp(1, 2);

        let mut capture = CaptureSide {
            channels: capture_channels as usize,
            state: self.state.clone(),
            relay_tx,
            levels: self.input_levels.clone(),
        };
        let mut playback = PlaybackSide {
            state: self.state.clone(),
            relay_rx,
            relay: None,
            relay_preload: self.config.relay_preload,
            tones_rx,
            playlist: Playlist::new(),
            levels: self.output_levels.clone(),
        };

        let playback_stream = self.backend.open_playback(
            output,
            self.stream_spec(2),
            Box::new(move |out| playback.process(out)),
            self.stream_error_callback(Direction::Output),
        )?;
        let capture_stream = match self.backend.open_capture(
            input,
            self.stream_spec(capture_channels),
            Box::new(move |data| capture.process(data)),
            self.stream_error_callback(Direction::Input),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                playback_stream.close();
                return Err(e);
            }
        };

        Ok(OpenStreams {
            capture: capture_stream,
            playback: playback_stream,
            tones_tx,
        })
    }

    fn stream_spec(&self, channels: u16) -> StreamSpec {
        StreamSpec {
            channels,
            sample_rate: self.config.sample_rate,
            buffer_frames: self.config.buffer_frames,
        }
    }

    fn stream_error_callback(&self, direction: Direction) -> StreamErrorCallback {
        let state = self.state.clone();
        Box::new(move |message| {
            error!(%direction, %message, "audio stream failed");
            state.set(EngineState::Error);
        })
    }

    /// Close both streams from any state. A live relay is faded out and
    /// flushed first, so nothing is relayed once this returns.
    pub fn stop(&self) {
        let mut control = self.lock_control();
        self.stop_locked(&mut control);
    }

    fn stop_locked(&self, control: &mut Control) {
        if self.state.get() == EngineState::FadeIn {
            self.settle();
        }
        if self.state.get() == EngineState::Relaying {
            self.fade_out();
        }
        if self.state.get() == EngineState::FadeOut {
            self.settle();
        }

        match control.streams.take() {
            Some(streams) => {
                streams.close();
                info!("audio streams stopped");
            }
            None => debug!("stop: no streams were open"),
        }
        self.input_levels.reset();
        self.output_levels.reset();
        self.state.set(EngineState::Stopped);
    }

    /// Wait (bounded by `flush_timeout`) for a pending FadeIn/FadeOut edge to
    /// be taken by the playback callback. Returns the state reached.
    pub fn settle(&self) -> EngineState {
        let deadline = Instant::now() + self.config.flush_timeout;
        loop {
            let state = self.state.get();
            if !matches!(state, EngineState::FadeIn | EngineState::FadeOut) {
                return state;
            }
            if Instant::now() >= deadline {
                warn!(%state, "playback did not resolve fade in time");
                return state;
            }
            std::thread::sleep(SETTLE_POLL);
        }
    }

    /// Started → FadeIn. The playback callback completes the edge to Relaying.
    pub fn fade_in(&self) {
        let state = self.state.get();
        if state != EngineState::Started || !self.state.transition(state, EngineState::FadeIn) {
            warn!(%state, "fade_in ignored: engine is not started");
            return;
        }
        info!("fading in relay");
    }

    /// Relaying → FadeOut. The playback callback completes the edge to Started.
    pub fn fade_out(&self) {
        let state = self.state.get();
        if state != EngineState::Relaying || !self.state.transition(state, EngineState::FadeOut) {
            warn!(%state, "fade_out ignored: engine is not relaying");
            return;
        }
        info!("fading out relay");
    }

    /// Queue a tone for playback after the current playlist.
    pub fn play_tone(&self, frequency: f64, duration: Duration, level_dbfs: f64) {
        let tone = ToneBuffer::new(self.config.sample_rate, frequency, duration, level_dbfs);
        let mut control = self.lock_control();
        let Some(streams) = control.streams.as_mut() else {
            warn!(frequency, "play_tone ignored: no output stream is open");
            return;
        };
        if streams.tones_tx.push(Box::new(tone)).is_err() {
            warn!(frequency, "tone queue full; tone dropped");
        }
    }

    // ── Observers ────────────────────────────────────────────────────────────

    fn levels_for(&self, direction: Direction) -> &LevelMonitor {
        match direction {
            Direction::Input => &self.input_levels,
            Direction::Output => &self.output_levels,
        }
    }

    /// Latest reading for `direction`.
    pub fn levels(&self, direction: Direction) -> StereoLevel {
        self.levels_for(direction).level()
    }

    pub fn register_levels_callback<F>(&self, direction: Direction, callback: F) -> SubscriptionId
    where
        F: Fn(StereoLevel) + Send + Sync + 'static,
    {
        self.levels_for(direction).subscribe(callback)
    }

    /// Unknown ids are ignored.
    pub fn deregister_levels_callback(&self, direction: Direction, id: SubscriptionId) {
        self.levels_for(direction).unsubscribe(id);
    }

    /// Observe every engine state edge. Observers run on whichever context
    /// took the edge (control or playback) and must not call back into the engine.
    pub fn register_state_callback<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(EngineState) + Send + Sync + 'static,
    {
        self.state.observers.subscribe(callback)
    }

    pub fn deregister_state_callback(&self, id: SubscriptionId) {
        self.state.observers.unsubscribe(id);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(streams) = control.streams.take() {
            streams.close();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

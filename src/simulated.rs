//! Hardware-free platform layer.
//!
//! In manual mode nothing runs by itself: the caller pushes captured buffers
//! with `capture` and pulls rendered output with `render`, which makes every
//! callback deterministic. In clocked mode each open stream gets a pump thread
//! that invokes its callback once per buffer period, feeding the capture side
//! a steady sine so meters and relay have something to carry.

use crate::backend::{
    ActiveStream, AudioBackend, CaptureCallback, PlaybackCallback, StreamErrorCallback,
    StreamSpec,
};
use crate::error::EngineError;
use crate::sample_buffer::Sample;
use crate::sound_card::{DeviceId, Direction, HostApi, SoundCard};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

const SIGNAL_FREQUENCY: f64 = 440.0;
const SIGNAL_AMPLITUDE: f64 = 8000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Manual,
    Clocked,
}

type Slot<T> = Arc<Mutex<Option<T>>>;

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimulatedBackend {
    inputs: Mutex<Vec<SoundCard>>,
    outputs: Mutex<Vec<SoundCard>>,
    mode: Mode,
    capture: Slot<CaptureCallback>,
    playback: Slot<PlaybackCallback>,
    stream_errors: Slot<StreamErrorCallback>,
    fail_next_open: AtomicBool,
    opens: AtomicUsize,
}

impl SimulatedBackend {
    /// Callbacks run only when the caller drives them.
    pub fn manual() -> Self {
        Self::with_mode(Mode::Manual)
    }

    /// Callbacks run on pump threads at the stream's buffer period.
    pub fn clocked() -> Self {
        Self::with_mode(Mode::Clocked)
    }

    fn with_mode(mode: Mode) -> Self {
        SimulatedBackend {
            inputs: Mutex::new(default_cards(Direction::Input)),
            outputs: Mutex::new(default_cards(Direction::Output)),
            mode,
            capture: Arc::new(Mutex::new(None)),
            playback: Arc::new(Mutex::new(None)),
            stream_errors: Arc::new(Mutex::new(None)),
            fail_next_open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
        }
    }

    /// Replace the device list reported for `direction` (hot-plug).
    pub fn set_cards(&self, direction: Direction, cards: Vec<SoundCard>) {
        match direction {
            Direction::Input => *lock(&self.inputs) = cards,
            Direction::Output => *lock(&self.outputs) = cards,
        }
    }

    /// Make the next stream open fail.
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    /// Number of streams opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_open(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => lock(&self.capture).is_some(),
            Direction::Output => lock(&self.playback).is_some(),
        }
    }

    /// Deliver one captured buffer. Returns false when no capture stream is open.
    pub fn capture(&self, data: &[Sample]) -> bool {
        match lock(&self.capture).as_mut() {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }

    /// Run the playback callback for `frames` frames and return what it wrote.
    pub fn render(&self, frames: usize) -> Option<Vec<Sample>> {
        let mut slot = lock(&self.playback);
        let callback = slot.as_mut()?;
        let mut out = vec![0; frames * 2];
        callback(&mut out);
        Some(out)
    }

    /// Report an asynchronous failure on the playback stream.
    pub fn raise_stream_error(&self, message: &str) -> bool {
        match lock(&self.stream_errors).as_mut() {
            Some(callback) => {
                callback(message.to_string());
                true
            }
            None => false,
        }
    }

    fn check_open(&self, direction: Direction, card: &SoundCard) -> Result<(), EngineError> {
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(EngineError::StreamOpen {
                direction,
                device: card.serialise(),
                reason: "simulated open failure".into(),
            });
        }
        let cards = match direction {
            Direction::Input => lock(&self.inputs).clone(),
            Direction::Output => lock(&self.outputs).clone(),
        };
        if !cards.contains(card) {
            return Err(EngineError::DeviceNotFound {
                direction,
                device: card.serialise(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::manual()
    }
}

/// Devices every simulated backend starts with.
pub fn default_cards(direction: Direction) -> Vec<SoundCard> {
    let card = |id, name: &str, channel_count| SoundCard {
        id: DeviceId(id),
        name: name.to_string(),
        channel_count,
        host_api: HostApi::Simulated,
    };
    match direction {
        Direction::Input => vec![card(0, "Line In", 2), card(1, "Mono Mic", 1)],
        Direction::Output => vec![card(0, "Line Out", 2)],
    }
}

fn buffer_period(spec: StreamSpec) -> Duration {
    Duration::from_secs_f64(spec.buffer_frames as f64 / spec.sample_rate.max(1) as f64)
}

struct Pump {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Pump {
    fn spawn<F>(name: &str, period: Duration, mut tick: F) -> Option<Pump>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    tick();
                    std::thread::sleep(period);
                }
            })
            .ok()?;
        Some(Pump { running, thread })
    }

    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.thread.join();
    }
}

struct SimulatedStream {
    direction: Direction,
    pump: Option<Pump>,
    release: Box<dyn FnOnce() + Send>,
}

impl ActiveStream for SimulatedStream {
    fn close(self: Box<Self>) {
        let SimulatedStream {
            direction,
            pump,
            release,
        } = *self;
        if let Some(pump) = pump {
            pump.stop();
        }
        release();
        debug!(%direction, "simulated stream closed");
    }
}

impl AudioBackend for SimulatedBackend {
    fn sound_cards(&self, direction: Direction) -> Result<Vec<SoundCard>, EngineError> {
        Ok(match direction {
            Direction::Input => lock(&self.inputs).clone(),
            Direction::Output => lock(&self.outputs).clone(),
        })
    }

    fn open_capture(
        &self,
        card: &SoundCard,
        spec: StreamSpec,
        on_data: CaptureCallback,
        _on_error: StreamErrorCallback,
    ) -> Result<Box<dyn ActiveStream>, EngineError> {
        self.check_open(Direction::Input, card)?;
        *lock(&self.capture) = Some(on_data);

        let pump = match self.mode {
            Mode::Manual => None,
            Mode::Clocked => {
                let slot = self.capture.clone();
                let channels = spec.channels.max(1) as usize;
                let frames = spec.buffer_frames as usize;
                let step = 2.0 * PI * SIGNAL_FREQUENCY / spec.sample_rate.max(1) as f64;
                let mut phase = 0.0f64;
                let mut data = vec![0; frames * channels];
                Pump::spawn("sim-capture", buffer_period(spec), move || {
                    for frame in data.chunks_exact_mut(channels) {
                        let value = (SIGNAL_AMPLITUDE * phase.sin()) as Sample;
                        frame.fill(value);
                        phase = (phase + step) % (2.0 * PI);
                    }
                    if let Some(callback) = lock(&slot).as_mut() {
                        callback(&data);
                    }
                })
            }
        };

        let slot = self.capture.clone();
        Ok(Box::new(SimulatedStream {
            direction: Direction::Input,
            pump,
            release: Box::new(move || {
                lock(&slot).take();
            }),
        }))
    }

    fn open_playback(
        &self,
        card: &SoundCard,
        spec: StreamSpec,
        on_data: PlaybackCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn ActiveStream>, EngineError> {
        self.check_open(Direction::Output, card)?;
        *lock(&self.playback) = Some(on_data);
        *lock(&self.stream_errors) = Some(on_error);

        let pump = match self.mode {
            Mode::Manual => None,
            Mode::Clocked => {
                let slot = self.playback.clone();
                let mut out = vec![0; spec.buffer_frames as usize * 2];
                Pump::spawn("sim-playback", buffer_period(spec), move || {
                    if let Some(callback) = lock(&slot).as_mut() {
                        out.fill(0);
                        callback(&mut out);
                    }
                })
            }
        };

        let slot = self.playback.clone();
        let errors = self.stream_errors.clone();
        Ok(Box::new(SimulatedStream {
            direction: Direction::Output,
            pump,
            release: Box::new(move || {
                lock(&slot).take();
                lock(&errors).take();
            }),
        }))
    }
}

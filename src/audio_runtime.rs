//! AudioRuntime: cpal-backed platform layer.
//!
//! cpal streams are not `Send`, so each stream is built and owned by its own
//! dedicated thread. The caller keeps a `StreamThread` handle (which is
//! `Send`) and closes the stream by sending `StreamCmd::Close`; the thread
//! drops the stream and exits, and `close` joins it so no callback runs after
//! it returns. Devices are re-resolved by (host, index, name) on every open.

use crate::backend::{
    ActiveStream, AudioBackend, CaptureCallback, PlaybackCallback, StreamErrorCallback,
    StreamSpec,
};
use crate::error::EngineError;
use crate::sample_buffer::Sample;
use crate::sound_card::{DeviceId, Direction, HostApi, SoundCard};
use rodio::cpal;
use rodio::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

// ── Commands ─────────────────────────────────────────────────────────────────

/// Commands sent to a stream thread.
enum StreamCmd {
    Close,
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Owner-side handle for a stream living on its own thread.
struct StreamThread {
    label: String,
    tx: mpsc::Sender<StreamCmd>,
    thread: JoinHandle<()>,
}

impl ActiveStream for StreamThread {
    fn close(self: Box<Self>) {
        let StreamThread { label, tx, thread } = *self;
        let _ = tx.send(StreamCmd::Close);
        if thread.join().is_err() {
            warn!(stream = %label, "stream thread panicked");
        }
        debug!(stream = %label, "stream closed");
    }
}

/// Spawn a thread that builds a stream with `build`, starts it, and keeps it
/// alive until told to close. Build and start errors are returned to the caller.
fn spawn_stream_thread<B>(
    label: String,
    direction: Direction,
    device: String,
    build: B,
) -> Result<StreamThread, EngineError>
where
    B: FnOnce() -> Result<cpal::Stream, EngineError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<StreamCmd>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), EngineError>>();

    let thread = std::thread::Builder::new()
        .name(label.clone())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(EngineError::StreamOpen {
                    direction,
                    device,
                    reason: e.to_string(),
                }));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            // Blocks until Close arrives or the handle is dropped.
            match rx.recv() {
                Ok(StreamCmd::Close) | Err(_) => drop(stream),
            }
        })
        .map_err(|e| EngineError::StreamOpen {
            direction,
            device: label.clone(),
            reason: format!("could not spawn stream thread: {}", e),
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamThread { label, tx, thread }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(EngineError::StreamOpen {
                direction,
                device: label,
                reason: "stream thread exited before reporting".into(),
            })
        }
    }
}

// ── Backend ──────────────────────────────────────────────────────────────────

/// Real hardware via cpal (re-exported by rodio).
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        CpalBackend
    }
}

fn hosts() -> Vec<(HostApi, cpal::Host)> {
    cpal::available_hosts()
        .into_iter()
        .filter_map(|id| match cpal::host_from_id(id) {
            Ok(host) => Some((HostApi::from_host_name(id.name()), host)),
            Err(e) => {
                warn!(host = id.name(), error = %e, "audio host unavailable");
                None
            }
        })
        .collect()
}

fn channels_for(device: &cpal::Device, direction: Direction) -> Option<u16> {
    let config = match direction {
        Direction::Input => device.default_input_config().ok()?,
        Direction::Output => device.default_output_config().ok()?,
    };
    Some(config.channels()).filter(|&c| c > 0)
}

/// Find the device a persisted card refers to, checking index and name.
fn find_device(card: &SoundCard, direction: Direction) -> Result<cpal::Device, EngineError> {
    let not_found = || EngineError::DeviceNotFound {
        direction,
        device: card.serialise(),
    };
    let host = hosts()
        .into_iter()
        .find(|(api, _)| *api == card.host_api)
        .map(|(_, host)| host)
        .ok_or(EngineError::HostUnavailable(card.host_api))?;
    let device = host
        .devices()
        .map_err(|e| EngineError::Enumerate {
            direction,
            reason: e.to_string(),
        })?
        .nth(card.id.0)
        .ok_or_else(not_found)?;
    match device.name() {
        Ok(name) if name == card.name => Ok(device),
        _ => Err(not_found()),
    }
}

/// Ask for `spec.buffer_frames` only when some supported config at this
/// channel count and rate accepts it; otherwise leave it to the host.
fn buffer_size_for(
    ranges: &[cpal::SupportedStreamConfigRange],
    spec: StreamSpec,
) -> cpal::BufferSize {
    let rate = cpal::SampleRate(spec.sample_rate);
    let fixed = ranges.iter().any(|range| {
        range.channels() == spec.channels
            && range.min_sample_rate() <= rate
            && rate <= range.max_sample_rate()
            && matches!(
                range.buffer_size(),
                cpal::SupportedBufferSize::Range { min, max }
                    if (*min..=*max).contains(&spec.buffer_frames)
            )
    });
    if fixed {
        cpal::BufferSize::Fixed(spec.buffer_frames)
    } else {
        debug!(frames = spec.buffer_frames, "fixed buffer size unsupported; using host default");
        cpal::BufferSize::Default
    }
}

fn stream_config(device: &cpal::Device, direction: Direction, spec: StreamSpec) -> cpal::StreamConfig {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect()),
    }
    .unwrap_or_default();
    cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: buffer_size_for(&ranges, spec),
    }
}

impl AudioBackend for CpalBackend {
    fn sound_cards(&self, direction: Direction) -> Result<Vec<SoundCard>, EngineError> {
        let mut cards = Vec::new();
        for (host_api, host) in hosts() {
            let devices = host.devices().map_err(|e| EngineError::Enumerate {
                direction,
                reason: e.to_string(),
            })?;
            for (index, device) in devices.enumerate() {
                let Some(channel_count) = channels_for(&device, direction) else {
                    continue;
                };
                let name = match device.name() {
                    Ok(name) => name,
                    Err(e) => {
                        debug!(index, error = %e, "skipping unnamed device");
                        continue;
                    }
                };
                cards.push(SoundCard {
                    id: DeviceId(index),
                    name,
                    channel_count,
                    host_api,
                });
            }
        }
        info!(%direction, count = cards.len(), "enumerated sound cards");
        Ok(cards)
    }

    fn open_capture(
        &self,
        card: &SoundCard,
        spec: StreamSpec,
        mut on_data: CaptureCallback,
        mut on_error: StreamErrorCallback,
    ) -> Result<Box<dyn ActiveStream>, EngineError> {
        let card = card.clone();
        let device_label = card.serialise();
        let stream = spawn_stream_thread(
            "capture-stream".into(),
            Direction::Input,
            device_label.clone(),
            move || {
                let device = find_device(&card, Direction::Input)?;
                device
                    .build_input_stream(
                        &stream_config(&device, Direction::Input, spec),
                        move |data: &[Sample], _: &cpal::InputCallbackInfo| on_data(data),
                        move |err| on_error(err.to_string()),
                        None,
                    )
                    .map_err(|e| EngineError::StreamOpen {
                        direction: Direction::Input,
                        device: device_label,
                        reason: e.to_string(),
                    })
            },
        )?;
        Ok(Box::new(stream))
    }

    fn open_playback(
        &self,
        card: &SoundCard,
        spec: StreamSpec,
        mut on_data: PlaybackCallback,
        mut on_error: StreamErrorCallback,
    ) -> Result<Box<dyn ActiveStream>, EngineError> {
        let card = card.clone();
        let device_label = card.serialise();
        let stream = spawn_stream_thread(
            "playback-stream".into(),
            Direction::Output,
            device_label.clone(),
            move || {
                let device = find_device(&card, Direction::Output)?;
                device
                    .build_output_stream(
                        &stream_config(&device, Direction::Output, spec),
                        move |data: &mut [Sample], _: &cpal::OutputCallbackInfo| on_data(data),
                        move |err| on_error(err.to_string()),
                        None,
                    )
                    .map_err(|e| EngineError::StreamOpen {
                        direction: Direction::Output,
                        device: device_label,
                        reason: e.to_string(),
                    })
            },
        )?;
        Ok(Box::new(stream))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

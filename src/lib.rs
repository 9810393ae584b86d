//! netsource: unattended on-air relay.
//!
//! Relays one input device to one output device during a weekly window,
//! chiming the time while off air. The audio engine and the schedule live
//! here; the CLI composes them.

pub mod audio_runtime;
pub mod backend;
pub mod engine;
pub mod error;
pub mod level_monitor;
pub mod observers;
pub mod player;
pub mod playlist;
pub mod recurrence;
pub mod sample_buffer;
pub mod schedule_runtime;
pub mod scheduler;
pub mod settings;
pub mod simulated;
pub mod sound_card;

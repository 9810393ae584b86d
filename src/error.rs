//! Error types for the engine and the settings store.

use crate::sound_card::{Direction, HostApi};
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the platform audio layer or the engine around it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no {direction} device matches '{device}'")]
    DeviceNotFound { direction: Direction, device: String },

    #[error("audio host {0} is unavailable")]
    HostUnavailable(HostApi),

    #[error("failed to enumerate {direction} devices: {reason}")]
    Enumerate { direction: Direction, reason: String },

    #[error("failed to open {direction} stream on '{device}': {reason}")]
    StreamOpen {
        direction: Direction,
        device: String,
        reason: String,
    },

    #[error("preview playback failed: {0}")]
    Preview(String),
}

/// Failures reading, writing or interpreting persisted settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialise settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{field} must be a weekday index 0-6 (0 = Monday), got {value}")]
    InvalidDay { field: &'static str, value: u8 },

    #[error("the on-air window starts and ends at the same instant")]
    EmptyWindow,
}

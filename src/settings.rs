use crate::engine::EngineConfig;
use crate::error::SettingsError;
use crate::recurrence::{ScheduleWindow, WeeklyInstant, weekday_from_index};
use crate::scheduler::ChimeConfig;
use crate::sound_card::{Direction, SoundCard};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// Environment variable that overrides the settings file location.
pub const SETTINGS_ENV: &str = "NETSOURCE_SETTINGS_FILE";

const SETTINGS_FILE: &str = "settings.json";

/// Persisted operator settings. Missing fields take their defaults, so older
/// files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub beep_dbfs: i32,
    pub beep_frequency: u32,
    /// Seconds.
    pub beep_long: f64,
    /// Seconds.
    pub beep_short: f64,
    /// 0 = Monday .. 6 = Sunday.
    pub day_start: u8,
    pub day_end: u8,
    pub time_start: NaiveTime,
    pub time_end: NaiveTime,
    /// `[id][host_api] name`, empty when unset.
    pub input_device: String,
    pub output_device: String,
    pub sample_rate: u32,
    pub buffer_frames: u32,
    pub relay_preload: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Settings {
            beep_dbfs: -18,
            beep_frequency: 1000,
            beep_long: 1.0,
            beep_short: 0.5,
            day_start: 6,
            day_end: 6,
            time_start: NaiveTime::from_hms_opt(19, 2, 1).unwrap_or_default(),
            time_end: NaiveTime::from_hms_opt(20, 59, 53).unwrap_or_default(),
            input_device: String::new(),
            output_device: String::new(),
            sample_rate: engine.sample_rate,
            buffer_frames: engine.buffer_frames,
            relay_preload: engine.relay_preload,
        }
    }
}

fn day(field: &'static str, value: u8) -> Result<chrono::Weekday, SettingsError> {
    weekday_from_index(value).ok_or(SettingsError::InvalidDay { field, value })
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.window().map(|_| ())
    }

    /// The on-air window these settings describe.
    pub fn window(&self) -> Result<ScheduleWindow, SettingsError> {
        let start = WeeklyInstant::new(day("day_start", self.day_start)?, self.time_start);
        let end = WeeklyInstant::new(day("day_end", self.day_end)?, self.time_end);
        if start == end {
            return Err(SettingsError::EmptyWindow);
        }
        Ok(ScheduleWindow::new(start, end))
    }

    pub fn chime_config(&self) -> ChimeConfig {
        ChimeConfig {
            frequency: self.beep_frequency as f64,
            level_dbfs: self.beep_dbfs as f64,
            long: seconds(self.beep_long),
            short: seconds(self.beep_short),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            buffer_frames: self.buffer_frames,
            relay_preload: self.relay_preload,
            ..EngineConfig::default()
        }
    }

    pub fn device(&self, direction: Direction) -> &str {
        match direction {
            Direction::Input => &self.input_device,
            Direction::Output => &self.output_device,
        }
    }

    pub fn set_device(&mut self, direction: Direction, card: &SoundCard) {
        let identity = card.serialise();
        match direction {
            Direction::Input => self.input_device = identity,
            Direction::Output => self.output_device = identity,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// JSON file holding `Settings`.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SettingsStore { path: path.into() }
    }

    /// `$NETSOURCE_SETTINGS_FILE`, else the user config dir, else the working dir.
    pub fn from_env() -> Self {
        Self::new(default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the file. A missing file yields the defaults.
    pub fn read(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no settings file; using defaults");
            return Ok(Settings::default());
        }
        let data = fs::read_to_string(&self.path).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like `read`, but any failure is logged and the defaults are used.
    pub fn load(&self) -> Settings {
        match self.read() {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "could not load settings; using defaults");
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let result = self.write(settings);
        match &result {
            Ok(()) => info!(path = %self.path.display(), "settings saved"),
            Err(e) => error!(error = %e, "could not save settings"),
        }
        result
    }

    fn write(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        let json = serde_json::to_string_pretty(settings)?;
        let io_error = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(&self.path, json).map_err(io_error)
    }
}

pub fn default_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("netsource").join(SETTINGS_FILE),
        None => PathBuf::from(SETTINGS_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound_card::{DeviceId, HostApi};
    use chrono::Weekday;
    use tempfile::TempDir;

    fn store() -> (TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));
        (dir, store)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let (_dir, store) = store();
        let settings = store.load();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.day_start, 6);
        assert_eq!(settings.time_start, NaiveTime::from_hms_opt(19, 2, 1).unwrap());
    }

    #[test]
    fn save_then_load() {
        let (_dir, store) = store();
        let mut settings = Settings::default();
        settings.beep_frequency = 880;
        settings.input_device = "[1][ALSA] USB Audio CODEC".into();
        store.save(&settings).unwrap();
        assert_eq!(store.load(), settings);
    }

    #[test]
    fn times_are_written_as_hh_mm_ss() {
        let (_dir, store) = store();
        store.save(&Settings::default()).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"time_start\": \"19:02:01\""));
        assert!(raw.contains("\"time_end\": \"20:59:53\""));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let (dir, _) = store();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"beep_dbfs": -6, "day_end": 0, "time_end": "01:00:00"}"#).unwrap();
        let settings = SettingsStore::new(&path).load();
        assert_eq!(settings.beep_dbfs, -6);
        assert_eq!(settings.day_end, 0);
        assert_eq!(settings.beep_long, 1.0);
        assert_eq!(settings.output_device, "");
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let (dir, _) = store();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::new(&path);
        assert!(matches!(store.read(), Err(SettingsError::Parse { .. })));
        assert_eq!(store.load(), Settings::default());
    }

    #[test]
    fn invalid_day_is_rejected() {
        let (_dir, store) = store();
        let settings = Settings {
            day_end: 7,
            ..Settings::default()
        };
        assert!(matches!(
            store.save(&settings),
            Err(SettingsError::InvalidDay { field: "day_end", value: 7 })
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn empty_window_is_rejected() {
        let settings = Settings {
            time_end: NaiveTime::from_hms_opt(19, 2, 1).unwrap(),
            ..Settings::default()
        };
        assert!(matches!(settings.window(), Err(SettingsError::EmptyWindow)));
    }

    #[test]
    fn window_and_chimes_from_settings() {
        let settings = Settings {
            day_start: 6,
            day_end: 0,
            beep_short: 0.25,
            ..Settings::default()
        };
        let window = settings.window().unwrap();
        assert_eq!(window.start.day, Weekday::Sun);
        assert_eq!(window.end.day, Weekday::Mon);

        let chimes = settings.chime_config();
        assert_eq!(chimes.frequency, 1000.0);
        assert_eq!(chimes.level_dbfs, -18.0);
        assert_eq!(chimes.short, Duration::from_millis(250));
        assert_eq!(chimes.long, Duration::from_secs(1));
    }

    #[test]
    fn negative_duration_clamps_to_zero() {
        let settings = Settings {
            beep_long: -1.0,
            ..Settings::default()
        };
        assert_eq!(settings.chime_config().long, Duration::ZERO);
    }

    #[test]
    fn device_identity_is_serialised_card() {
        let mut settings = Settings::default();
        let card = SoundCard {
            id: DeviceId(2),
            name: "Line Out".into(),
            channel_count: 2,
            host_api: HostApi::PulseAudio,
        };
        settings.set_device(Direction::Output, &card);
        assert_eq!(settings.device(Direction::Output), card.serialise());
        assert_eq!(settings.device(Direction::Input), "");
    }
}

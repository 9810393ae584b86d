//! Headless integration tests for netsource.
//!
//! These drive the engine and the schedule end-to-end against the simulated
//! platform layer, so they need no sound hardware.

use chrono::{NaiveDate, NaiveDateTime};
use netsource::engine::{AudioEngine, EngineConfig, EngineState};
use netsource::recurrence::WindowPhase;
use netsource::scheduler::{JobAction, ScheduleController, ScheduleStatus};
use netsource::settings::{Settings, SettingsStore};
use netsource::simulated::{SimulatedBackend, default_cards};
use netsource::sound_card::{Direction, resolve};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// 2024-01-07 is a Sunday, 2024-01-08 a Monday.
fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn config() -> EngineConfig {
    EngineConfig {
        sample_rate: 8000,
        buffer_frames: 80,
        relay_preload: 0,
        flush_timeout: Duration::from_millis(250),
        ..EngineConfig::default()
    }
}

fn settings_with_devices() -> Settings {
    let mut settings = Settings::default();
    settings.set_device(Direction::Input, &default_cards(Direction::Input)[0]);
    settings.set_device(Direction::Output, &default_cards(Direction::Output)[0]);
    settings
}

/// Resolve the persisted devices and hand them to the engine, as `run` does.
fn apply_devices(engine: &AudioEngine, settings: &Settings) {
    for direction in [Direction::Input, Direction::Output] {
        let cards = engine.sound_cards(direction).unwrap();
        let card = resolve(&cards, settings.device(direction)).unwrap();
        match direction {
            Direction::Input => engine.set_input_device(card),
            Direction::Output => engine.set_output_device(card),
        }
    }
}

fn record_states(engine: &AudioEngine) -> Arc<Mutex<Vec<EngineState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.register_state_callback(move |s| sink.lock().unwrap().push(s));
    seen
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

// ── On-air scenarios ──────────────────────────────────────────────────────

#[test]
fn sunday_evening_goes_on_air() {
    let backend = Arc::new(SimulatedBackend::manual());
    let engine = Arc::new(AudioEngine::new(backend.clone(), config()));
    let states = record_states(&engine);
    let settings = settings_with_devices();

    apply_devices(&engine, &settings);
    let mut controller = ScheduleController::new(
        engine.clone(),
        settings.window().unwrap(),
        settings.chime_config(),
    );
    controller.start(at(7, 19, 30, 0));
    assert_eq!(controller.status(), ScheduleStatus::Started);

    backend.capture(&[1200, -1200].repeat(80));
    let out = backend.render(80).unwrap();
    assert_eq!(out, [1200, -1200].repeat(80));

    assert_eq!(
        *states.lock().unwrap(),
        vec![EngineState::Started, EngineState::FadeIn, EngineState::Relaying]
    );
}

#[test]
fn stop_while_relaying_passes_through_fade_out() {
    let backend = Arc::new(SimulatedBackend::clocked());
    let engine = Arc::new(AudioEngine::new(backend.clone(), config()));
    apply_devices(&engine, &settings_with_devices());

    engine.fade_in();
    assert!(wait_for(|| engine.state() == EngineState::Relaying));

    let states = record_states(&engine);
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(!backend.is_open(Direction::Input));
    assert!(!backend.is_open(Direction::Output));

    let states = states.lock().unwrap();
    assert_eq!(
        *states,
        vec![EngineState::FadeOut, EngineState::Started, EngineState::Stopped]
    );
}

#[test]
fn overnight_window_wraps_week() {
    let backend = Arc::new(SimulatedBackend::manual());
    let engine = Arc::new(AudioEngine::new(backend.clone(), config()));
    let mut settings = settings_with_devices();
    settings.day_start = 6;
    settings.time_start = "23:00:00".parse().unwrap();
    settings.day_end = 0;
    settings.time_end = "01:00:00".parse().unwrap();
    apply_devices(&engine, &settings);

    let window = settings.window().unwrap();
    assert!(matches!(window.evaluate(at(8, 0, 30, 0)), WindowPhase::OnAir { .. }));

    let mut controller =
        ScheduleController::new(engine.clone(), window, settings.chime_config());
    controller.start(at(8, 0, 30, 0));
    assert_eq!(engine.state(), EngineState::FadeIn);
    backend.render(80);

    controller.tick(at(8, 1, 0, 0));
    assert_eq!(engine.state(), EngineState::FadeOut);
    backend.render(80);
    assert_eq!(engine.state(), EngineState::Started);

    let start = controller
        .jobs()
        .jobs()
        .iter()
        .find(|j| j.action == JobAction::StartShow)
        .unwrap()
        .at;
    assert_eq!(start, at(14, 23, 0, 0));
}

#[test]
fn chimes_stop_ten_seconds_before_the_show() {
    let backend = Arc::new(SimulatedBackend::manual());
    let engine = Arc::new(AudioEngine::new(backend.clone(), config()));
    let settings = Settings {
        beep_short: 0.05,
        beep_long: 0.1,
        ..settings_with_devices()
    };
    apply_devices(&engine, &settings);

    let mut controller = ScheduleController::new(
        engine.clone(),
        settings.window().unwrap(),
        settings.chime_config(),
    );
    controller.start(at(14, 19, 1, 25));
    let chimes: Vec<NaiveDateTime> = controller
        .jobs()
        .jobs()
        .iter()
        .filter(|j| matches!(j.action, JobAction::Chime(_)))
        .map(|j| j.at)
        .collect();
    assert_eq!(chimes, vec![at(14, 19, 1, 30), at(14, 19, 1, 40), at(14, 19, 1, 50)]);

    // 0.05 s at 8 kHz is 400 frames.
    controller.tick(at(14, 19, 1, 30));
    let out = backend.render(400).unwrap();
    assert!(out.iter().any(|&s| s != 0));
    assert!(backend.render(80).unwrap().iter().all(|&s| s == 0));

    controller.tick(at(14, 19, 1, 40));
    assert!(backend.render(400).unwrap().iter().any(|&s| s != 0));
    controller.tick(at(14, 19, 1, 50));
    assert!(backend.render(400).unwrap().iter().any(|&s| s != 0));

    controller.tick(at(14, 19, 2, 0));
    assert!(backend.render(400).unwrap().iter().all(|&s| s == 0));

    controller.tick(at(14, 19, 2, 1));
    assert_eq!(engine.state(), EngineState::FadeIn);
}

#[test]
fn engine_failure_is_reported_as_schedule_error() {
    let backend = Arc::new(SimulatedBackend::manual());
    let engine = Arc::new(AudioEngine::new(backend.clone(), config()));
    apply_devices(&engine, &settings_with_devices());
    let mut controller = ScheduleController::new(
        engine.clone(),
        Settings::default().window().unwrap(),
        Default::default(),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    controller
        .status_board()
        .register(move |s| sink.lock().unwrap().push(s));

    controller.start(at(8, 9, 0, 0));
    backend.raise_stream_error("device unplugged");
    controller.tick(at(8, 9, 0, 1));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![ScheduleStatus::Stopped, ScheduleStatus::Started, ScheduleStatus::Error]
    );
}

// ── Devices and settings ──────────────────────────────────────────────────

#[test]
fn persisted_devices_resolve_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("settings.json"));
    store.save(&settings_with_devices()).unwrap();

    let backend = Arc::new(SimulatedBackend::manual());
    let engine = AudioEngine::new(backend.clone(), config());
    apply_devices(&engine, &store.load());
    assert_eq!(engine.state(), EngineState::Started);
    assert_eq!(
        engine.device(Direction::Input),
        Some(default_cards(Direction::Input)[0].clone())
    );
}

#[test]
fn unplugged_device_no_longer_resolves() {
    let backend = Arc::new(SimulatedBackend::manual());
    let settings = settings_with_devices();
    backend.set_cards(Direction::Input, Vec::new());

    let engine = AudioEngine::new(backend, config());
    let cards = engine.sound_cards(Direction::Input).unwrap();
    assert!(resolve(&cards, settings.device(Direction::Input)).is_none());
    engine.start();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn input_levels_reach_observers() {
    let backend = Arc::new(SimulatedBackend::clocked());
    let engine = AudioEngine::new(backend, config());
    let readings = Arc::new(Mutex::new(Vec::new()));
    let sink = readings.clone();
    engine.register_levels_callback(Direction::Input, move |level| {
        sink.lock().unwrap().push(level)
    });
    apply_devices(&engine, &settings_with_devices());

    assert!(wait_for(|| !readings.lock().unwrap().is_empty()));
    engine.stop();

    let readings = readings.lock().unwrap();
    let level = readings[0];
    // The simulated line input is a 440 Hz sine at amplitude 8000.
    assert!(level.left < -10.0 && level.left > -20.0);
    assert_eq!(level.left, level.right);
}

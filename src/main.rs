use clap::{Parser, Subcommand};
use netsource::audio_runtime::CpalBackend;
use netsource::backend::AudioBackend;
use netsource::engine::AudioEngine;
use netsource::player::preview_chime;
use netsource::recurrence::{ChimeKind, WindowPhase, day_name, parse_time, weekday_from_index};
use netsource::schedule_runtime::{local_clock, spawn_schedule_runtime};
use netsource::scheduler::ScheduleController;
use netsource::settings::{Settings, SettingsStore};
use netsource::simulated::SimulatedBackend;
use netsource::sound_card::{Direction, SoundCard, resolve};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netsource", about = "On-air relay appliance")]
struct Cli {
    /// Use simulated audio devices instead of the sound hardware
    #[arg(long, global = true)]
    simulate: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show settings and where the on-air window stands now
    Status,
    /// List input and output devices as they are persisted
    Devices,
    /// Select the input or output device
    Device {
        #[command(subcommand)]
        action: DeviceCmd,
    },
    /// Settings management
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
    /// Play a chime on the default output
    Chime {
        /// Play the on-the-minute chime instead of the short one
        #[arg(long)]
        long: bool,
    },
    /// Relay audio and follow the weekly schedule
    Run,
}

#[derive(Subcommand)]
enum DeviceCmd {
    /// Set the input device, e.g. "[1][ALSA] USB Audio CODEC"
    Input { identity: String },
    /// Set the output device
    Output { identity: String },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Show the current settings
    Show,
    /// Set the on-air window (days 0=Mon..6=Sun, times HH:MM[:SS])
    Window {
        day_start: u8,
        time_start: String,
        day_end: u8,
        time_end: String,
    },
    /// Set the chime tone
    Beep {
        /// Frequency in Hz
        frequency: u32,
        /// Level in dBFS (e.g. -18)
        #[arg(allow_hyphen_values = true)]
        dbfs: i32,
        /// Long chime duration in seconds
        long: f64,
        /// Short chime duration in seconds
        short: f64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let store = SettingsStore::from_env();
    let mut settings = store.load();
    let backend: Arc<dyn AudioBackend> = if cli.simulate {
        Arc::new(SimulatedBackend::clocked())
    } else {
        Arc::new(CpalBackend::new())
    };

    match cli.command {
        Commands::Status => {
            println!("netsource v{}", env!("CARGO_PKG_VERSION"));
            println!("Settings: {}", store.path().display());
            print_settings(&settings);
            match settings.window() {
                Ok(window) => match window.evaluate(local_clock()) {
                    WindowPhase::OnAir { until } => println!("Window: open until {}", until),
                    WindowPhase::OffAir { next_start } => {
                        println!("Window: closed, opens {}", next_start)
                    }
                },
                Err(e) => println!("Window: invalid ({})", e),
            }
        }
        Commands::Devices => {
            for direction in [Direction::Input, Direction::Output] {
                let cards = match backend.sound_cards(direction) {
                    Ok(cards) => cards,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                };
                println!("{} devices:", direction);
                if cards.is_empty() {
                    println!("  (none)");
                }
                for card in &cards {
                    let marker = if card.serialise() == settings.device(direction) {
                        "*"
                    } else {
                        " "
                    };
                    println!(" {} {}  ({} ch)", marker, card, card.channel_count);
                }
            }
        }
        Commands::Device { action } => {
            let (direction, identity) = match action {
                DeviceCmd::Input { identity } => (Direction::Input, identity),
                DeviceCmd::Output { identity } => (Direction::Output, identity),
            };
            let cards = match backend.sound_cards(direction) {
                Ok(cards) => cards,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            let Some(card) = resolve(&cards, &identity) else {
                eprintln!("Error: no {} device matches '{}'.", direction, identity);
                eprintln!("Run 'netsource devices' to list them.");
                std::process::exit(1);
            };
            settings.set_device(direction, &card);
            save_or_exit(&store, &settings);
            println!("{} device set to {}", direction, card);
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                println!("Settings: {}", store.path().display());
                print_settings(&settings);
            }
            ConfigCmd::Window {
                day_start,
                time_start,
                day_end,
                time_end,
            } => {
                let (time_start, time_end) = match (parse_time(&time_start), parse_time(&time_end)) {
                    (Ok(start), Ok(end)) => (start, end),
                    (Err(e), _) | (_, Err(e)) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                };
                settings.day_start = day_start;
                settings.time_start = time_start;
                settings.day_end = day_end;
                settings.time_end = time_end;
                save_or_exit(&store, &settings);
                match settings.window() {
                    Ok(window) => println!("Window set to {}", window),
                    Err(e) => println!("Window: invalid ({})", e),
                }
            }
            ConfigCmd::Beep {
                frequency,
                dbfs,
                long,
                short,
            } => {
                if frequency == 0 || long < 0.0 || short < 0.0 {
                    eprintln!("Error: frequency must be positive and durations non-negative.");
                    std::process::exit(1);
                }
                settings.beep_frequency = frequency;
                settings.beep_dbfs = dbfs;
                settings.beep_long = long;
                settings.beep_short = short;
                save_or_exit(&store, &settings);
                println!(
                    "Chime set to {} Hz at {} dBFS ({}s long, {}s short)",
                    frequency, dbfs, long, short
                );
            }
        },
        Commands::Chime { long } => {
            let kind = if long { ChimeKind::Long } else { ChimeKind::Short };
            if let Err(e) = preview_chime(&settings.chime_config(), kind, settings.sample_rate) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run => run(backend, &settings, cli.simulate),
    }
}

fn save_or_exit(store: &SettingsStore, settings: &Settings) {
    if let Err(e) = store.save(settings) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_settings(settings: &Settings) {
    let day = |index| weekday_from_index(index).map(day_name).unwrap_or("?");
    println!(
        "Window: {} {} -> {} {}",
        day(settings.day_start),
        settings.time_start.format("%H:%M:%S"),
        day(settings.day_end),
        settings.time_end.format("%H:%M:%S")
    );
    println!(
        "Chime: {} Hz at {} dBFS | long {}s | short {}s",
        settings.beep_frequency, settings.beep_dbfs, settings.beep_long, settings.beep_short
    );
    let or_unset = |s: &str| if s.is_empty() { "(unset)".to_string() } else { s.to_string() };
    println!("Input: {}", or_unset(&settings.input_device));
    println!("Output: {}", or_unset(&settings.output_device));
    println!(
        "Audio: {} Hz | {} frames/buffer | relay preload {}",
        settings.sample_rate, settings.buffer_frames, settings.relay_preload
    );
}

/// Re-resolve the persisted device against a fresh enumeration. With
/// simulated devices an unset choice falls back to the first card.
fn pick_device(
    backend: &dyn AudioBackend,
    settings: &Settings,
    direction: Direction,
    simulate: bool,
) -> Option<SoundCard> {
    let cards = match backend.sound_cards(direction) {
        Ok(cards) => cards,
        Err(e) => {
            warn!(%direction, error = %e, "device enumeration failed");
            return None;
        }
    };
    let identity = settings.device(direction);
    if let Some(card) = resolve(&cards, identity) {
        return Some(card);
    }
    if simulate {
        return cards.into_iter().next();
    }
    if identity.is_empty() {
        warn!(%direction, "no device configured; use 'netsource device'");
    } else {
        warn!(%direction, device = identity, "configured device not found");
    }
    None
}

fn run(backend: Arc<dyn AudioBackend>, settings: &Settings, simulate: bool) {
    let window = match settings.window() {
        Ok(window) => window,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let engine = Arc::new(AudioEngine::new(backend.clone(), settings.engine_config()));
    if let Some(card) = pick_device(backend.as_ref(), settings, Direction::Input, simulate) {
        engine.set_input_device(card);
    }
    if let Some(card) = pick_device(backend.as_ref(), settings, Direction::Output, simulate) {
        engine.set_output_device(card);
    }

    let controller = ScheduleController::new(engine.clone(), window, settings.chime_config());
    let handle = match spawn_schedule_runtime(controller, local_clock) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: could not start schedule: {}", e);
            std::process::exit(1);
        }
    };
    handle.start();
    info!(%window, "running; commands: start, stop, status, quit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "" => {}
            "start" => handle.start(),
            "stop" => handle.stop(),
            "status" => {
                let input = engine.levels(Direction::Input);
                let output = engine.levels(Direction::Output);
                println!(
                    "schedule: {} | engine: {} | in {:.1}/{:.1} dBFS | out {:.1}/{:.1} dBFS",
                    handle.status(),
                    engine.state(),
                    input.left,
                    input.right,
                    output.left,
                    output.right
                );
            }
            "quit" | "exit" => {
                handle.shutdown();
                engine.stop();
                return;
            }
            other => eprintln!("Unknown command '{}'. Expected: start, stop, status, quit", other),
        }
    }

    // No console (running as a service): keep relaying until killed.
    info!("console closed; running unattended");
    loop {
        std::thread::park();
    }
}

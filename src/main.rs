use auto_dj::channel::AudioBackend;
use auto_dj::config::StationConfig;
use auto_dj::item::ItemDescriptor;
use auto_dj::library::LibrarySelector;
use auto_dj::memory::MemoryBackend;
use auto_dj::mode::StationStatus;
use auto_dj::output::{list_output_devices, RodioBackend};
use auto_dj::script::TemplateScriptWriter;
use auto_dj::synth::BedSynthesizer;
use auto_dj::{ContentSources, Station};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Finished channels the dry-run backend keeps for inspection.
const DRY_RUN_HISTORY: usize = 16;

#[derive(Parser)]
#[command(name = "autodj", about = "Automated radio station", version)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the station until 'q' is entered
    Run {
        /// Music folder (overrides config)
        #[arg(long)]
        music: Option<PathBuf>,
        /// Background bed folder (overrides config)
        #[arg(long)]
        beds: Option<PathBuf>,
        /// Crossfade in milliseconds (overrides config)
        #[arg(short = 'x', long)]
        crossfade_ms: Option<u64>,
        /// News every N pairs (overrides config)
        #[arg(long)]
        news_frequency: Option<u32>,
        /// Output device name (see `autodj devices`)
        #[arg(long)]
        device: Option<String>,
        /// Station name used in announcements (overrides config)
        #[arg(long)]
        station_name: Option<String>,
        /// Simulate playback without an audio device
        #[arg(long)]
        dry_run: bool,
        /// Simulated length of every item in dry-run mode, in seconds
        #[arg(long, default_value = "20")]
        dry_run_secs: u64,
    },
    /// Station configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
    /// List audio output devices
    Devices,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auto_dj=info,autodj=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();
    let config_path = cli.config.unwrap_or_else(StationConfig::default_path);

    match cli.command {
        Commands::Run {
            music,
            beds,
            crossfade_ms,
            news_frequency,
            device,
            station_name,
            dry_run,
            dry_run_secs,
        } => {
            let mut config = load_config(&config_path);
            if let Some(music) = music {
                config.music_folder = music;
            }
            if let Some(beds) = beds {
                config.beds_folder = beds;
            }
            if let Some(ms) = crossfade_ms {
                config.crossfade_ms = ms;
            }
            if let Some(n) = news_frequency {
                config.news_frequency = n;
            }
            if device.is_some() {
                config.output_device = device;
            }
            if station_name.is_some() {
                config.station_name = station_name;
            }
            run_station(config, dry_run, Duration::from_secs(dry_run_secs));
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                let config = load_config(&config_path);
                println!("Config file: {}", config_path.display());
                match serde_json::to_string_pretty(&config) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            ConfigCmd::Init { force } => {
                if config_path.exists() && !force {
                    eprintln!(
                        "Error: '{}' already exists (use --force to overwrite)",
                        config_path.display()
                    );
                    std::process::exit(1);
                }
                if let Err(e) = StationConfig::default().save(&config_path) {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
                println!("Wrote default config to {}", config_path.display());
            }
        },
        Commands::Devices => {
            let devices = list_output_devices();
            if devices.is_empty() {
                println!("No output devices found.");
            }
            for (i, name) in devices.iter().enumerate() {
                println!("  {}. {}", i + 1, name);
            }
        }
    }
}

fn load_config(path: &std::path::Path) -> StationConfig {
    match StationConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_station(config: StationConfig, dry_run: bool, dry_run_length: Duration) {
    let backend: Arc<dyn AudioBackend> = if dry_run {
        info!(secs = dry_run_length.as_secs(), "dry run, simulating playback");
        Arc::new(
            MemoryBackend::new()
                .with_default_duration(dry_run_length)
                .with_history_limit(DRY_RUN_HISTORY),
        )
    } else {
        match RodioBackend::open(config.output_device.as_deref()) {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    };

    let synthesizer = match BedSynthesizer::from_config(&config) {
        Ok(synth) => synth,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let content = ContentSources {
        selector: Arc::new(LibrarySelector::new(&config.music_folder)),
        writer: Arc::new(TemplateScriptWriter::from_config(&config)),
        synthesizer: Arc::new(synthesizer),
    };

    let station = match Station::new(config, backend, content) {
        Ok(station) => station,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = station.start() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    println!("Station on air. Keys: p = pause after song, r = resume, s = status, q = quit");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "p" => {
                station.request_pause();
                println!("Mode: {}", station.mode());
            }
            "r" => {
                station.request_resume();
                println!("Mode: {}", station.mode());
            }
            "s" => print_status(&station.status()),
            "q" => break,
            "" => {}
            other => println!("Unknown command '{}'. Keys: p, r, s, q", other),
        }
    }

    station.stop();
    println!("Station off air.");
}

fn describe(item: &ItemDescriptor) -> String {
    let title = item.title.as_deref().unwrap_or(&item.path);
    match &item.artist {
        Some(artist) => format!("[{}] {} - {}", item.kind, artist, title),
        None => format!("[{}] {}", item.kind, title),
    }
}

fn print_status(status: &StationStatus) {
    let now = status
        .currently_playing
        .as_ref()
        .map(describe)
        .unwrap_or_else(|| "nothing".to_string());
    println!(
        "Mode: {} | Playing: {} ({:.0}s) | Queue: {} item(s)",
        status.mode, now, status.elapsed_secs, status.queue_depth
    );
    for (i, item) in status.upcoming.iter().enumerate() {
        println!("  {}. {}", i + 1, describe(item));
    }
}

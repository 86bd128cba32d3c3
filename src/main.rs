//! Acoustic Threat Detection CLI Application

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use threat_rs::speech::whisper::WHISPER_SAMPLE_RATE;
use threat_rs::{
    AudioCapture, ConditionedSource, Config, JsonModelLoader, MemorySource, OutputFormat, SampleSource,
    OutputWriter, Session, SpeechThreatDetector, Transcriber, WhisperTranscriber,
};

/// Acoustic Threat Detection System
#[derive(Parser)]
#[command(name = "threat-rs")]
#[command(about = "Real-time acoustic threat detection from sound events and speech", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

/// Options shared by the detection commands
#[derive(Args)]
struct DetectArgs {
    /// Path to the acoustic model (JSON)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Path to the Whisper model file
    #[arg(short, long)]
    whisper_model: Option<PathBuf>,

    /// Transcription language (en, si, auto)
    #[arg(short, long)]
    language: Option<String>,

    /// Run the non-speech path only
    #[arg(long)]
    no_speech: bool,

    /// Output file path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Only emit positive detections
    #[arg(long)]
    positive_only: bool,

    /// Disable console output
    #[arg(long)]
    no_console: bool,
}

impl DetectArgs {
    fn apply(self, config: &mut Config) {
        if let Some(model) = self.model {
            config.acoustic.model_path = model;
        }
        if let Some(model) = self.whisper_model {
            config.speech.model_path = model;
        }
        if let Some(language) = self.language {
            config.speech.language = language;
        }
        if self.no_speech {
            config.speech.enabled = false;
        }
        if let Some(output) = self.output {
            config.output.output_path = Some(output);
        }
        config.output.format = match self.format.as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        };
        if self.positive_only {
            config.fusion.emit = threat_rs::EmitMode::Positive;
        }
        config.output.enable_console = !self.no_console;
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect threats in live microphone audio
    Listen {
        /// Audio input device name (uses default if not specified)
        #[arg(short, long)]
        device: Option<String>,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// Detect threats in a WAV file
    Analyze {
        /// Input WAV file path
        input: PathBuf,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// List available audio input devices
    Devices,

    /// Create the model and log directories and write a starter config
    Init {
        /// Where to write the configuration file
        #[arg(short, long, default_value = "threat-rs.toml")]
        output: PathBuf,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Run the keyword lexicons over a piece of text
    ScanText {
        /// Text to scan
        text: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging - quiet by default, use -v for more
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    // Load configuration
    let mut config = if let Some(ref config_path) = cli.config {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Listen { device, detect } => {
            if let Some(device) = device {
                config.audio.device = Some(device);
            }
            detect.apply(&mut config);
            run_listen(config)
        }
        Commands::Analyze { input, detect } => {
            detect.apply(&mut config);
            analyze_file(config, &input)
        }
        Commands::Devices => list_devices(),
        Commands::Init { output, force } => init(config, &output, force),
        Commands::ScanText { text } => scan_text(&config, &text),
    }
}

/// Build the speech recognizer, or run without the speech path
fn load_transcriber(config: &Config) -> Option<Arc<dyn Transcriber>> {
    if !config.speech.enabled {
        info!("Speech path disabled by configuration");
        return None;
    }
    if config.audio.sample_rate != WHISPER_SAMPLE_RATE {
        warn!(
            "Speech path needs a {} Hz pipeline, configured {} Hz; running non-speech only",
            WHISPER_SAMPLE_RATE, config.audio.sample_rate
        );
        return None;
    }
    match WhisperTranscriber::new(&config.speech) {
        Ok(transcriber) => Some(Arc::new(transcriber)),
        Err(e) => {
            warn!("Speech path unavailable ({}); running non-speech only", e);
            None
        }
    }
}

fn build_session(config: Config) -> Result<Session> {
    let transcriber = load_transcriber(&config);
    Session::load(config, &JsonModelLoader, transcriber).context("Failed to initialize detection session")
}

/// Run detection over a WAV file
fn analyze_file(config: Config, input_path: &Path) -> Result<()> {
    info!("Analyzing: {}", input_path.display());

    let source = MemorySource::from_wav(input_path)
        .with_context(|| format!("Failed to read {}", input_path.display()))?;
    info!(
        "Loaded {} samples ({:.2}s)",
        source.len(),
        source.len() as f32 / source.sample_rate() as f32
    );
    let source = ConditionedSource::new(source, config.audio.sample_rate, config.audio.high_pass_cutoff)?;

    let output = OutputWriter::new(config.output.clone()).context("Failed to create output writer")?;
    let session = build_session(config)?;

    let summary = session.run(source, output)?;
    summary.log_summary();

    Ok(())
}

/// Run live detection with device reconnection
fn run_listen(config: Config) -> Result<()> {
    info!("Starting live threat detection");

    // Setup signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    // Model loading is the most likely failure, do it before touching the device
    let session = build_session(config.clone())?;

    let mut reconnect_attempts = 0;
    const MAX_RECONNECT_ATTEMPTS: u32 = 5;
    const RECONNECT_DELAY: Duration = Duration::from_secs(2);

    while running.load(Ordering::SeqCst) {
        let mut capture = match init_audio_capture(&config) {
            Ok(c) => {
                reconnect_attempts = 0;
                c
            }
            Err(e) => {
                reconnect_attempts += 1;
                if reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
                    return Err(e.context("Max reconnection attempts exceeded"));
                }
                warn!(
                    "Audio capture failed (attempt {}/{}): {}. Retrying in {:?}...",
                    reconnect_attempts, MAX_RECONNECT_ATTEMPTS, e, RECONNECT_DELAY
                );
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        };

        let source = ConditionedSource::new(
            capture.source(),
            config.audio.sample_rate,
            config.audio.high_pass_cutoff,
        )?;
        let output =
            OutputWriter::new(config.output.clone()).context("Failed to create output writer")?;

        capture.start().context("Failed to start capture")?;
        let handle = session.start(source, output)?;
        info!("Listening... Press Ctrl+C to stop");

        while running.load(Ordering::SeqCst) && !handle.is_finished() {
            std::thread::sleep(Duration::from_millis(100));
        }

        handle.stop();
        let device_failed = capture.has_failed();
        capture.stop();

        match handle.join() {
            Ok(summary) => summary.log_summary(),
            Err(e) => error!("Session ended with error: {}", e),
        }

        if device_failed && running.load(Ordering::SeqCst) {
            warn!("Device error detected, attempting reconnection...");
            std::thread::sleep(RECONNECT_DELAY);
        } else {
            break;
        }
    }

    Ok(())
}

fn init_audio_capture(config: &Config) -> Result<AudioCapture> {
    let mut capture =
        AudioCapture::new(config.audio.clone()).context("Failed to create audio capture")?;
    capture.init().context("Failed to initialize audio capture")?;
    Ok(capture)
}

/// List available audio input devices
fn list_devices() -> Result<()> {
    let capture = AudioCapture::new(threat_rs::config::AudioConfig::default())?;
    let devices = capture.list_devices()?;

    if devices.is_empty() {
        println!("No audio input devices found");
    } else {
        println!("Available audio input devices:");
        for (i, name) in devices.iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
    }

    Ok(())
}

/// Provision working directories and write a starter configuration
fn init(config: Config, output: &Path, force: bool) -> Result<()> {
    config
        .provision()
        .context("Failed to create working directories")?;

    if output.exists() && !force {
        println!("Configuration already exists: {}", output.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    let text = config.to_toml()?;
    std::fs::write(output, text)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Wrote configuration: {}", output.display());
    println!(
        "Place the acoustic model at {} and the Whisper model at {}",
        config.acoustic.model_path.display(),
        config.speech.model_path.display()
    );
    Ok(())
}

/// Print the lexicon matches for a piece of text
fn scan_text(config: &Config, text: &str) -> Result<()> {
    let detector = SpeechThreatDetector::from_config(config);
    let matches = detector.scan_text(0, text);

    if matches.is_empty() {
        println!("No threat or profanity terms found");
        return Ok(());
    }

    for m in matches {
        let terms: Vec<&str> = m.matched_terms.iter().map(String::as_str).collect();
        println!("{} [{}]: {}", m.severity, m.language, terms.join(", "));
    }
    Ok(())
}

//! Configuration structures for the threat detection pipeline
//!
//! A [`Config`] is built once (defaults, TOML file, CLI overrides), checked with
//! [`Config::validate`] and then shared immutably with a session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub features: FeatureConfig,
    pub acoustic: AcousticConfig,
    pub speech: SpeechConfig,
    pub noise: NoiseConfig,
    pub fusion: FusionConfig,
    pub lexicon: LexiconConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize to TOML (used by `init` to write a starter file)
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values a session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(ConfigError::invalid("audio.sample_rate", 0, "must be positive"));
        }
        if !(audio.chunk_duration > 0.0) {
            return Err(ConfigError::invalid(
                "audio.chunk_duration",
                audio.chunk_duration,
                "must be positive",
            ));
        }
        if !(0.0..1.0).contains(&audio.overlap_fraction) {
            return Err(ConfigError::invalid(
                "audio.overlap_fraction",
                audio.overlap_fraction,
                "must be in [0, 1)",
            ));
        }
        if audio.chunk_samples() == 0 || audio.hop_samples() == 0 {
            return Err(ConfigError::invalid(
                "audio.chunk_duration",
                audio.chunk_duration,
                "chunk or hop is shorter than one sample",
            ));
        }

        let features = &self.features;
        for (field, value) in [
            ("features.n_mfcc", features.n_mfcc),
            ("features.n_fft", features.n_fft),
            ("features.hop_length", features.hop_length),
            ("features.n_mels", features.n_mels),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, value, "must be positive"));
            }
        }
        if features.n_mfcc > features.n_mels {
            return Err(ConfigError::invalid(
                "features.n_mfcc",
                features.n_mfcc,
                "cannot exceed features.n_mels",
            ));
        }
        let nyquist = audio.sample_rate as f32 / 2.0;
        if !(features.fmax > 0.0 && features.fmax <= nyquist) {
            return Err(ConfigError::invalid(
                "features.fmax",
                features.fmax,
                "must be in (0, sample_rate / 2]",
            ));
        }

        check_unit("acoustic.non_speech_threshold", self.acoustic.non_speech_threshold)?;
        check_unit("speech.speech_threat_threshold", self.speech.speech_threat_threshold)?;
        check_unit("fusion.co_occurrence_threshold", self.fusion.co_occurrence_threshold)?;
        check_unit("noise.low_snr_weight", self.noise.low_snr_weight)?;
        if !(self.noise.smoothing > 0.0 && self.noise.smoothing <= 1.0) {
            return Err(ConfigError::invalid(
                "noise.smoothing",
                self.noise.smoothing,
                "must be in (0, 1]",
            ));
        }
        if self.noise.loud_floor_db <= self.noise.quiet_floor_db {
            return Err(ConfigError::invalid(
                "noise.loud_floor_db",
                self.noise.loud_floor_db,
                "must be above noise.quiet_floor_db",
            ));
        }
        if self.acoustic.labels.is_empty() {
            return Err(ConfigError::invalid("acoustic.labels", "[]", "must not be empty"));
        }
        if !self.acoustic.labels.iter().any(|l| l == "normal") {
            return Err(ConfigError::invalid(
                "acoustic.labels",
                self.acoustic.labels.join(","),
                "must include the neutral label \"normal\"",
            ));
        }

        let fusion = &self.fusion;
        if !(fusion.max_latency_secs > 0.0) {
            return Err(ConfigError::invalid(
                "fusion.max_latency_secs",
                fusion.max_latency_secs,
                "must be positive",
            ));
        }
        if fusion.cooldown_secs < audio.overlap_duration() {
            return Err(ConfigError::invalid(
                "fusion.cooldown_secs",
                fusion.cooldown_secs,
                "must be at least the chunk overlap duration",
            ));
        }
        if fusion.queue_depth == 0 {
            return Err(ConfigError::invalid("fusion.queue_depth", 0, "must be positive"));
        }
        if fusion.max_in_flight == 0 {
            return Err(ConfigError::invalid("fusion.max_in_flight", 0, "must be positive"));
        }
        if !(fusion.arm_after_secs >= 0.0) {
            return Err(ConfigError::invalid(
                "fusion.arm_after_secs",
                fusion.arm_after_secs,
                "must not be negative",
            ));
        }
        if fusion.arm_after_secs > audio.chunk_duration {
            return Err(ConfigError::invalid(
                "fusion.arm_after_secs",
                fusion.arm_after_secs,
                "must not exceed audio.chunk_duration",
            ));
        }
        if !(self.noise.update_interval_secs > 0.0) {
            return Err(ConfigError::invalid(
                "noise.update_interval_secs",
                self.noise.update_interval_secs,
                "must be positive",
            ));
        }

        Ok(())
    }

    /// Create the model and log directories.
    ///
    /// This is an explicit setup step; loading a config never touches the filesystem.
    pub fn provision(&self) -> std::io::Result<()> {
        for dir in [&self.paths.models_dir, &self.paths.logs_dir] {
            std::fs::create_dir_all(dir)?;
            info!("Provisioned directory: {}", dir.display());
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, value, "must be in [0, 1]"))
    }
}

/// Audio input and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Pipeline sample rate (Hz); input is resampled to it
    pub sample_rate: u32,
    /// Chunk duration (seconds)
    pub chunk_duration: f32,
    /// Fraction of a chunk shared with its predecessor, in [0, 1)
    pub overlap_fraction: f32,
    /// What to do with a short trailing chunk
    pub partial_policy: PartialPolicy,
    /// Capture channel count (downmixed to mono)
    pub channels: u16,
    /// Capture buffer size in samples
    pub buffer_size: u32,
    /// Audio device name (None = default device)
    pub device: Option<String>,
    /// High-pass cutoff applied before chunking (Hz, 0 disables)
    pub high_pass_cutoff: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_duration: 2.0,
            overlap_fraction: 0.5,
            partial_policy: PartialPolicy::ZeroPad,
            channels: 1,
            buffer_size: 512,
            device: None,
            high_pass_cutoff: 60.0,
        }
    }
}

impl AudioConfig {
    pub fn chunk_samples(&self) -> usize {
        (self.chunk_duration as f64 * self.sample_rate as f64).round() as usize
    }

    pub fn hop_samples(&self) -> usize {
        let hop = self.chunk_duration as f64 * (1.0 - self.overlap_fraction as f64);
        (hop * self.sample_rate as f64).round() as usize
    }

    /// Seconds shared by two consecutive chunks
    pub fn overlap_duration(&self) -> f32 {
        self.chunk_duration * self.overlap_fraction
    }
}

/// Handling of the trailing window when the stream ends mid-chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// Pad with zeros to full length, flagged partial
    ZeroPad,
    /// Emit the shorter buffer as-is, flagged partial
    Short,
    /// Discard the tail; a stream shorter than one chunk is an error
    Drop,
}

/// MFCC parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub n_mfcc: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// Upper edge of the mel filter bank (Hz)
    pub fmax: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_mfcc: 40,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmax: 8000.0,
        }
    }
}

/// Non-speech acoustic classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcousticConfig {
    /// Path to the pre-trained model artifact
    pub model_path: PathBuf,
    /// Label set the model must score
    pub labels: Vec<String>,
    /// Static detection threshold, also the fallback before noise warm-up
    pub non_speech_threshold: f32,
}

impl Default for AcousticConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/saved/non_speech_threat_model.json"),
            labels: ["crying", "screaming", "shouting", "glass_breaking", "normal"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            non_speech_threshold: 0.7,
        }
    }
}

/// Speech path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Run transcription + keyword matching
    pub enabled: bool,
    /// Path to the Whisper model file
    pub model_path: PathBuf,
    /// Transcription language ("en", "si" or "auto")
    pub language: String,
    /// Number of threads for inference
    pub threads: u32,
    /// Transcripts less confident than this are not matched
    pub speech_threat_threshold: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::from("./models/ggml-base.bin"),
            language: "auto".to_string(),
            threads: 4,
            speech_threat_threshold: 0.6,
        }
    }
}

/// Noise floor calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Derive the acoustic threshold from the noise floor once warmed up
    pub adaptive_threshold: bool,
    /// Ambient observations needed before the floor is trusted
    pub warmup_samples: u64,
    /// Seconds between published profile updates
    pub update_interval_secs: f32,
    /// Chunks below this SNR have their acoustic confidence down-weighted
    pub min_snr_db: f32,
    /// Exponential smoothing factor for the floor estimate
    pub smoothing: f32,
    /// Floor (dBFS) at or below which the static threshold is kept
    pub quiet_floor_db: f32,
    /// Floor (dBFS) at which the full adaptation gain applies
    pub loud_floor_db: f32,
    /// Maximum threshold increase in a loud environment
    pub adaptation_gain: f32,
    /// Confidence multiplier for low-SNR chunks
    pub low_snr_weight: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            adaptive_threshold: true,
            warmup_samples: 50,
            update_interval_secs: 10.0,
            min_snr_db: 10.0,
            smoothing: 0.1,
            quiet_floor_db: -60.0,
            loud_floor_db: -20.0,
            adaptation_gain: 0.2,
            low_snr_weight: 0.5,
        }
    }
}

/// Fusion, alerting and scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Deadline from chunk availability to decision (seconds)
    pub max_latency_secs: f32,
    /// Alert suppression window after an alert (seconds of stream time)
    pub cooldown_secs: f32,
    /// Acoustic confidence that, together with profanity, makes a threat
    pub co_occurrence_threshold: f32,
    /// Arm on the static threshold after this much stream time without warm-up
    pub arm_after_secs: f32,
    /// Which decisions reach the sink
    pub emit: EmitMode,
    /// Chunks waiting for the classifiers before the oldest is dropped
    pub queue_depth: usize,
    /// Chunks dispatched to classifiers but not yet decided
    pub max_in_flight: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_latency_secs: 3.0,
            cooldown_secs: 2.0,
            co_occurrence_threshold: 0.5,
            arm_after_secs: 2.0,
            emit: EmitMode::All,
            queue_depth: 8,
            max_in_flight: 4,
        }
    }
}

impl FusionConfig {
    pub fn max_latency(&self) -> Duration {
        Duration::from_secs_f32(self.max_latency_secs)
    }
}

/// Event emission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitMode {
    /// One event per decided chunk, including "no threat"
    All,
    /// Only positive detections
    Positive,
}

/// Bilingual keyword lists
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconConfig {
    pub english_threats: Vec<String>,
    pub sinhala_threats: Vec<String>,
    pub english_profanity: Vec<String>,
    pub sinhala_profanity: Vec<String>,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            english_threats: terms(&[
                "i'll hurt you",
                "i will hurt you",
                "kill",
                "murder",
                "die",
                "attack",
                "shoot",
                "gun",
                "weapon",
                "bomb",
                "fight",
                "beat you",
                "punch",
                "destroy",
                "help",
                "danger",
                "emergency",
                "threat",
                "violence",
                "assault",
                "harm",
            ]),
            sinhala_threats: terms(&[
                "මරනවා",
                "ගහනවා",
                "මරන්න",
                "කපනවා",
                "වෙඩි",
                "පහර",
                "බය",
                "අන්තරාය",
                "උදව්",
                "සටන",
                "පිස්තෝලය",
                "බෝම්බය",
                "මරුගුල",
            ]),
            english_profanity: terms(&["damn", "hell", "bastard", "idiot", "stupid"]),
            sinhala_profanity: terms(&["බල්ලා"]),
        }
    }
}

/// Alert output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format
    pub format: OutputFormat,
    /// Output file path (None = console only)
    pub output_path: Option<PathBuf>,
    /// Enable console output
    pub enable_console: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            output_path: None,
            enable_console: true,
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One human-readable line per event
    Text,
    /// JSON lines
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Working directories created by [`Config::provision`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models/saved"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

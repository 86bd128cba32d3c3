//! Custom error types for the threat detection pipeline

use thiserror::Error;

/// Main error type for the threat detection pipeline
#[derive(Error, Debug)]
pub enum ThreatError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Feature extraction error: {0}")]
    Features(#[from] FeatureExtractionError),

    #[error("Acoustic model error: {0}")]
    Model(#[from] ModelError),

    #[error("Speech recognition error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Audio-related errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device available")]
    NoInputDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device configuration: {0}")]
    DeviceConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Stream playback error: {0}")]
    StreamPlay(String),

    #[error("Resampling error: {0}")]
    Resampling(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("WAV error: {0}")]
    Wav(String),

    #[error("Stream ended after {available} samples, a chunk needs {needed}")]
    InsufficientSamples { needed: usize, available: usize },
}

/// Failures turning a chunk into a feature vector
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureExtractionError {
    #[error("chunk {chunk_id} has an empty sample buffer")]
    EmptyBuffer { chunk_id: u64 },

    #[error("chunk {chunk_id} has a non-finite sample at index {index}")]
    NonFinite { chunk_id: u64, index: usize },
}

/// Acoustic model errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Acoustic model unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("Acoustic model is corrupt: {0}")]
    Corrupt(String),

    #[error("Feature dimension mismatch: model expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Unknown acoustic label: {0}")]
    UnknownLabel(String),

    #[error("Scoring failed: {0}")]
    Scoring(String),
}

/// Speech recognizer errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Whisper error: {0}")]
    Whisper(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ThreatError>;

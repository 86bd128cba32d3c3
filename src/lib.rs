//! Acoustic Threat Detection
//!
//! A streaming pipeline that cuts an audio stream into overlapping chunks,
//! classifies each chunk along two paths (non-speech sound events and
//! transcribed speech) and fuses both verdicts into alert events.
//!
//! # Architecture
//!
//! The system is organized into the following modules:
//!
//! - `audio`: Sample sources, capture, conditioning, chunking and noise profiling
//! - `features`: MFCC feature extraction
//! - `classify`: Pre-trained model interface and the acoustic event classifier
//! - `speech`: Transcription and bilingual threat/profanity lexicons
//! - `fusion`: Result joining, the fusion rule and the alert state machine
//! - `pipeline`: Session threads and statistics
//! - `output`: Alert sinks and formatting
//! - `config`: Configuration structures
//! - `error`: Error types
//!
//! # Example
//!
//! ```no_run
//! use threat_rs::{Config, JsonModelLoader, MemorySource, OutputWriter, Session};
//!
//! let config = Config::default();
//! let session = Session::load(config.clone(), &JsonModelLoader, None).unwrap();
//!
//! let source = MemorySource::from_wav("recording.wav".as_ref()).unwrap();
//! let sink = OutputWriter::new(config.output.clone()).unwrap();
//! let summary = session.run(source, sink).unwrap();
//! summary.log_summary();
//! ```

pub mod audio;
pub mod classify;
pub mod config;
pub mod error;
pub mod features;
pub mod fusion;
pub mod output;
pub mod pipeline;
pub mod speech;

// Re-exports for convenience
pub use audio::{
    AudioCapture, AudioChunk, ChunkStream, Chunker, ConditionedSource, MemorySource, NoiseProfile,
    NoiseProfiler, SampleSource,
};
pub use classify::{
    AcousticClassifier, ClassificationResult, JsonModelLoader, Label, LinearModel, ModelLoader,
    ScoringFunction, Source,
};
pub use config::{Config, EmitMode, OutputFormat, PartialPolicy};
pub use error::{AudioError, ConfigError, FeatureExtractionError, ModelError, Result, ThreatError};
pub use features::FeatureExtractor;
pub use fusion::{AlertEvent, FusionEngine, FusionState};
pub use output::{AlertSink, ChannelSink, OutputWriter};
pub use pipeline::{Session, SessionHandle, SessionSummary};
pub use speech::{
    Language, Lexicon, Severity, SpeechThreatDetector, ThreatKeywordMatch, Transcriber, Transcript,
    WhisperTranscriber,
};

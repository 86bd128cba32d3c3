//! Speech-to-text collaborator interface

use crate::audio::AudioChunk;
use crate::error::Result;

/// Recognized text for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// Recognizer confidence in [0, 1], when the engine reports one
    pub confidence: Option<f32>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// Best-effort speech recognizer.
///
/// `Ok(None)` means no speech was recognized. Errors are absorbed per chunk
/// by the caller.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, chunk: &AudioChunk) -> Result<Option<Transcript>>;
}

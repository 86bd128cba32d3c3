//! Classification results and the acoustic event classifier

pub mod acoustic;
pub mod model;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

pub use acoustic::AcousticClassifier;
pub use model::{JsonModelLoader, LinearModel, ModelLoader, ScoringFunction};

/// Which classification path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    NonSpeech,
    Speech,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::NonSpeech => write!(f, "non_speech"),
            Source::Speech => write!(f, "speech"),
        }
    }
}

/// Result tag for either path.
///
/// The acoustic path yields one of the sound-event labels, the speech path one
/// of `ThreatSpeech`, `Profanity` or `Speech`. `Unknown` means the path had
/// nothing to say (failed scoring, no transcript).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Crying,
    Screaming,
    Shouting,
    GlassBreaking,
    Normal,
    ThreatSpeech,
    Profanity,
    Speech,
    Unknown,
}

impl Label {
    /// Distress sound labels; everything else is neutral for the acoustic path
    pub fn is_acoustic_event(self) -> bool {
        matches!(
            self,
            Label::Crying | Label::Screaming | Label::Shouting | Label::GlassBreaking
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Crying => "crying",
            Label::Screaming => "screaming",
            Label::Shouting => "shouting",
            Label::GlassBreaking => "glass_breaking",
            Label::Normal => "normal",
            Label::ThreatSpeech => "threat_speech",
            Label::Profanity => "profanity",
            Label::Speech => "speech",
            Label::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the acoustic model's label names
impl FromStr for Label {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "crying" => Ok(Label::Crying),
            "screaming" => Ok(Label::Screaming),
            "shouting" => Ok(Label::Shouting),
            "glass_breaking" => Ok(Label::GlassBreaking),
            "normal" => Ok(Label::Normal),
            _ => Err(ModelError::UnknownLabel(s.to_string())),
        }
    }
}

/// One path's verdict on one chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub source: Source,
    pub label: Label,
    /// Always within [0, 1]
    pub confidence: f32,
    pub chunk_id: u64,
}

impl ClassificationResult {
    pub fn new(source: Source, label: Label, confidence: f32, chunk_id: u64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            source,
            label,
            confidence,
            chunk_id,
        }
    }

    /// Neutral result for a path that failed on this chunk
    pub fn unknown(source: Source, chunk_id: u64) -> Self {
        Self::new(source, Label::Unknown, 0.0, chunk_id)
    }
}

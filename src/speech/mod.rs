//! Speech path: transcription and bilingual keyword matching

pub mod detector;
pub mod lexicon;
pub mod transcriber;
pub mod whisper;

pub use detector::{SpeechThreatDetector, SpeechVerdict};
pub use lexicon::{
    Language, Lexicon, NormalizedText, PhraseMatcher, Severity, TermMatcher, ThreatKeywordMatch,
    TokenSetMatcher,
};
pub use transcriber::{Transcriber, Transcript};
pub use whisper::WhisperTranscriber;

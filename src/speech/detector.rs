//! Transcript evaluation against the lexicons

use std::collections::BTreeSet;
use tracing::debug;

use crate::classify::{ClassificationResult, Label, Source};
use crate::config::Config;
use crate::speech::lexicon::{Lexicon, Severity, ThreatKeywordMatch};
use crate::speech::transcriber::Transcript;

/// Speech path verdict for one chunk
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechVerdict {
    pub classification: ClassificationResult,
    /// Keyword groups, threat groups first
    pub matches: Vec<ThreatKeywordMatch>,
}

impl SpeechVerdict {
    /// Verdict for a chunk the speech path could not handle
    pub fn unknown(chunk_id: u64) -> Self {
        Self {
            classification: ClassificationResult::unknown(Source::Speech, chunk_id),
            matches: Vec::new(),
        }
    }

    pub fn chunk_id(&self) -> u64 {
        self.classification.chunk_id
    }

    /// Highest severity among the matches
    pub fn severity(&self) -> Option<Severity> {
        self.matches.iter().map(|m| m.severity).max()
    }

    pub fn has_threat(&self) -> bool {
        self.severity() == Some(Severity::Threat)
    }

    pub fn has_profanity(&self) -> bool {
        self.matches.iter().any(|m| m.severity == Severity::Profanity)
    }

    /// Union of all matched terms
    pub fn matched_terms(&self) -> BTreeSet<String> {
        self.matches
            .iter()
            .flat_map(|m| m.matched_terms.iter().cloned())
            .collect()
    }
}

/// Runs transcripts through the bilingual lexicon
pub struct SpeechThreatDetector {
    lexicon: Lexicon,
    /// Transcripts below this recognizer confidence are not matched
    threshold: f32,
}

impl SpeechThreatDetector {
    pub fn new(lexicon: Lexicon, threshold: f32) -> Self {
        Self { lexicon, threshold }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Lexicon::from_config(&config.lexicon),
            config.speech.speech_threat_threshold,
        )
    }

    /// Raw keyword scan with no confidence gate
    pub fn scan_text(&self, chunk_id: u64, text: &str) -> Vec<ThreatKeywordMatch> {
        self.lexicon.scan(chunk_id, text)
    }

    pub fn evaluate(&self, chunk_id: u64, transcript: Option<&Transcript>) -> SpeechVerdict {
        let transcript = match transcript {
            Some(t) if !t.text.trim().is_empty() => t,
            _ => return SpeechVerdict::unknown(chunk_id),
        };

        let confidence = transcript.confidence.unwrap_or(1.0);
        if confidence < self.threshold {
            debug!(
                "Chunk {}: transcript confidence {:.2} below {:.2}, not matched",
                chunk_id, confidence, self.threshold
            );
            return SpeechVerdict {
                classification: ClassificationResult::new(
                    Source::Speech,
                    Label::Speech,
                    confidence,
                    chunk_id,
                ),
                matches: Vec::new(),
            };
        }

        let matches = self.lexicon.scan(chunk_id, &transcript.text);
        let label = match matches.iter().map(|m| m.severity).max() {
            Some(Severity::Threat) => Label::ThreatSpeech,
            Some(Severity::Profanity) => Label::Profanity,
            None => Label::Speech,
        };
        if !matches.is_empty() {
            debug!("Chunk {}: {} keyword group(s) in \"{}\"", chunk_id, matches.len(), transcript.text);
        }

        SpeechVerdict {
            classification: ClassificationResult::new(Source::Speech, label, confidence, chunk_id),
            matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SpeechThreatDetector {
        SpeechThreatDetector::from_config(&Config::default())
    }

    #[test]
    fn test_threat_phrase() {
        let transcript = Transcript::new("I'll hurt you");
        let verdict = detector().evaluate(2, Some(&transcript));
        assert!(verdict.has_threat());
        assert_eq!(verdict.classification.label, Label::ThreatSpeech);
        assert_eq!(verdict.classification.source, Source::Speech);
        assert_eq!(verdict.chunk_id(), 2);
        assert!(verdict.matched_terms().contains("i'll hurt you"));
    }

    #[test]
    fn test_profanity_only() {
        let verdict = detector().evaluate(0, Some(&Transcript::new("oh damn")));
        assert!(!verdict.has_threat());
        assert!(verdict.has_profanity());
        assert_eq!(verdict.severity(), Some(Severity::Profanity));
        assert_eq!(verdict.classification.label, Label::Profanity);
    }

    #[test]
    fn test_no_transcript() {
        let verdict = detector().evaluate(5, None);
        assert_eq!(verdict.classification.label, Label::Unknown);
        assert!(verdict.matches.is_empty());

        let blank = Transcript::new("  ");
        assert_eq!(detector().evaluate(5, Some(&blank)).classification.label, Label::Unknown);
    }

    #[test]
    fn test_low_confidence_transcript_is_not_matched() {
        let transcript = Transcript::new("I will kill you").with_confidence(0.3);
        let verdict = detector().evaluate(0, Some(&transcript));
        assert!(verdict.matches.is_empty());
        assert_eq!(verdict.classification.label, Label::Speech);
        assert!((verdict.classification.confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_clean_speech() {
        let verdict = detector().evaluate(0, Some(&Transcript::new("good morning")));
        assert_eq!(verdict.classification.label, Label::Speech);
        assert_eq!(verdict.severity(), None);
    }
}

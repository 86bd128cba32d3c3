//! Acoustic event classifier wrapping a pre-trained scorer

use std::sync::Arc;
use tracing::warn;

use crate::classify::model::ScoringFunction;
use crate::classify::{ClassificationResult, Label, Source};
use crate::config::AcousticConfig;
use crate::error::ModelError;

/// Maps a scorer's probability vector to a single tagged result
pub struct AcousticClassifier {
    model: Arc<dyn ScoringFunction>,
    /// `labels[i]` is the label of the model's i-th output
    labels: Vec<Label>,
}

impl AcousticClassifier {
    /// Bind a loaded model to the configured label set.
    ///
    /// Every configured label must be scored by the model and every model
    /// output must name a known label.
    pub fn new(model: Arc<dyn ScoringFunction>, config: &AcousticConfig) -> Result<Self, ModelError> {
        let labels = model
            .labels()
            .iter()
            .map(|name| name.parse::<Label>())
            .collect::<Result<Vec<_>, _>>()?;

        for name in &config.labels {
            let wanted: Label = name.parse()?;
            if !labels.contains(&wanted) {
                return Err(ModelError::Corrupt(format!(
                    "model does not score configured label '{}'",
                    name
                )));
            }
        }

        Ok(Self { model, labels })
    }

    /// Top label for a feature vector; scoring failures become `Unknown`
    pub fn classify(&self, chunk_id: u64, features: &[f32]) -> ClassificationResult {
        match self.try_classify(chunk_id, features) {
            Ok(result) => result,
            Err(e) => {
                warn!("Chunk {}: acoustic scoring failed: {}", chunk_id, e);
                ClassificationResult::unknown(Source::NonSpeech, chunk_id)
            }
        }
    }

    pub fn try_classify(&self, chunk_id: u64, features: &[f32]) -> Result<ClassificationResult, ModelError> {
        let scores = self.model.score(features)?;
        if scores.len() != self.labels.len() {
            return Err(ModelError::Scoring(format!(
                "expected {} scores, got {}",
                self.labels.len(),
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(ModelError::Scoring("non-finite score".into()));
        }

        // First maximum wins ties
        let (best, confidence) = scores
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bs), (i, s)| {
                if s > bs {
                    (i, s)
                } else {
                    (bi, bs)
                }
            });

        Ok(ClassificationResult::new(
            Source::NonSpeech,
            self.labels[best],
            confidence,
            chunk_id,
        ))
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }
}

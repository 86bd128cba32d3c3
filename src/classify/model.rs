//! Pre-trained acoustic model interface and the JSON linear-softmax format

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::ModelError;

/// An opaque pre-trained scorer.
///
/// `score` returns one probability per entry of `labels`, in the same order.
pub trait ScoringFunction: Send + Sync {
    fn labels(&self) -> &[String];

    fn score(&self, features: &[f32]) -> Result<Vec<f32>, ModelError>;

    /// Expected feature vector length, when the model knows it
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Loads a scorer from a weight artifact
pub trait ModelLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn ScoringFunction>, ModelError>;
}

/// Softmax over an affine map of (optionally standardized) features.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub labels: Vec<String>,
    /// `[labels][features]`
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    /// Per-feature mean subtracted before scoring
    #[serde(default)]
    pub mean: Option<Vec<f32>>,
    /// Per-feature divisor applied after centering
    #[serde(default)]
    pub scale: Option<Vec<f32>>,
}

impl LinearModel {
    /// Check the artifact is internally consistent
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.labels.is_empty() {
            return Err(ModelError::Corrupt("model has no labels".into()));
        }
        if self.weights.len() != self.labels.len() || self.bias.len() != self.labels.len() {
            return Err(ModelError::Corrupt(format!(
                "{} labels but {} weight rows and {} biases",
                self.labels.len(),
                self.weights.len(),
                self.bias.len()
            )));
        }
        let dim = self.input_len();
        if dim == 0 || self.weights.iter().any(|row| row.len() != dim) {
            return Err(ModelError::Corrupt("weight rows differ in length".into()));
        }
        for (name, vector) in [("mean", &self.mean), ("scale", &self.scale)] {
            if let Some(v) = vector {
                if v.len() != dim {
                    return Err(ModelError::Corrupt(format!(
                        "{} has {} entries, expected {}",
                        name,
                        v.len(),
                        dim
                    )));
                }
            }
        }
        if let Some(scale) = &self.scale {
            if scale.iter().any(|s| *s == 0.0) {
                return Err(ModelError::Corrupt("scale contains zero".into()));
            }
        }
        let all_finite = self
            .weights
            .iter()
            .flatten()
            .chain(&self.bias)
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ModelError::Corrupt("non-finite parameter".into()));
        }
        Ok(())
    }

    /// Feature vector length the model expects
    pub fn input_len(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }
}

impl ScoringFunction for LinearModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.input_len())
    }

    fn score(&self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
        let dim = self.input_len();
        if features.len() != dim {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                got: features.len(),
            });
        }

        let input: Vec<f32> = features
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let centered = x - self.mean.as_ref().map_or(0.0, |m| m[i]);
                centered / self.scale.as_ref().map_or(1.0, |s| s[i])
            })
            .collect();

        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(&input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect();

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f32 = exps.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(ModelError::Scoring("softmax overflow".into()));
        }
        Ok(exps.into_iter().map(|e| e / total).collect())
    }
}

/// Reads [`LinearModel`] JSON artifacts
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonModelLoader;

impl ModelLoader for JsonModelLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn ScoringFunction>, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::Unavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let model: LinearModel =
            serde_json::from_str(&content).map_err(|e| ModelError::Corrupt(e.to_string()))?;
        model.validate()?;

        info!(
            "Loaded acoustic model from {} ({} labels, {} features)",
            path.display(),
            model.labels.len(),
            model.input_len()
        );
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_label_model() -> LinearModel {
        LinearModel {
            labels: vec!["screaming".into(), "normal".into()],
            weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            bias: vec![0.0, 0.0],
            mean: None,
            scale: None,
        }
    }

    #[test]
    fn test_softmax_scores_sum_to_one() {
        let model = two_label_model();
        let scores = model.score(&[2.0, 0.0]).unwrap();
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let model = two_label_model();
        assert!(matches!(
            model.score(&[1.0]),
            Err(ModelError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_standardization_applies() {
        let model = LinearModel {
            mean: Some(vec![10.0, 0.0]),
            scale: Some(vec![2.0, 1.0]),
            ..two_label_model()
        };
        // (10 - 10) / 2 = 0 on both inputs: tie
        let scores = model.score(&[10.0, 0.0]).unwrap();
        assert!((scores[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_validate_rejects_ragged_weights() {
        let model = LinearModel {
            weights: vec![vec![1.0, 0.0], vec![1.0]],
            ..two_label_model()
        };
        assert!(matches!(model.validate(), Err(ModelError::Corrupt(_))));
    }

    #[test]
    fn test_loader_missing_file_is_unavailable() {
        let result = JsonModelLoader.load(Path::new("/nonexistent/model.json"));
        assert!(matches!(result, Err(ModelError::Unavailable { .. })));
    }

    #[test]
    fn test_loader_reads_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"labels": ["screaming", "normal"], "weights": [[1.0], [-1.0]], "bias": [0.0, 0.0]}"#,
        )
        .unwrap();

        let model = JsonModelLoader.load(&path).unwrap();
        assert_eq!(model.labels().len(), 2);
        assert_eq!(model.score(&[0.0]).unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_loader_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonModelLoader.load(&path), Err(ModelError::Corrupt(_))));
    }
}

//! Logistic-regression classifier over the frame feature vector.
//!
//! Weights are loaded from a JSON file:
//!
//! ```json
//! {
//!   "weights": [4.0, 0.12, -1.5, -0.8, -2.0, 2.5],
//!   "bias": -0.5,
//!   "mean":  [0.05, -45.0, 0.2, 0.2, 0.4, 0.5],
//!   "scale": [0.05, 15.0, 0.1, 0.1, 0.2, 0.2]
//! }
//! ```
//!
//! `mean` and `scale` are optional (defaults 0 and 1). The score is
//! `sigmoid(bias + Σ wᵢ · (xᵢ − meanᵢ) / scaleᵢ)`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ClassificationScore, SpeechClassifier};
use crate::error::{Result, VadError};
use crate::features::{FeatureVector, FEATURE_LEN};

/// Serialized logistic model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticWeights {
    pub weights: Vec<f32>,
    pub bias: f32,
    #[serde(default)]
    pub mean: Option<Vec<f32>>,
    #[serde(default)]
    pub scale: Option<Vec<f32>>,
}

/// Stateless logistic-regression speech classifier.
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    weights: [f32; FEATURE_LEN],
    bias: f32,
    mean: [f32; FEATURE_LEN],
    scale: [f32; FEATURE_LEN],
}

impl LogisticClassifier {
    /// Build from parsed weights, checking every vector has `FEATURE_LEN`
    /// finite entries and no scale is zero.
    ///
    /// # Errors
    /// `VadError::ModelUnavailable` on any dimension or value problem.
    pub fn from_weights(w: LogisticWeights) -> Result<Self> {
        let weights = fixed_len("weights", &w.weights)?;
        let mean = match &w.mean {
            Some(m) => fixed_len("mean", m)?,
            None => [0.0; FEATURE_LEN],
        };
        let scale = match &w.scale {
            Some(s) => fixed_len("scale", s)?,
            None => [1.0; FEATURE_LEN],
        };
        if let Some(i) = scale.iter().position(|s| *s == 0.0) {
            return Err(VadError::model(None, format!("scale[{i}] is zero")));
        }
        if !w.bias.is_finite() {
            return Err(VadError::model(None, "bias is not finite"));
        }

        Ok(Self {
            weights,
            bias: w.bias,
            mean,
            scale,
        })
    }

    /// Read and validate a weights file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| VadError::model(Some(path.to_path_buf()), e.to_string()))?;
        let weights: LogisticWeights = serde_json::from_str(&raw)
            .map_err(|e| VadError::model(Some(path.to_path_buf()), format!("invalid weights: {e}")))?;
        Self::from_weights(weights).map_err(|e| match e {
            VadError::ModelUnavailable { reason, .. } => {
                VadError::model(Some(path.to_path_buf()), reason)
            }
            other => other,
        })
    }

    fn logit(&self, x: &[f32; FEATURE_LEN]) -> f32 {
        let mut z = self.bias;
        for i in 0..FEATURE_LEN {
            z += self.weights[i] * (x[i] - self.mean[i]) / self.scale[i];
        }
        z
    }
}

impl SpeechClassifier for LogisticClassifier {
    fn name(&self) -> &str {
        "logistic"
    }

    fn classify(&self, features: &FeatureVector) -> Result<ClassificationScore> {
        let z = self.logit(features.values());
        Ok(ClassificationScore::new(sigmoid(z), features.frame_index()))
    }
}

fn fixed_len(field: &str, v: &[f32]) -> Result<[f32; FEATURE_LEN]> {
    if v.len() != FEATURE_LEN {
        return Err(VadError::model(
            None,
            format!("{field} has {} values, expected {FEATURE_LEN}", v.len()),
        ));
    }
    if let Some(i) = v.iter().position(|x| !x.is_finite()) {
        return Err(VadError::model(None, format!("{field}[{i}] is not finite")));
    }
    let mut out = [0.0; FEATURE_LEN];
    out.copy_from_slice(v);
    Ok(out)
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::load_model;
    use crate::features::RMS;
    use approx::assert_abs_diff_eq;

    fn rms_only(weight: f32, bias: f32) -> LogisticWeights {
        let mut weights = vec![0.0; FEATURE_LEN];
        weights[RMS] = weight;
        LogisticWeights {
            weights,
            bias,
            mean: None,
            scale: None,
        }
    }

    fn features_with_rms(rms: f32) -> FeatureVector {
        let mut values = [0.0; FEATURE_LEN];
        values[RMS] = rms;
        FeatureVector::new(values, 3)
    }

    #[test]
    fn zero_logit_scores_half() {
        let c = LogisticClassifier::from_weights(rms_only(0.0, 0.0)).unwrap();
        let score = c.classify(&features_with_rms(0.9)).unwrap();
        assert_abs_diff_eq!(score.value(), 0.5, epsilon = 1e-6);
        assert_eq!(score.frame_index(), 3);
    }

    #[test]
    fn normalisation_is_applied() {
        let mut w = rms_only(1.0, 0.0);
        let mut mean = vec![0.0; FEATURE_LEN];
        mean[RMS] = 0.1;
        let mut scale = vec![1.0; FEATURE_LEN];
        scale[RMS] = 0.1;
        w.mean = Some(mean);
        w.scale = Some(scale);

        let c = LogisticClassifier::from_weights(w).unwrap();
        // (0.2 - 0.1) / 0.1 = 1 → sigmoid(1)
        let score = c.classify(&features_with_rms(0.2)).unwrap();
        assert_abs_diff_eq!(score.value(), 0.731_058_6, epsilon = 1e-5);
    }

    #[test]
    fn louder_frames_score_higher_with_positive_weight() {
        let c = LogisticClassifier::from_weights(rms_only(20.0, -2.0)).unwrap();
        let quiet = c.classify(&features_with_rms(0.01)).unwrap().value();
        let loud = c.classify(&features_with_rms(0.3)).unwrap().value();
        assert!(quiet < 0.5 && loud > 0.5, "quiet={quiet} loud={loud}");
    }

    #[test]
    fn wrong_dimension_is_model_unavailable() {
        let w = LogisticWeights {
            weights: vec![1.0; FEATURE_LEN - 1],
            bias: 0.0,
            mean: None,
            scale: None,
        };
        let err = LogisticClassifier::from_weights(w).unwrap_err();
        assert!(matches!(err, VadError::ModelUnavailable { .. }));
    }

    #[test]
    fn zero_scale_is_rejected() {
        let mut w = rms_only(1.0, 0.0);
        w.scale = Some(vec![0.0; FEATURE_LEN]);
        assert!(LogisticClassifier::from_weights(w).is_err());
    }

    #[test]
    fn load_model_reads_json_weights() {
        let path = std::env::temp_dir().join(format!(
            "micvad-logistic-{}-{:?}.json",
            std::process::id(),
            std::thread::current().id()
        ));
        let json = serde_json::to_string(&rms_only(20.0, -2.0)).unwrap();
        std::fs::write(&path, json).unwrap();

        let handle = load_model(&path).expect("load weights");
        let _ = std::fs::remove_file(&path);

        assert_eq!(handle.name(), "logistic");
        handle.warm_up().expect("warm-up");
        let loud = handle.classify(&features_with_rms(0.3)).unwrap();
        assert!(loud.value() > 0.5);
    }

    #[test]
    fn load_model_rejects_malformed_json() {
        let path = std::env::temp_dir().join(format!(
            "micvad-logistic-bad-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{ \"weights\": [1, 2").unwrap();
        let err = load_model(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);

        match err {
            VadError::ModelUnavailable { path: p, .. } => assert_eq!(p.as_deref(), Some(path.as_path())),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

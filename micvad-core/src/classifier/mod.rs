//! Speech classifier abstraction.
//!
//! The `SpeechClassifier` trait decouples the pipeline from any specific
//! backend (energy heuristic, logistic weights, ONNX model, test closure).
//!
//! `classify` takes `&self`: a classifier holds no memory of prior frames, so
//! one loaded backend can be shared read-only across sessions through a
//! cheap-clone [`ModelHandle`]. Smoothing over time is the state machine's job.

pub mod energy;
pub mod logistic;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use energy::EnergyClassifier;
pub use logistic::{LogisticClassifier, LogisticWeights};

#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, VadError};
use crate::features::{FeatureVector, FEATURE_LEN};

/// Probability of speech for one frame, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationScore {
    value: f32,
    frame_index: u64,
}

impl ClassificationScore {
    /// Clamp `value` into `[0, 1]`; NaN maps to 0.
    pub fn new(value: f32, frame_index: u64) -> Self {
        let value = if value.is_nan() {
            0.0
        } else {
            value.clamp(0.0, 1.0)
        };
        Self { value, frame_index }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

/// Contract for speech classifier backends.
pub trait SpeechClassifier: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Validate the backend before a session starts: check dimensions, run a
    /// dummy inference. Called once per `start`.
    ///
    /// # Errors
    /// Any failure is reported to the caller as `VadError::ModelUnavailable`.
    fn warm_up(&self) -> Result<()> {
        let probe = FeatureVector::new([0.0; FEATURE_LEN], 0);
        self.classify(&probe).map(|_| ())
    }

    /// Score one feature vector.
    fn classify(&self, features: &FeatureVector) -> Result<ClassificationScore>;
}

/// Thread-safe reference-counted handle to any `SpeechClassifier` implementor.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<dyn SpeechClassifier>);

impl ModelHandle {
    /// Wrap any `SpeechClassifier` in a `ModelHandle`.
    pub fn new<C: SpeechClassifier>(classifier: C) -> Self {
        Self(Arc::new(classifier))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn classify(&self, features: &FeatureVector) -> Result<ClassificationScore> {
        self.0.classify(features)
    }

    /// Run the backend's warm-up, mapping any failure to `ModelUnavailable`.
    pub fn warm_up(&self) -> Result<()> {
        self.0.warm_up().map_err(|e| match e {
            err @ VadError::ModelUnavailable { .. } => err,
            other => VadError::model(None, format!("{} warm-up failed: {other}", self.name())),
        })
    }
}

impl Default for ModelHandle {
    fn default() -> Self {
        Self::new(EnergyClassifier::default())
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Load a classifier backend from `path`.
///
/// - `.json` → [`LogisticClassifier`] weights
/// - `.onnx` → [`OnnxClassifier`] (requires the `onnx` feature)
///
/// Loading is explicit and happens once; the returned handle is immutable.
///
/// # Errors
/// `VadError::ModelUnavailable` for a missing file, unreadable or malformed
/// content, a dimension mismatch, or an unsupported extension.
pub fn load_model(path: impl AsRef<Path>) -> Result<ModelHandle> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(VadError::model(Some(path.to_path_buf()), "file not found"));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let handle = match ext.as_str() {
        "json" => ModelHandle::new(LogisticClassifier::from_json_file(path)?),
        #[cfg(feature = "onnx")]
        "onnx" => ModelHandle::new(OnnxClassifier::new(path)?),
        #[cfg(not(feature = "onnx"))]
        "onnx" => {
            return Err(VadError::model(
                Some(path.to_path_buf()),
                "compiled without the `onnx` feature",
            ))
        }
        other => {
            return Err(VadError::model(
                Some(path.to_path_buf()),
                format!("unsupported model format {other:?}"),
            ))
        }
    };

    info!(path = ?path, backend = handle.name(), "model loaded");
    Ok(handle)
}

/// Classifier backed by a pure closure. Handy as a deterministic test double
/// or for quick experiments with hand-written rules.
pub struct FnClassifier<F> {
    name: String,
    f: F,
}

impl<F> FnClassifier<F>
where
    F: Fn(&FeatureVector) -> f32 + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> SpeechClassifier for FnClassifier<F>
where
    F: Fn(&FeatureVector) -> f32 + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn classify(&self, features: &FeatureVector) -> Result<ClassificationScore> {
        Ok(ClassificationScore::new(
            (self.f)(features),
            features.frame_index(),
        ))
    }
}

//! ONNX classifier: a learned model over the frame feature vector.
//!
//! ## Model I/O
//!
//! | Name     | Shape               | DType | Direction |
//! |----------|---------------------|-------|-----------|
//! | `input`  | `[1, FEATURE_LEN]`  | f32   | in        |
//! | `output` | `[1, 1]` or `[1]`   | f32   | out       |
//!
//! Names are resolved case-insensitively against a few common aliases and
//! fall back to the first input/output. The output is treated as a
//! probability and clamped into [0, 1].
//!
//! `ort::Session::run` needs `&mut`, so the session sits behind a
//! `parking_lot::Mutex`. Sessions sharing one handle serialise on that lock;
//! the model itself carries no per-frame state.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::session::builder::SessionBuilder;
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use parking_lot::Mutex;
use tracing::info;

use super::{ClassificationScore, SpeechClassifier};
use crate::error::{Result, VadError};
use crate::features::{FeatureVector, FEATURE_LEN};

pub struct OnnxClassifier {
    session: Mutex<Session>,
    path: PathBuf,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    /// Load the ONNX model at `path`.
    ///
    /// # Errors
    /// `VadError::ModelUnavailable` if the file is missing or ort cannot
    /// build a session from it.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VadError::model(Some(path.to_path_buf()), "file not found"));
        }
        let unavailable = |e: ort::Error| VadError::model(Some(path.to_path_buf()), e.to_string());

        let session = SessionBuilder::new()
            .map_err(unavailable)?
            .commit_from_file(path)
            .map_err(unavailable)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "features", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| VadError::model(Some(path.to_path_buf()), "model has no inputs"))?;
        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| VadError::model(Some(path.to_path_buf()), "model has no outputs"))?;

        info!(
            path = ?path,
            input = %input_name,
            output = %output_name,
            "onnx classifier session ready"
        );

        Ok(Self {
            session: Mutex::new(session),
            path: path.to_path_buf(),
            input_name,
            output_name,
        })
    }

    fn run(&self, values: &[f32; FEATURE_LEN]) -> Result<f32> {
        let input_arr = Array2::<f32>::from_shape_vec((1, FEATURE_LEN), values.to_vec())
            .map_err(|e| VadError::Inference(e.to_string()))?;
        let input_val = Value::from_array(input_arr)
            .map_err(|e: ort::Error| VadError::Inference(e.to_string()))?;
        let inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| VadError::Inference(e.to_string()))?;
        let prob_output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(|e| VadError::Inference(e.to_string()))?;
        Ok(prob_data.first().copied().unwrap_or(0.0))
    }
}

impl SpeechClassifier for OnnxClassifier {
    fn name(&self) -> &str {
        "onnx"
    }

    fn warm_up(&self) -> Result<()> {
        self.run(&[0.0; FEATURE_LEN])
            .map(|_| ())
            .map_err(|e| VadError::model(Some(self.path.clone()), e.to_string()))
    }

    fn classify(&self, features: &FeatureVector) -> Result<ClassificationScore> {
        let prob = self.run(features.values())?;
        Ok(ClassificationScore::new(prob, features.frame_index()))
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

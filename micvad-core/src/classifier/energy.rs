//! Energy-based classifier: log energy mapped onto a probability.
//!
//! ## Algorithm
//!
//! 1. Take the frame's log energy (dBFS) from the feature vector.
//! 2. Map it linearly from `floor_db` (score 0) to `ceiling_db` (score 1).
//! 3. Scale by the speech-band energy ratio, with `band_weight` controlling
//!    how much out-of-band energy (hum, hiss) is discounted.
//!
//! No model file, no state. The default backend when nothing is loaded.

use super::{ClassificationScore, SpeechClassifier};
use crate::error::Result;
use crate::features::{FeatureVector, LOG_ENERGY_DB, SPEECH_BAND_RATIO};

/// A simple energy-based speech classifier.
#[derive(Debug, Clone)]
pub struct EnergyClassifier {
    /// Log energy (dBFS) at or below which the score is 0.
    floor_db: f32,
    /// Log energy (dBFS) at or above which the energy term is 1.
    ceiling_db: f32,
    /// Weight of the speech-band ratio in [0, 1]. 0 ignores spectrum entirely.
    band_weight: f32,
}

impl EnergyClassifier {
    /// Create a new `EnergyClassifier`.
    ///
    /// # Parameters
    /// - `floor_db`: noise floor. Default: `-50.0`.
    /// - `ceiling_db`: level treated as certain speech. Default: `-20.0`.
    /// - `band_weight`: speech-band emphasis, clamped to [0, 1]. Default: `0.3`.
    pub fn new(floor_db: f32, ceiling_db: f32, band_weight: f32) -> Self {
        let ceiling_db = if ceiling_db > floor_db {
            ceiling_db
        } else {
            floor_db + 1.0
        };
        Self {
            floor_db,
            ceiling_db,
            band_weight: band_weight.clamp(0.0, 1.0),
        }
    }

    fn energy_term(&self, log_energy_db: f32) -> f32 {
        ((log_energy_db - self.floor_db) / (self.ceiling_db - self.floor_db)).clamp(0.0, 1.0)
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(-50.0, -20.0, 0.3)
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn name(&self) -> &str {
        "energy"
    }

    fn classify(&self, features: &FeatureVector) -> Result<ClassificationScore> {
        let energy = self.energy_term(features.get(LOG_ENERGY_DB));
        let band = features.get(SPEECH_BAND_RATIO);
        let spectral = (1.0 - self.band_weight) + self.band_weight * band;
        Ok(ClassificationScore::new(
            energy * spectral,
            features.frame_index(),
        ))
    }
}

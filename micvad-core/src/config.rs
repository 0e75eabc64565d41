//! Session configuration (captured once at `start`, JSON-loadable).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VadError};

/// Immutable configuration for one VAD session.
///
/// Defaults follow the common Silero-style setup: 512-sample frames at
/// 16 kHz (32 ms), a 0.5 / 0.35 threshold pair, 3 frames to confirm a start
/// and 8 frames (~256 ms) of silence to confirm an end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// Scores at or above this value count as speech.
    pub positive_speech_threshold: f32,
    /// Scores at or below this value count as silence while in speech.
    pub negative_speech_threshold: f32,
    /// Consecutive speech frames required to confirm a start.
    pub min_speech_frames: usize,
    /// Consecutive silence frames required to confirm an end.
    pub min_silence_frames: usize,
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// Session sample rate in Hz. Sources at other rates are resampled.
    pub sample_rate: u32,
    /// Frames of audio preceding the confirmed run that are prepended to the
    /// utterance audio.
    pub pre_speech_pad_frames: usize,
    /// Emit a `FrameProcessed` event for every classified frame.
    pub emit_frame_events: bool,
    /// Close an in-progress utterance with a `SpeechEnd` when paused.
    pub end_utterance_on_pause: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            positive_speech_threshold: 0.5,
            negative_speech_threshold: 0.35,
            min_speech_frames: 3,
            min_silence_frames: 8,
            frame_size: 512,
            sample_rate: 16_000,
            pre_speech_pad_frames: 1,
            emit_frame_events: false,
            end_utterance_on_pause: false,
        }
    }
}

impl SessionConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    ///
    /// The result is not validated; `SessionController::start` does that.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            VadError::Other(anyhow::anyhow!(
                "failed to parse config {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    /// Check every field; the error names the first offending one.
    pub fn validate(&self) -> Result<()> {
        let pos = self.positive_speech_threshold;
        let neg = self.negative_speech_threshold;

        if !(0.0..=1.0).contains(&pos) {
            return Err(VadError::config(
                "positive_speech_threshold",
                format!("{pos} is outside [0, 1]"),
            ));
        }
        if !(0.0..=1.0).contains(&neg) {
            return Err(VadError::config(
                "negative_speech_threshold",
                format!("{neg} is outside [0, 1]"),
            ));
        }
        if pos <= neg {
            return Err(VadError::config(
                "negative_speech_threshold",
                format!("{neg} must be below positive_speech_threshold ({pos})"),
            ));
        }
        if self.min_speech_frames == 0 {
            return Err(VadError::config("min_speech_frames", "must be at least 1"));
        }
        if self.min_silence_frames == 0 {
            return Err(VadError::config("min_silence_frames", "must be at least 1"));
        }
        if self.frame_size == 0 {
            return Err(VadError::config("frame_size", "must be greater than zero"));
        }
        if self.sample_rate == 0 {
            return Err(VadError::config("sample_rate", "must be greater than zero"));
        }
        Ok(())
    }

    /// Duration of one frame in milliseconds.
    pub fn frame_duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_size as f64 * 1000.0 / self.sample_rate as f64
    }
}

//! Event types delivered to session consumers.
//!
//! | Event | Delivery |
//! |-------|----------|
//! | `VadEvent` | per-session ordered channel returned by `SessionController::start` |
//! | `SessionStatusEvent` | `SessionController::subscribe_status` broadcast |
//!
//! Everything serialises to camelCase JSON so the CLI (or any IPC bridge) can
//! forward events verbatim.

use serde::{Deserialize, Serialize};

use crate::vad::UtteranceState;

// ---------------------------------------------------------------------------
// Speech events
// ---------------------------------------------------------------------------

/// Pipeline output, delivered strictly in frame order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VadEvent {
    /// Speech confirmed after `min_speech_frames` consecutive speech frames.
    SpeechStart {
        /// First frame of the qualifying run.
        start_index: u64,
        /// Frame whose score confirmed the start.
        confirmed_index: u64,
    },
    /// Utterance closed, either by `min_silence_frames` of silence or by a
    /// teardown flush.
    SpeechEnd {
        start_index: u64,
        /// Frame whose score confirmed the end (last processed frame on flush).
        end_index: u64,
        sample_rate: u32,
        /// Number of samples in `audio`.
        audio_samples: usize,
        /// Utterance audio: pre-speech pad followed by frames
        /// `start_index..=end_index`. Not serialised.
        #[serde(skip)]
        audio: Vec<f32>,
    },
    /// Per-frame diagnostics (only when `emit_frame_events` is set).
    FrameProcessed {
        frame_index: u64,
        score: f32,
        rms: f32,
        state: UtteranceState,
    },
    /// The session aborted; no further events follow except a flush `SpeechEnd`.
    Failed { message: String },
}

impl VadEvent {
    pub fn speech_end(start_index: u64, end_index: u64, sample_rate: u32, audio: Vec<f32>) -> Self {
        VadEvent::SpeechEnd {
            start_index,
            end_index,
            sample_rate,
            audio_samples: audio.len(),
            audio,
        }
    }

    pub fn is_speech_start(&self) -> bool {
        matches!(self, VadEvent::SpeechStart { .. })
    }

    pub fn is_speech_end(&self) -> bool {
        matches!(self, VadEvent::SpeechEnd { .. })
    }
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted whenever the session status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Controller created, nothing started yet.
    Idle,
    /// Worker is pulling audio and emitting events.
    Running,
    /// Worker is alive but not advancing the pipeline.
    Paused,
    /// `stop()` completed; the controller may be started again.
    Stopped,
    /// The source reached end of stream; call `stop()` before restarting.
    Finished,
    /// The session aborted; call `stop()` before restarting.
    Error,
}

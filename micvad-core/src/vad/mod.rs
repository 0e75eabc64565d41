//! Utterance state machine: hysteresis over per-frame speech scores.
//!
//! ```text
//!              score ≥ pos                    run == min_speech
//!   Silence ─────────────► PossibleSpeechStart ─────────────────► Speech   (SpeechStart)
//!      ▲                        │ score < pos                      │  ▲
//!      │                        ▼                                  │  │ score ≥ pos
//!      └──────────────────── Silence               score ≤ neg     ▼  │
//!      │                                         PossibleSpeechEnd ───┘
//!      └──────────────────────────────────────────────┘ run == min_silence (SpeechEnd)
//! ```
//!
//! A score strictly between the thresholds while in `PossibleSpeechEnd`
//! neither extends the silence run nor resumes speech.
//!
//! The machine only moves when [`UtteranceStateMachine::on_score`] is called
//! with a new score, except for [`UtteranceStateMachine::flush`] at teardown.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::ClassificationScore;
use crate::config::SessionConfig;
use crate::ipc::events::VadEvent;

/// Where the session is relative to an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UtteranceState {
    Silence,
    PossibleSpeechStart,
    Speech,
    PossibleSpeechEnd,
}

impl UtteranceState {
    /// `true` once a start has been confirmed and no end yet.
    pub fn in_utterance(self) -> bool {
        matches!(
            self,
            UtteranceState::Speech | UtteranceState::PossibleSpeechEnd
        )
    }
}

/// Threshold and run-length parameters, copied out of [`SessionConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    pub positive_threshold: f32,
    pub negative_threshold: f32,
    pub min_speech_frames: usize,
    pub min_silence_frames: usize,
    pub pre_speech_pad_frames: usize,
}

impl From<&SessionConfig> for Hysteresis {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            positive_threshold: cfg.positive_speech_threshold,
            negative_threshold: cfg.negative_speech_threshold,
            min_speech_frames: cfg.min_speech_frames.max(1),
            min_silence_frames: cfg.min_silence_frames.max(1),
            pre_speech_pad_frames: cfg.pre_speech_pad_frames,
        }
    }
}

pub struct UtteranceStateMachine {
    params: Hysteresis,
    sample_rate: u32,
    state: UtteranceState,
    /// First frame of the current speech run (tentative or confirmed).
    run_start: u64,
    /// Consecutive qualifying frames in the current tentative state.
    run_len: usize,
    last_index: Option<u64>,
    /// Recent non-utterance frames, newest last.
    pad: VecDeque<Vec<f32>>,
    /// Pad contents captured when the tentative run began.
    pad_snapshot: Vec<f32>,
    /// Audio of the tentative run, or of the confirmed utterance.
    audio: Vec<f32>,
}

impl UtteranceStateMachine {
    pub fn new(params: Hysteresis, sample_rate: u32) -> Self {
        Self {
            params,
            sample_rate,
            state: UtteranceState::Silence,
            run_start: 0,
            run_len: 0,
            last_index: None,
            pad: VecDeque::with_capacity(params.pre_speech_pad_frames.min(64)),
            pad_snapshot: Vec::new(),
            audio: Vec::new(),
        }
    }

    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self::new(Hysteresis::from(cfg), cfg.sample_rate)
    }

    pub fn state(&self) -> UtteranceState {
        self.state
    }

    /// Index of the last frame fed in, if any.
    pub fn last_index(&self) -> Option<u64> {
        self.last_index
    }

    /// Advance on one new score. `samples` is the frame the score belongs to;
    /// it is buffered for the utterance audio.
    pub fn on_score(&mut self, score: ClassificationScore, samples: &[f32]) -> Option<VadEvent> {
        let idx = score.frame_index();
        debug_assert!(
            self.last_index.map_or(true, |last| idx > last),
            "frame indices must strictly increase"
        );
        self.last_index = Some(idx);

        let value = score.value();
        let is_speech = value >= self.params.positive_threshold;
        let is_silence = value <= self.params.negative_threshold;

        match self.state {
            UtteranceState::Silence => {
                if is_speech {
                    self.begin_tentative_run(idx, samples);
                    if let Some(event) = self.try_confirm_start(idx) {
                        return Some(event);
                    }
                }
                self.remember_pad(samples);
                None
            }

            UtteranceState::PossibleSpeechStart => {
                if is_speech {
                    self.run_len += 1;
                    self.audio.extend_from_slice(samples);
                    if let Some(event) = self.try_confirm_start(idx) {
                        return Some(event);
                    }
                } else {
                    debug!(
                        run_start = self.run_start,
                        run_len = self.run_len,
                        "tentative speech run discarded"
                    );
                    self.state = UtteranceState::Silence;
                    self.run_len = 0;
                    self.audio.clear();
                    self.pad_snapshot.clear();
                }
                self.remember_pad(samples);
                None
            }

            UtteranceState::Speech => {
                self.audio.extend_from_slice(samples);
                if is_silence {
                    self.state = UtteranceState::PossibleSpeechEnd;
                    self.run_len = 1;
                    return self.try_confirm_end(idx);
                }
                None
            }

            UtteranceState::PossibleSpeechEnd => {
                self.audio.extend_from_slice(samples);
                if is_speech {
                    self.state = UtteranceState::Speech;
                    self.run_len = 0;
                } else if is_silence {
                    self.run_len += 1;
                    return self.try_confirm_end(idx);
                }
                None
            }
        }
    }

    /// Teardown: close an in-progress utterance with the audio received so
    /// far. A tentative run is discarded silently. Always leaves `Silence`.
    pub fn flush(&mut self) -> Option<VadEvent> {
        let event = if self.state.in_utterance() {
            let end_index = self.last_index.unwrap_or(self.run_start);
            let audio = std::mem::take(&mut self.audio);
            Some(VadEvent::speech_end(
                self.run_start,
                end_index,
                self.sample_rate,
                audio,
            ))
        } else {
            None
        };
        self.clear_run();
        event
    }

    /// Forget everything, including the pre-speech pad and the last index.
    pub fn reset(&mut self) {
        self.clear_run();
        self.pad.clear();
        self.last_index = None;
    }

    fn begin_tentative_run(&mut self, idx: u64, samples: &[f32]) {
        self.state = UtteranceState::PossibleSpeechStart;
        self.run_start = idx;
        self.run_len = 1;
        self.pad_snapshot.clear();
        for frame in &self.pad {
            self.pad_snapshot.extend_from_slice(frame);
        }
        self.audio.clear();
        self.audio.extend_from_slice(samples);
    }

    fn try_confirm_start(&mut self, idx: u64) -> Option<VadEvent> {
        if self.run_len < self.params.min_speech_frames {
            return None;
        }
        self.state = UtteranceState::Speech;
        self.run_len = 0;

        let mut audio = std::mem::take(&mut self.pad_snapshot);
        audio.append(&mut self.audio);
        self.audio = audio;
        self.pad.clear();

        Some(VadEvent::SpeechStart {
            start_index: self.run_start,
            confirmed_index: idx,
        })
    }

    fn try_confirm_end(&mut self, idx: u64) -> Option<VadEvent> {
        if self.run_len < self.params.min_silence_frames {
            return None;
        }
        let audio = std::mem::take(&mut self.audio);
        let event = VadEvent::speech_end(self.run_start, idx, self.sample_rate, audio);
        self.clear_run();
        Some(event)
    }

    fn remember_pad(&mut self, samples: &[f32]) {
        let cap = self.params.pre_speech_pad_frames;
        if cap == 0 {
            return;
        }
        while self.pad.len() >= cap {
            self.pad.pop_front();
        }
        self.pad.push_back(samples.to_vec());
    }

    fn clear_run(&mut self) {
        self.state = UtteranceState::Silence;
        self.run_len = 0;
        self.audio.clear();
        self.pad_snapshot.clear();
    }
}

impl std::fmt::Debug for UtteranceStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtteranceStateMachine")
            .field("params", &self.params)
            .field("state", &self.state)
            .field("run_start", &self.run_start)
            .field("run_len", &self.run_len)
            .field("last_index", &self.last_index)
            .field("buffered_samples", &self.audio.len())
            .finish()
    }
}

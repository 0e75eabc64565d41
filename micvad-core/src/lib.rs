//! # micvad-core
//!
//! Voice activity detection over a live microphone or any other chunked
//! audio source.
//!
//! ## Architecture
//!
//! ```text
//! AudioSource ─► RateConverter ─► FrameBuffer ─► FeatureExtractor
//!                                                      │
//!                                            SpeechClassifier::classify
//!                                                      │
//!                                            UtteranceStateMachine
//!                                                      │
//!                                      mpsc::UnboundedSender<VadEvent>
//! ```
//!
//! Everything after the source runs on one worker thread per session, owned
//! by [`SessionController`]. Each stage is also usable on its own.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod ipc;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{channel_source, AudioSource, ChannelSource, ChunkSender, SourceChunk, WavSource};
pub use buffering::frame::{AudioFrame, FrameBuffer};
pub use classifier::{
    load_model, ClassificationScore, EnergyClassifier, FnClassifier, LogisticClassifier,
    ModelHandle, SpeechClassifier,
};
pub use config::SessionConfig;
pub use engine::{pipeline::DiagnosticsSnapshot, EventReceiver, SessionController};
pub use error::{Result, VadError};
pub use features::{FeatureExtractor, FeatureVector, FEATURE_LEN};
pub use ipc::events::{SessionStatus, SessionStatusEvent, VadEvent};
pub use vad::{UtteranceState, UtteranceStateMachine};

#[cfg(feature = "audio-cpal")]
pub use audio::MicrophoneSource;

#[cfg(feature = "onnx")]
pub use classifier::OnnxClassifier;

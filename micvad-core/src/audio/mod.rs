//! Audio input: the `AudioSource` trait and the sources shipped with the crate.
//!
//! A session pulls mono f32 PCM chunks from one `AudioSource` on its worker
//! thread. The source decides its own native rate; the worker converts to the
//! session rate with [`resample::RateConverter`].
//!
//! | Source | Backing |
//! |--------|---------|
//! | [`ChannelSource`] | crossbeam channel fed by a [`ChunkSender`] |
//! | [`WavSource`] | hound WAV reader |
//! | [`MicrophoneSource`] | cpal input stream + SPSC ring (feature `audio-cpal`) |

pub mod channel;
#[cfg(feature = "audio-cpal")]
pub mod microphone;
pub mod resample;
pub mod wav;

pub use channel::{channel_source, ChannelSource, ChunkSender};
#[cfg(feature = "audio-cpal")]
pub use microphone::MicrophoneSource;
pub use wav::WavSource;

use std::time::Duration;

use crate::error::Result;

/// One pull from an `AudioSource`.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceChunk {
    /// Mono samples in `[-1, 1]` at `AudioSource::sample_rate`.
    Samples(Vec<f32>),
    /// Nothing arrived within the timeout; the source is still live.
    Pending,
    /// The source is exhausted. No further chunks follow.
    Ended,
}

/// Supplier of raw audio chunks.
///
/// Implementations are moved into the session worker and only ever touched
/// from that thread, so they need `Send` but not `Sync`.
pub trait AudioSource: Send {
    /// Short name for logs.
    fn name(&self) -> &str {
        "audio"
    }

    /// Native sample rate of the chunks this source yields.
    fn sample_rate(&self) -> u32;

    /// Wait up to `timeout` for the next chunk.
    ///
    /// # Errors
    /// `VadError::AudioSource` when the underlying device or file fails. The
    /// session then aborts with status `Error`.
    fn next_chunk(&mut self, timeout: Duration) -> Result<SourceChunk>;

    /// Release the underlying device or file. Called exactly once by the
    /// session worker before it exits.
    fn close(&mut self) {}
}

impl<S: AudioSource + ?Sized> AudioSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn next_chunk(&mut self, timeout: Duration) -> Result<SourceChunk> {
        (**self).next_chunk(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Average interleaved frames down to mono.
pub(crate) fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let frames = interleaved.len() / channels;
    out.reserve(frames);
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = interleaved[base..base + channels].iter().sum();
        out.push(sum / channels as f32);
    }
}

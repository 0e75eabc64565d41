//! Push-style source: callers hand chunks to a [`ChunkSender`] from any
//! thread and the session pulls them from the paired [`ChannelSource`].
//!
//! Dropping every `ChunkSender` (or calling [`ChunkSender::finish`]) ends the
//! stream once the queued chunks are drained.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::{AudioSource, SourceChunk};
use crate::error::{Result, VadError};

enum Message {
    Samples(Vec<f32>),
    End,
}

/// Producer half. Cheap to clone.
#[derive(Clone)]
pub struct ChunkSender {
    tx: Sender<Message>,
    sample_rate: u32,
}

impl ChunkSender {
    /// Queue a chunk of mono samples.
    ///
    /// # Errors
    /// `VadError::AudioSource` once the consuming session has gone away.
    pub fn send(&self, samples: impl Into<Vec<f32>>) -> Result<()> {
        self.tx
            .send(Message::Samples(samples.into()))
            .map_err(|_| VadError::AudioSource("channel source closed".into()))
    }

    /// Mark the end of the stream explicitly, even while clones are alive.
    pub fn finish(&self) {
        let _ = self.tx.send(Message::End);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Consumer half, handed to `SessionController::start`.
pub struct ChannelSource {
    rx: Receiver<Message>,
    sample_rate: u32,
    ended: bool,
}

/// Create a connected sender/source pair for audio at `sample_rate`.
pub fn channel_source(sample_rate: u32) -> (ChunkSender, ChannelSource) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        ChunkSender { tx, sample_rate },
        ChannelSource {
            rx,
            sample_rate,
            ended: false,
        },
    )
}

impl AudioSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_chunk(&mut self, timeout: Duration) -> Result<SourceChunk> {
        if self.ended {
            return Ok(SourceChunk::Ended);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(Message::Samples(samples)) => Ok(SourceChunk::Samples(samples)),
            Ok(Message::End) | Err(RecvTimeoutError::Disconnected) => {
                self.ended = true;
                Ok(SourceChunk::Ended)
            }
            Err(RecvTimeoutError::Timeout) => Ok(SourceChunk::Pending),
        }
    }

    fn close(&mut self) {
        self.ended = true;
        // Queued chunks are dropped unread.
        while self.rx.try_recv().is_ok() {}
    }
}

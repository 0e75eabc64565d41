//! Fixed-size analysis frames.
//!
//! `FrameBuffer` accepts variable-length chunks and cuts them into
//! `frame_size`-sample [`AudioFrame`]s, carrying any remainder over to the
//! next push. The only samples ever dropped are the trailing partial frame
//! at end of stream, via [`FrameBuffer::discard_partial`].

use crate::error::{Result, VadError};

/// One unit of analysis: exactly `frame_size` mono samples.
///
/// Immutable once produced. `index` is strictly increasing within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    index: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, index: u64) -> Self {
        Self {
            samples,
            sample_rate,
            index,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Accumulates raw samples into fixed-size frames.
#[derive(Debug)]
pub struct FrameBuffer {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_index: u64,
}

impl FrameBuffer {
    /// # Errors
    /// `VadError::Configuration` if `frame_size` is zero.
    pub fn new(frame_size: usize, sample_rate: u32) -> Result<Self> {
        if frame_size == 0 {
            return Err(VadError::config("frame_size", "must be greater than zero"));
        }
        Ok(Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            next_index: 0,
        })
    }

    /// Append `samples`, returning every frame that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let total = self.pending.len() + samples.len();
        let mut frames = Vec::with_capacity(total / self.frame_size);

        let mut rest = samples;
        while self.pending.len() + rest.len() >= self.frame_size {
            let needed = self.frame_size - self.pending.len();
            let (head, tail) = rest.split_at(needed);

            let mut frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
            frame.extend_from_slice(head);
            frames.push(AudioFrame::new(frame, self.sample_rate, self.next_index));
            self.next_index += 1;

            rest = tail;
        }
        self.pending.extend_from_slice(rest);

        frames
    }

    /// Samples carried over that do not yet fill a frame.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Drop the trailing partial frame (end of stream). Returns the number
    /// of samples discarded.
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Index the next emitted frame will carry.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

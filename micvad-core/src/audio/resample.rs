//! Sample-rate conversion from a source's native rate to the session rate.
//!
//! Microphones commonly run at 44.1 or 48 kHz while the session analyses
//! frames at `SessionConfig::sample_rate`. `RateConverter` runs on the session
//! worker thread, never in the capture callback, so it may allocate.
//!
//! Equal rates produce a passthrough converter with no rubato state.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, VadError};

/// Input block size handed to rubato per call.
pub const DEFAULT_RESAMPLE_CHUNK: usize = 1024;

/// Mono f32 converter between two fixed rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    chunk_size: usize,
    scratch: Vec<Vec<f32>>,
    /// Source samples accepted so far, including `pending`.
    consumed_in: u64,
    /// Samples returned so far.
    produced_out: u64,
    from_rate: u32,
    to_rate: u32,
}

impl RateConverter {
    /// # Errors
    /// `VadError::AudioSource` for a zero rate or when rubato rejects the ratio.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(VadError::AudioSource(format!(
                "cannot resample {from_rate} Hz -> {to_rate} Hz"
            )));
        }
        let chunk_size = chunk_size.max(1);

        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                chunk_size,
                scratch: Vec::new(),
                consumed_in: 0,
                produced_out: 0,
                from_rate,
                to_rate,
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| VadError::AudioSource(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(from_rate, to_rate, chunk_size, "resampling source audio");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            chunk_size,
            scratch,
            consumed_in: 0,
            produced_out: 0,
            from_rate,
            to_rate,
        })
    }

    /// Convert `samples`, returning whatever output is ready (possibly none).
    ///
    /// Input is accumulated until a full block is available; the remainder
    /// waits for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };

        self.consumed_in += samples.len() as u64;
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        let mut consumed = 0;

        while self.pending.len() - consumed >= self.chunk_size {
            let block = &self.pending[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.chunk_size;
        }
        self.pending.drain(..consumed);

        self.produced_out += out.len() as u64;
        out
    }

    /// End of input: convert the partial block still buffered and drain the
    /// resampler's delay line. Afterwards the total output is the input
    /// length scaled by the rate ratio plus `output_delay` leading samples.
    pub fn finish(&mut self) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Vec::new();
        };

        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let target = (self.consumed_in as f64 * ratio).round() as u64 + resampler.output_delay() as u64;
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let input = [tail.as_slice()];
            match resampler.process_partial_into_buffer(Some(&input[..]), &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler flush error: {e}"),
            }
        }

        while self.produced_out + (out.len() as u64) < target {
            match resampler.process_partial_into_buffer(None::<&[&[f32]]>, &mut self.scratch, None) {
                Ok((_, produced)) if produced > 0 => {
                    out.extend_from_slice(&self.scratch[0][..produced])
                }
                Ok(_) => break,
                Err(e) => {
                    error!("resampler flush error: {e}");
                    break;
                }
            }
        }

        let keep = target.saturating_sub(self.produced_out) as usize;
        out.truncate(keep);
        resampler.reset();
        self.consumed_in = 0;
        self.produced_out = 0;
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }
}

impl std::fmt::Debug for RateConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateConverter")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("chunk_size", &self.chunk_size)
            .field("pending", &self.pending.len())
            .finish()
    }
}

//! WAV file source and utterance writer (hound).
//!
//! Integer PCM of any bit depth and 32-bit float are accepted; multi-channel
//! files are averaged down to mono chunk by chunk.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, info};

use super::{mix_to_mono, AudioSource, SourceChunk};
use crate::error::{Result, VadError};

/// Frames (per channel) read per `next_chunk` call.
pub const DEFAULT_WAV_CHUNK_FRAMES: usize = 1024;

pub struct WavSource {
    reader: Option<WavReader<BufReader<File>>>,
    path: PathBuf,
    spec: WavSpec,
    chunk_frames: usize,
    interleaved: Vec<f32>,
}

impl WavSource {
    /// # Errors
    /// `VadError::AudioSource` if the file cannot be opened or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_chunk(path, DEFAULT_WAV_CHUNK_FRAMES)
    }

    pub fn open_with_chunk(path: impl AsRef<Path>, chunk_frames: usize) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(|e| {
            VadError::AudioSource(format!("failed to open WAV '{}': {e}", path.display()))
        })?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(VadError::AudioSource(format!(
                "'{}' declares zero channels",
                path.display()
            )));
        }

        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            duration_samples = reader.duration(),
            "opened WAV source"
        );

        Ok(Self {
            reader: Some(reader),
            path: path.to_path_buf(),
            spec,
            chunk_frames: chunk_frames.max(1),
            interleaved: Vec::new(),
        })
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    fn read_interleaved(&mut self, reader: &mut WavReader<BufReader<File>>) -> Result<()> {
        let want = self.chunk_frames * self.spec.channels as usize;
        self.interleaved.clear();

        match self.spec.sample_format {
            SampleFormat::Int => {
                let max_val = (1i64 << (self.spec.bits_per_sample.max(1) - 1)) as f32;
                for s in reader.samples::<i32>().take(want) {
                    let s = s.map_err(|e| self.read_error(e))?;
                    self.interleaved.push(s as f32 / max_val);
                }
            }
            SampleFormat::Float => {
                for s in reader.samples::<f32>().take(want) {
                    let s = s.map_err(|e| self.read_error(e))?;
                    self.interleaved.push(s);
                }
            }
        }
        Ok(())
    }

    fn read_error(&self, e: hound::Error) -> VadError {
        VadError::AudioSource(format!("failed to read '{}': {e}", self.path.display()))
    }
}

impl AudioSource for WavSource {
    fn name(&self) -> &str {
        "wav"
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn next_chunk(&mut self, _timeout: Duration) -> Result<SourceChunk> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(SourceChunk::Ended);
        };
        let read = self.read_interleaved(&mut reader);
        self.reader = Some(reader);
        read?;

        if self.interleaved.is_empty() {
            debug!(path = %self.path.display(), "WAV source exhausted");
            self.reader = None;
            return Ok(SourceChunk::Ended);
        }

        let mut mono = Vec::new();
        mix_to_mono(&self.interleaved, self.spec.channels as usize, &mut mono);
        Ok(SourceChunk::Samples(mono))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Write mono samples as a 16-bit PCM WAV file.
pub fn write_wav_i16(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let wav_err =
        |e: hound::Error| VadError::AudioSource(format!("failed to write '{}': {e}", path.display()));

    let mut writer = WavWriter::create(path, spec).map_err(wav_err)?;
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(v).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    Ok(())
}

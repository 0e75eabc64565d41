//! Default-microphone source via cpal.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), while an `AudioSource` must move into the session worker. The
//! stream therefore lives on a dedicated capture thread that opens it, parks
//! until `close`, and drops it on the same thread. A sync oneshot channel
//! carries open errors back to [`MicrophoneSource::open_default`].
//!
//! # Real-time constraints
//!
//! The input callback runs on an OS audio thread at elevated priority. It
//! does not lock, block or do I/O: it mixes to mono into a scratch buffer and
//! writes into an SPSC ring producer whose `push_slice` is wait-free. The
//! session worker drains the consumer half.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, SizedSample, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::{AudioSource, SourceChunk};
use crate::buffering::{create_audio_ring, AudioConsumer, AudioProducer, Consumer, Producer};
use crate::error::{Result, VadError};

/// Samples drained from the ring per `next_chunk`.
const DRAIN_CHUNK: usize = 960;
/// Poll interval while the ring is empty.
const EMPTY_POLL: Duration = Duration::from_millis(5);
/// Upper bound on one park of the capture thread.
const PARK_INTERVAL: Duration = Duration::from_millis(50);

pub struct MicrophoneSource {
    consumer: AudioConsumer,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
    scratch: Vec<f32>,
}

impl MicrophoneSource {
    /// Open the system default input device (falling back to the first
    /// listed input) and start capturing.
    ///
    /// Blocks until the stream is playing or has failed to open.
    ///
    /// # Errors
    /// `VadError::AudioSource` when no input device exists or cpal cannot
    /// build or start the stream.
    pub fn open_default() -> Result<Self> {
        let (producer, consumer) = create_audio_ring();
        let stop = Arc::new(AtomicBool::new(false));
        let (open_tx, open_rx) = mpsc::channel::<Result<u32>>();

        let thread_stop = Arc::clone(&stop);
        let capture_thread = thread::Builder::new()
            .name("micvad-capture".into())
            .spawn(move || {
                let stream = match open_stream(producer, Arc::clone(&thread_stop)) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                while !thread_stop.load(Ordering::Acquire) {
                    thread::park_timeout(PARK_INTERVAL);
                }
                // Stream drops here, releasing the device on its own thread.
                drop(stream);
                info!("microphone released");
            })
            .map_err(|e| VadError::AudioSource(format!("failed to spawn capture thread: {e}")))?;

        let sample_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = capture_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = capture_thread.join();
                return Err(VadError::AudioSource(
                    "capture thread exited before opening the device".into(),
                ));
            }
        };

        Ok(Self {
            consumer,
            sample_rate,
            stop,
            capture_thread: Some(capture_thread),
            scratch: vec![0.0; DRAIN_CHUNK],
        })
    }
}

impl AudioSource for MicrophoneSource {
    fn name(&self) -> &str {
        "microphone"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_chunk(&mut self, timeout: Duration) -> Result<SourceChunk> {
        if self.capture_thread.is_none() {
            return Ok(SourceChunk::Ended);
        }
        let started = Instant::now();
        loop {
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n > 0 {
                return Ok(SourceChunk::Samples(self.scratch[..n].to_vec()));
            }
            if started.elapsed() >= timeout {
                return Ok(SourceChunk::Pending);
            }
            thread::sleep(EMPTY_POLL.min(timeout.saturating_sub(started.elapsed())));
        }
    }

    fn close(&mut self) {
        let Some(handle) = self.capture_thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            error!("capture thread panicked");
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn default_device() -> Result<Device> {
    let host = cpal::default_host();
    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    let mut devices = host
        .input_devices()
        .map_err(|e| VadError::AudioSource(e.to_string()))?;
    let fallback = devices
        .next()
        .ok_or_else(|| VadError::AudioSource("no input device available".into()))?;
    warn!("no default input device, falling back to first available input");
    Ok(fallback)
}

fn open_stream(producer: AudioProducer, stop: Arc<AtomicBool>) -> Result<(Stream, u32)> {
    let device = default_device()?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| VadError::AudioSource(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(sample_rate, channels, format = ?supported.sample_format(), "audio config selected");

    let config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, stop, |s| s),
        SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, producer, stop, |s| s as f32 / 32768.0)
        }
        SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, stop, |s| {
            (s as f32 - 32768.0) / 32768.0
        }),
        SampleFormat::U8 => {
            build_stream::<u8>(&device, &config, producer, stop, |s| (s as f32 - 128.0) / 128.0)
        }
        fmt => {
            return Err(VadError::AudioSource(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| VadError::AudioSource(e.to_string()))?;

    Ok((stream, sample_rate))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    stop: Arc<AtomicBool>,
    to_f32: fn(T) -> f32,
) -> Result<Stream>
where
    T: SizedSample + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    // Sized for a generous device period so the callback rarely reallocates.
    let mut mono: Vec<f32> = Vec::with_capacity(8192);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / channels;
                mono.clear();
                for f in 0..frames {
                    let base = f * channels;
                    let mut sum = 0f32;
                    for c in 0..channels {
                        sum += to_f32(data[base + c]);
                    }
                    mono.push(sum / channels as f32);
                }
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!("ring buffer full: dropped {} samples", mono.len() - written);
                }
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| VadError::AudioSource(e.to_string()))
}

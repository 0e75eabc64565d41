//! `micvad`: run a VAD session over a WAV file or the default microphone and
//! print every event as one JSON line on stdout.
//!
//! Logs go to stderr (`RUST_LOG`, default `micvad=info`). Ctrl-C stops the
//! session; an open utterance is still reported before exit.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use micvad_core::audio::wav::write_wav_i16;
use micvad_core::{
    load_model, AudioSource, MicrophoneSource, ModelHandle, SessionConfig, SessionController,
    VadEvent, WavSource,
};

#[derive(Parser, Debug)]
#[command(name = "micvad")]
#[command(about = "Voice activity detection over a WAV file or microphone")]
struct Params {
    /// WAV file to analyse.
    #[arg(short = 'i', long = "input", conflicts_with = "mic")]
    input: Option<PathBuf>,

    /// Capture from the default microphone until Ctrl-C.
    #[arg(long = "mic", default_value_t = false)]
    mic: bool,

    /// JSON session config; flags below override its fields.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Classifier model (`.json` logistic weights or `.onnx`). Defaults to
    /// the built-in energy classifier.
    #[arg(short = 'm', long = "model")]
    model: Option<PathBuf>,

    #[arg(long = "positive-threshold")]
    positive_threshold: Option<f32>,

    #[arg(long = "negative-threshold")]
    negative_threshold: Option<f32>,

    #[arg(long = "min-speech-frames")]
    min_speech_frames: Option<usize>,

    #[arg(long = "min-silence-frames")]
    min_silence_frames: Option<usize>,

    #[arg(long = "frame-size")]
    frame_size: Option<usize>,

    #[arg(long = "sample-rate")]
    sample_rate: Option<u32>,

    #[arg(long = "pre-speech-pad-frames")]
    pre_speech_pad_frames: Option<usize>,

    /// Also print a `frameProcessed` line for every frame.
    #[arg(long = "frame-events", default_value_t = false)]
    frame_events: bool,

    /// Write each utterance as a 16-bit WAV file into this directory.
    #[arg(long = "save-utterances")]
    save_utterances: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("micvad=info")),
        )
        .with_writer(io::stderr)
        .init();

    let params = Params::parse();
    let config = build_config(&params)?;
    config.validate()?;

    let model = match &params.model {
        Some(path) => load_model(path)?,
        None => ModelHandle::default(),
    };

    let source: Box<dyn AudioSource> = match (&params.input, params.mic) {
        (Some(path), _) => Box::new(WavSource::open(path)?),
        (None, true) => Box::new(MicrophoneSource::open_default()?),
        (None, false) => bail!("either --input <wav> or --mic is required"),
    };

    if let Some(dir) = &params.save_utterances {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating utterance directory {}", dir.display()))?;
    }

    info!(
        backend = model.name(),
        frame_ms = config.frame_duration_ms(),
        positive = config.positive_speech_threshold,
        negative = config.negative_speech_threshold,
        "starting session"
    );

    let controller = Arc::new(SessionController::new());
    let mut events = controller.start(config, model, source)?;
    let mut stopping = false;
    let stdout = io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let mut out = stdout.lock();
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
                out.flush()?;
                drop(out);
                if let (Some(dir), VadEvent::SpeechEnd { .. }) = (&params.save_utterances, &event) {
                    if let Err(e) = save_utterance(dir, &event) {
                        warn!("failed to save utterance: {e:#}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                info!("interrupt received, stopping");
                stopping = true;
                let controller = Arc::clone(&controller);
                tokio::task::spawn_blocking(move || controller.stop());
            }
        }
    }

    let controller_for_stop = Arc::clone(&controller);
    tokio::task::spawn_blocking(move || controller_for_stop.stop()).await?;
    info!(
        status = ?controller.status(),
        diagnostics = %serde_json::to_string(&controller.diagnostics_snapshot())?,
        "session complete"
    );
    Ok(())
}

/// Defaults, then the config file, then individual flags.
fn build_config(params: &Params) -> Result<SessionConfig> {
    let mut config = match &params.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(v) = params.positive_threshold {
        config.positive_speech_threshold = v;
    }
    if let Some(v) = params.negative_threshold {
        config.negative_speech_threshold = v;
    }
    if let Some(v) = params.min_speech_frames {
        config.min_speech_frames = v;
    }
    if let Some(v) = params.min_silence_frames {
        config.min_silence_frames = v;
    }
    if let Some(v) = params.frame_size {
        config.frame_size = v;
    }
    if let Some(v) = params.sample_rate {
        config.sample_rate = v;
    }
    if let Some(v) = params.pre_speech_pad_frames {
        config.pre_speech_pad_frames = v;
    }
    if params.frame_events {
        config.emit_frame_events = true;
    }
    Ok(config)
}

fn utterance_file_name(start_index: u64, end_index: u64) -> String {
    format!("utterance-{start_index:08}-{end_index:08}.wav")
}

fn save_utterance(dir: &Path, event: &VadEvent) -> Result<()> {
    let VadEvent::SpeechEnd {
        start_index,
        end_index,
        sample_rate,
        audio,
        ..
    } = event
    else {
        return Ok(());
    };
    let path = dir.join(utterance_file_name(*start_index, *end_index));
    write_wav_i16(&path, audio, *sample_rate)?;
    info!(path = %path.display(), samples = audio.len(), "utterance saved");
    Ok(())
}

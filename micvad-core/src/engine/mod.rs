//! `SessionController`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! SessionController::new()                         status = Idle
//!     └─► start(config, model, source)             status = Running
//!             ├─► pause() / resume()               status = Paused / Running
//!             ├─► source ends                      status = Finished
//!             ├─► worker fails                     status = Error
//!             └─► stop()                           status = Stopped
//! ```
//!
//! `start` rejects a second session first, then validates the config and
//! warms the model on the caller's thread before any worker exists, so every
//! setup failure is returned directly.
//! After `Finished` or `Error` the session still occupies the controller
//! until `stop()` joins the worker.
//!
//! ## Threading
//!
//! Each session gets one named OS thread that owns the source and all
//! pipeline state. The controller keeps only the join handle and the shared
//! signals, so it is `Send + Sync` and can sit behind an `Arc`.

pub mod pipeline;

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::{
    audio::{
        resample::{RateConverter, DEFAULT_RESAMPLE_CHUNK},
        AudioSource,
    },
    buffering::frame::FrameBuffer,
    classifier::{load_model, ModelHandle},
    config::SessionConfig,
    error::{Result, VadError},
    ipc::events::{SessionStatus, SessionStatusEvent, VadEvent},
};

use pipeline::{
    DiagnosticsSnapshot, FrameProcessor, PipelineContext, PipelineDiagnostics, SessionSignals,
    StatusCell,
};

/// Status broadcast capacity.
const STATUS_BROADCAST_CAP: usize = 64;

/// Ordered receiver of one session's events. Closes once the worker exits.
pub type EventReceiver = mpsc::UnboundedReceiver<VadEvent>;

struct ActiveSession {
    signals: Arc<SessionSignals>,
    worker: JoinHandle<()>,
}

pub struct SessionController {
    session: Mutex<Option<ActiveSession>>,
    status: StatusCell,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            status: StatusCell::new(STATUS_BROADCAST_CAP),
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    /// Start a session pulling audio from `source`.
    ///
    /// `config` is captured by value; later changes to the caller's copy do
    /// not reach the running session.
    ///
    /// # Errors
    /// - `VadError::AlreadyRunning` if a session exists; it is left untouched
    ///   and nothing else is checked.
    /// - `VadError::Configuration` if `config` is invalid.
    /// - `VadError::ModelUnavailable` if the model fails its warm-up.
    /// - `VadError::AudioSource` if the source rate cannot be converted.
    pub fn start(
        &self,
        config: SessionConfig,
        model: ModelHandle,
        source: Box<dyn AudioSource>,
    ) -> Result<EventReceiver> {
        let mut slot = self.session.lock();
        if slot.is_some() {
            return Err(VadError::AlreadyRunning);
        }
        self.spawn_locked(&mut slot, config, model, source)
    }

    /// Load a model file with [`load_model`] and start with it.
    pub fn start_with_model_path(
        &self,
        config: SessionConfig,
        model_path: impl AsRef<Path>,
        source: Box<dyn AudioSource>,
    ) -> Result<EventReceiver> {
        let mut slot = self.session.lock();
        if slot.is_some() {
            return Err(VadError::AlreadyRunning);
        }
        config.validate()?;
        let model = load_model(model_path)?;
        self.spawn_locked(&mut slot, config, model, source)
    }

    /// Validate, warm up and spawn the worker. The caller holds the empty
    /// session slot for the whole call.
    fn spawn_locked(
        &self,
        slot: &mut Option<ActiveSession>,
        config: SessionConfig,
        model: ModelHandle,
        source: Box<dyn AudioSource>,
    ) -> Result<EventReceiver> {
        config.validate()?;
        info!(backend = model.name(), "warming up classifier");
        model.warm_up()?;

        let resampler =
            RateConverter::new(source.sample_rate(), config.sample_rate, DEFAULT_RESAMPLE_CHUNK)?;
        let frames = FrameBuffer::new(config.frame_size, config.sample_rate)?;
        self.diagnostics.reset();
        let processor = FrameProcessor::new(&config, model, Arc::clone(&self.diagnostics))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, wake_rx) = SessionSignals::new();

        let ctx = PipelineContext {
            config,
            source,
            resampler,
            frames,
            processor,
            events_tx,
            signals: Arc::clone(&signals),
            wake_rx,
            status: self.status.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        // Running must be published before the worker can report Finished.
        self.status.set(SessionStatus::Running, None);
        let worker = thread::Builder::new()
            .name("micvad-session".into())
            .spawn(move || {
                pipeline::run(ctx);
            })
            .map_err(|e| {
                self.status.set(SessionStatus::Error, Some(e.to_string()));
                VadError::Other(anyhow::anyhow!("failed to spawn session worker: {e}"))
            })?;

        *slot = Some(ActiveSession { signals, worker });
        info!("session started");
        Ok(events_rx)
    }

    /// Halt the session on the next frame boundary. Buffered audio and the
    /// utterance state are kept. Pausing twice is a no-op.
    ///
    /// # Errors
    /// `VadError::NotRunning` without a live (running or paused) session.
    pub fn pause(&self) -> Result<()> {
        let slot = self.session.lock();
        let session = slot.as_ref().ok_or(VadError::NotRunning)?;
        match self
            .status
            .transition(SessionStatus::Running, SessionStatus::Paused)
        {
            SessionStatus::Running => {
                session.signals.set_paused(true);
                info!("session paused");
                Ok(())
            }
            SessionStatus::Paused => Ok(()),
            _ => Err(VadError::NotRunning),
        }
    }

    /// Continue a paused session from exactly where it halted.
    ///
    /// # Errors
    /// `VadError::NotRunning` without a live (running or paused) session.
    pub fn resume(&self) -> Result<()> {
        let slot = self.session.lock();
        let session = slot.as_ref().ok_or(VadError::NotRunning)?;
        match self
            .status
            .transition(SessionStatus::Paused, SessionStatus::Running)
        {
            SessionStatus::Paused => {
                session.signals.set_paused(false);
                info!("session resumed");
                Ok(())
            }
            SessionStatus::Running => Ok(()),
            _ => Err(VadError::NotRunning),
        }
    }

    /// Stop the session and wait for the worker to exit.
    ///
    /// When this returns the final `SpeechEnd` (if an utterance was open) has
    /// been sent, the source is closed and the event channel is closed. This
    /// holds for every caller, including ones racing another `stop()`. No-op
    /// when nothing is running. Never fails: problems are logged.
    pub fn stop(&self) {
        // The slot stays locked until the worker has exited, so a concurrent
        // caller waits for the same join. The worker never takes this lock.
        let mut slot = self.session.lock();
        let Some(session) = slot.take() else {
            debug!("stop requested with no active session");
            return;
        };

        info!("session stop requested");
        session.signals.request_stop();
        if session.worker.join().is_err() {
            error!("session worker panicked");
            self.status
                .set(SessionStatus::Stopped, Some("worker panicked".into()));
            return;
        }
        self.status.set(SessionStatus::Stopped, None);
        info!(diagnostics = ?self.diagnostics.snapshot(), "session stopped");
    }

    /// `true` while a session occupies the controller (any status but
    /// `Idle`/`Stopped`).
    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    /// Subscribe to status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status.subscribe()
    }

    /// Counters for the current (or last) session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

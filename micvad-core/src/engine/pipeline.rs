//! Session worker loop.
//!
//! ## Per iteration
//!
//! ```text
//! 1. stop requested?            → leave the loop
//! 2. paused?                    → wait on the wake channel, nothing advances
//! 3. pending frame available?   → extract → classify → state machine → send events
//! 4. otherwise pull one chunk   → resample → frame buffer → pending frames
//! ```
//!
//! Exactly one frame is processed between control checks, so pause and stop
//! take effect on frame boundaries. The worker owns every piece of session
//! state; the controller only sees the atomic signals, the status mutex and
//! the diagnostics counters.
//!
//! On the way out the worker flushes the state machine, closes the source
//! once and drops its event sender, in that order.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, info_span, warn, Span};

use crate::{
    audio::{resample::RateConverter, AudioSource, SourceChunk},
    buffering::frame::{AudioFrame, FrameBuffer},
    classifier::{ClassificationScore, ModelHandle},
    config::SessionConfig,
    error::Result,
    features::{compute_rms, FeatureExtractor},
    ipc::events::{SessionStatus, SessionStatusEvent, VadEvent},
    vad::{UtteranceState, UtteranceStateMachine},
};

/// How long one `next_chunk` call may block before control flags are rechecked.
pub const SOURCE_POLL: Duration = Duration::from_millis(20);
/// Wake-channel wait while paused.
const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub chunks_in: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub frames_processed: AtomicUsize,
    pub speech_frames: AtomicUsize,
    pub classifier_errors: AtomicUsize,
    pub events_emitted: AtomicUsize,
    pub discarded_samples: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.chunks_in.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.speech_frames.store(0, Ordering::Relaxed);
        self.classifier_errors.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.discarded_samples.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            speech_frames: self.speech_frames.load(Ordering::Relaxed),
            classifier_errors: self.classifier_errors.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            discarded_samples: self.discarded_samples.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub chunks_in: usize,
    pub samples_in: usize,
    pub frames_processed: usize,
    pub speech_frames: usize,
    pub classifier_errors: usize,
    pub events_emitted: usize,
    pub discarded_samples: usize,
}

/// Control flags shared between the controller and one worker.
pub struct SessionSignals {
    stop: AtomicBool,
    paused: AtomicBool,
    wake_tx: Sender<()>,
}

impl SessionSignals {
    pub fn new() -> (Arc<Self>, Receiver<()>) {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let signals = Arc::new(Self {
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            wake_tx,
        });
        (signals, wake_rx)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.wake();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn wake(&self) {
        // A full slot already guarantees a wake-up.
        let _ = self.wake_tx.try_send(());
    }
}

/// Shared status cell plus its broadcast channel.
#[derive(Clone)]
pub struct StatusCell {
    status: Arc<Mutex<SessionStatus>>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl StatusCell {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn set(&self, status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = status;
        let _ = self.tx.send(SessionStatusEvent { status, detail });
    }

    /// Move to `to` only when the current status is `from`. Returns the status
    /// observed before the call.
    pub fn transition(&self, from: SessionStatus, to: SessionStatus) -> SessionStatus {
        let mut guard = self.status.lock();
        let current = *guard;
        if current == from {
            *guard = to;
            drop(guard);
            let _ = self.tx.send(SessionStatusEvent {
                status: to,
                detail: None,
            });
        }
        current
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.tx.subscribe()
    }
}

/// Frame-level processing: features, classifier, state machine, event
/// assembly. Owns no threads and no source, so it can be driven directly.
pub struct FrameProcessor {
    extractor: FeatureExtractor,
    model: ModelHandle,
    machine: UtteranceStateMachine,
    emit_frame_events: bool,
    diagnostics: Arc<PipelineDiagnostics>,
    utterance_span: Option<Span>,
}

impl FrameProcessor {
    pub fn new(
        config: &SessionConfig,
        model: ModelHandle,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Result<Self> {
        Ok(Self {
            extractor: FeatureExtractor::new(config.frame_size, config.sample_rate)?,
            model,
            machine: UtteranceStateMachine::from_config(config),
            emit_frame_events: config.emit_frame_events,
            diagnostics,
            utterance_span: None,
        })
    }

    pub fn state(&self) -> UtteranceState {
        self.machine.state()
    }

    /// Run one frame through the chain and return the events it produced,
    /// in delivery order.
    ///
    /// # Errors
    /// `VadError::InvalidFrame` when the frame does not match the extractor.
    /// Classifier failures are not errors: the frame scores 0.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<Vec<VadEvent>> {
        let features = self.extractor.extract(frame)?;
        self.diagnostics
            .frames_processed
            .fetch_add(1, Ordering::Relaxed);

        let score = match self.model.classify(&features) {
            Ok(score) => score,
            Err(e) => {
                error!(frame = frame.index(), backend = self.model.name(), "classifier failed: {e}");
                self.diagnostics
                    .classifier_errors
                    .fetch_add(1, Ordering::Relaxed);
                ClassificationScore::new(0.0, frame.index())
            }
        };

        let transition = self.machine.on_score(score, frame.samples());
        if self.machine.state().in_utterance() {
            self.diagnostics.speech_frames.fetch_add(1, Ordering::Relaxed);
        }

        let mut events = Vec::with_capacity(2);
        if self.emit_frame_events {
            events.push(VadEvent::FrameProcessed {
                frame_index: frame.index(),
                score: score.value(),
                rms: compute_rms(frame.samples()),
                state: self.machine.state(),
            });
        }
        if let Some(event) = transition {
            self.trace_transition(&event);
            events.push(event);
        }
        Ok(events)
    }

    /// Close any in-progress utterance.
    pub fn flush(&mut self) -> Option<VadEvent> {
        let event = self.machine.flush();
        if let Some(ref event) = event {
            self.trace_transition(event);
        }
        self.utterance_span = None;
        event
    }

    fn trace_transition(&mut self, event: &VadEvent) {
        match event {
            VadEvent::SpeechStart {
                start_index,
                confirmed_index,
            } => {
                let span = info_span!("utterance", start_index = *start_index);
                span.in_scope(|| info!(confirmed_index = *confirmed_index, "speech start"));
                self.utterance_span = Some(span);
            }
            VadEvent::SpeechEnd {
                end_index,
                audio_samples,
                ..
            } => {
                let span = self.utterance_span.take().unwrap_or_else(Span::none);
                span.in_scope(|| info!(end_index = *end_index, audio_samples = *audio_samples, "speech end"));
            }
            _ => {}
        }
    }
}

/// Everything the worker owns, moved into its thread in one piece.
pub struct PipelineContext {
    pub config: SessionConfig,
    pub source: Box<dyn AudioSource>,
    pub resampler: RateConverter,
    pub frames: FrameBuffer,
    pub processor: FrameProcessor,
    pub events_tx: mpsc::UnboundedSender<VadEvent>,
    pub signals: Arc<SessionSignals>,
    pub wake_rx: Receiver<()>,
    pub status: StatusCell,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    Finished,
    Failed(String),
}

struct EventSink {
    tx: mpsc::UnboundedSender<VadEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
    receiver_gone: bool,
}

impl EventSink {
    fn send(&mut self, event: VadEvent) {
        if self.tx.send(event).is_ok() {
            self.diagnostics
                .events_emitted
                .fetch_add(1, Ordering::Relaxed);
        } else if !self.receiver_gone {
            self.receiver_gone = true;
            warn!("event receiver dropped; further events are discarded");
        }
    }
}

/// Run the session until stop, end of stream or failure. Returns how it ended.
pub fn run(ctx: PipelineContext) -> WorkerExit {
    let PipelineContext {
        config,
        mut source,
        mut resampler,
        mut frames,
        mut processor,
        events_tx,
        signals,
        wake_rx,
        status,
        diagnostics,
    } = ctx;

    info!(
        source = source.name(),
        source_rate = source.sample_rate(),
        sample_rate = config.sample_rate,
        frame_size = config.frame_size,
        frame_ms = config.frame_duration_ms(),
        "session worker started"
    );

    let mut sink = EventSink {
        tx: events_tx,
        diagnostics: Arc::clone(&diagnostics),
        receiver_gone: false,
    };
    let mut pending: VecDeque<AudioFrame> = VecDeque::new();
    let mut was_paused = false;
    let mut source_ended = false;

    let exit = loop {
        // ── 1. Stop ──────────────────────────────────────────────────────
        if signals.stop_requested() {
            break WorkerExit::Stopped;
        }

        // ── 2. Pause ─────────────────────────────────────────────────────
        if signals.is_paused() {
            if !was_paused {
                was_paused = true;
                debug!(
                    pending_frames = pending.len(),
                    pending_samples = frames.pending_samples(),
                    "session paused"
                );
                if config.end_utterance_on_pause {
                    if let Some(event) = processor.flush() {
                        sink.send(event);
                    }
                }
            }
            let _ = wake_rx.recv_timeout(PAUSE_POLL);
            continue;
        }
        if was_paused {
            was_paused = false;
            debug!("session resumed");
        }

        // ── 3. One pending frame ─────────────────────────────────────────
        if let Some(frame) = pending.pop_front() {
            match processor.process(&frame) {
                Ok(events) => events.into_iter().for_each(|e| sink.send(e)),
                Err(e) => break WorkerExit::Failed(e.to_string()),
            }
            continue;
        }

        if source_ended {
            break finish_stream(&mut frames, &diagnostics);
        }

        // ── 4. Pull audio ────────────────────────────────────────────────
        match source.next_chunk(SOURCE_POLL) {
            Ok(SourceChunk::Samples(samples)) => {
                diagnostics.chunks_in.fetch_add(1, Ordering::Relaxed);
                diagnostics
                    .samples_in
                    .fetch_add(samples.len(), Ordering::Relaxed);
                let resampled = resampler.process(&samples);
                pending.extend(frames.push(&resampled));
                debug!(
                    raw = samples.len(),
                    resampled = resampled.len(),
                    pending_frames = pending.len(),
                    "chunk buffered"
                );
            }
            Ok(SourceChunk::Pending) => {}
            Ok(SourceChunk::Ended) => {
                let tail = resampler.finish();
                pending.extend(frames.push(&tail));
                if !pending.is_empty() {
                    debug!(
                        tail = tail.len(),
                        pending_frames = pending.len(),
                        "end of stream; classifying buffered tail"
                    );
                    source_ended = true;
                    continue;
                }
                break finish_stream(&mut frames, &diagnostics);
            }
            Err(e) => break WorkerExit::Failed(e.to_string()),
        }
    };

    // ── Teardown ─────────────────────────────────────────────────────────
    match &exit {
        WorkerExit::Failed(message) => {
            error!("session failed: {message}");
            status.set(SessionStatus::Error, Some(message.clone()));
            sink.send(VadEvent::Failed {
                message: message.clone(),
            });
        }
        WorkerExit::Finished => {
            status.set(SessionStatus::Finished, Some("end of stream".into()));
        }
        WorkerExit::Stopped => {}
    }

    if let Some(event) = processor.flush() {
        sink.send(event);
    }
    source.close();
    drop(sink);

    info!(exit = ?exit, diagnostics = ?diagnostics.snapshot(), "session worker exited");
    exit
}

/// Every full frame has been processed: drop the final partial frame.
fn finish_stream(frames: &mut FrameBuffer, diagnostics: &PipelineDiagnostics) -> WorkerExit {
    let dropped = frames.discard_partial();
    diagnostics
        .discarded_samples
        .fetch_add(dropped, Ordering::Relaxed);
    debug!(dropped, "end of stream; partial frame discarded");
    WorkerExit::Finished
}

/// Push `samples` through a fresh frame buffer and processor, then flush.
/// Synchronous helper for offline analysis of an in-memory buffer.
pub fn process_samples(
    config: &SessionConfig,
    model: &ModelHandle,
    samples: &[f32],
) -> Result<Vec<VadEvent>> {
    config.validate()?;
    let diagnostics = Arc::new(PipelineDiagnostics::default());
    let mut frames = FrameBuffer::new(config.frame_size, config.sample_rate)?;
    let mut processor = FrameProcessor::new(config, model.clone(), diagnostics)?;

    let mut events = Vec::new();
    for frame in frames.push(samples) {
        events.extend(processor.process(&frame)?);
    }
    frames.discard_partial();
    events.extend(processor.flush());
    Ok(events)
}

impl std::fmt::Debug for FrameProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProcessor")
            .field("model", &self.model)
            .field("machine", &self.machine)
            .field("emit_frame_events", &self.emit_frame_events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::channel_source;
    use crate::classifier::{FnClassifier, SpeechClassifier};
    use crate::error::VadError;
    use crate::features::{FeatureVector, RMS};
    use std::thread;
    use std::time::Instant;
    use tokio::sync::mpsc::error::TryRecvError;

    const FRAME: usize = 160;

    fn config() -> SessionConfig {
        SessionConfig {
            positive_speech_threshold: 0.5,
            negative_speech_threshold: 0.3,
            min_speech_frames: 2,
            min_silence_frames: 2,
            frame_size: FRAME,
            sample_rate: 16_000,
            pre_speech_pad_frames: 0,
            emit_frame_events: false,
            end_utterance_on_pause: false,
        }
    }

    /// Scores 1.0 for loud frames and 0.0 for quiet ones.
    fn loudness_model() -> ModelHandle {
        ModelHandle::new(FnClassifier::new("loudness", |f: &FeatureVector| {
            if f.get(RMS) > 0.1 {
                1.0
            } else {
                0.0
            }
        }))
    }

    fn frames_of(levels: &[f32]) -> Vec<f32> {
        levels
            .iter()
            .flat_map(|l| std::iter::repeat(*l).take(FRAME))
            .collect()
    }

    fn recv_event_with_timeout(
        rx: &mut mpsc::UnboundedReceiver<VadEvent>,
        timeout: Duration,
    ) -> VadEvent {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Disconnected) => panic!("event channel closed unexpectedly"),
            }
        }
    }

    struct Harness {
        ctx: PipelineContext,
        events_rx: mpsc::UnboundedReceiver<VadEvent>,
        signals: Arc<SessionSignals>,
        status: StatusCell,
        diagnostics: Arc<PipelineDiagnostics>,
    }

    fn harness(cfg: SessionConfig, model: ModelHandle, source: Box<dyn AudioSource>) -> Harness {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, wake_rx) = SessionSignals::new();
        let status = StatusCell::new(16);
        status.set(SessionStatus::Running, None);
        let ctx = PipelineContext {
            resampler: RateConverter::new(source.sample_rate(), cfg.sample_rate, 1024).unwrap(),
            frames: FrameBuffer::new(cfg.frame_size, cfg.sample_rate).unwrap(),
            processor: FrameProcessor::new(&cfg, model, Arc::clone(&diagnostics)).unwrap(),
            config: cfg,
            source,
            events_tx,
            signals: Arc::clone(&signals),
            wake_rx,
            status: status.clone(),
            diagnostics: Arc::clone(&diagnostics),
        };
        Harness {
            ctx,
            events_rx,
            signals,
            status,
            diagnostics,
        }
    }

    #[test]
    fn process_samples_reports_start_and_end() {
        let samples = frames_of(&[0.0, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
        let events = process_samples(&config(), &loudness_model(), &samples).unwrap();
        assert_eq!(events.len(), 2, "{events:?}");
        assert_eq!(
            events[0],
            VadEvent::SpeechStart {
                start_index: 1,
                confirmed_index: 2
            }
        );
        match &events[1] {
            VadEvent::SpeechEnd {
                start_index,
                end_index,
                audio,
                ..
            } => {
                assert_eq!((*start_index, *end_index), (1, 5));
                assert_eq!(audio.len(), 5 * FRAME);
            }
            other => panic!("expected SpeechEnd, got {other:?}"),
        }
    }

    #[test]
    fn frame_events_precede_transition_events() {
        let mut cfg = config();
        cfg.emit_frame_events = true;
        cfg.min_speech_frames = 1;
        let events = process_samples(&cfg, &loudness_model(), &frames_of(&[0.5])).unwrap();
        assert!(matches!(
            events[0],
            VadEvent::FrameProcessed {
                frame_index: 0,
                state: UtteranceState::Speech,
                ..
            }
        ));
        assert!(events[1].is_speech_start());
        // flush at the end closes the utterance
        assert!(events[2].is_speech_end());
    }

    #[test]
    fn classifier_error_scores_zero_and_is_counted() {
        struct Failing;
        impl SpeechClassifier for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn warm_up(&self) -> Result<()> {
                Ok(())
            }
            fn classify(&self, _f: &FeatureVector) -> Result<ClassificationScore> {
                Err(VadError::Inference("boom".into()))
            }
        }

        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let mut processor =
            FrameProcessor::new(&config(), ModelHandle::new(Failing), Arc::clone(&diagnostics))
                .unwrap();
        let frame = AudioFrame::new(vec![0.5; FRAME], 16_000, 0);
        let events = processor.process(&frame).unwrap();

        assert!(events.is_empty());
        assert_eq!(processor.state(), UtteranceState::Silence);
        assert_eq!(diagnostics.snapshot().classifier_errors, 1);
    }

    #[test]
    fn mismatched_frame_is_invalid() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let mut processor = FrameProcessor::new(&config(), loudness_model(), diagnostics).unwrap();
        let frame = AudioFrame::new(vec![0.0; FRAME + 1], 16_000, 0);
        assert!(matches!(
            processor.process(&frame),
            Err(VadError::InvalidFrame(_))
        ));
    }

    #[test]
    fn run_finishes_at_end_of_stream_and_flushes() {
        let (tx, source) = channel_source(16_000);
        let mut h = harness(config(), loudness_model(), Box::new(source));
        tx.send(frames_of(&[0.5, 0.5, 0.5])).unwrap();
        tx.send(vec![0.5; FRAME / 2]).unwrap();
        drop(tx);

        let handle = thread::spawn(move || run(h.ctx));
        let exit = handle.join().expect("worker panicked");
        assert_eq!(exit, WorkerExit::Finished);
        assert_eq!(h.status.get(), SessionStatus::Finished);

        let start = recv_event_with_timeout(&mut h.events_rx, Duration::from_secs(1));
        assert!(start.is_speech_start());
        match recv_event_with_timeout(&mut h.events_rx, Duration::from_secs(1)) {
            VadEvent::SpeechEnd { end_index, audio, .. } => {
                assert_eq!(end_index, 2);
                assert_eq!(audio.len(), 3 * FRAME);
            }
            other => panic!("expected SpeechEnd, got {other:?}"),
        }
        assert!(matches!(
            h.events_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        ));

        let diag = h.diagnostics.snapshot();
        assert_eq!(diag.frames_processed, 3);
        assert_eq!(diag.discarded_samples, FRAME / 2);
        assert_eq!(diag.events_emitted, 2);
    }

    #[test]
    fn resampled_tail_is_classified_at_end_of_stream() {
        let input = vec![0.5f32; 2000];
        let mut reference = RateConverter::new(48_000, 16_000, 1024).unwrap();
        let resampled_len = reference.process(&input).len() + reference.finish().len();
        assert!(resampled_len >= 4 * FRAME, "resampled {resampled_len}");

        let (tx, source) = channel_source(48_000);
        let h = harness(config(), loudness_model(), Box::new(source));
        tx.send(input).unwrap();
        drop(tx);

        let exit = thread::spawn(move || run(h.ctx))
            .join()
            .expect("worker panicked");
        assert_eq!(exit, WorkerExit::Finished);

        let diag = h.diagnostics.snapshot();
        assert_eq!(diag.frames_processed, resampled_len / FRAME);
        assert_eq!(diag.discarded_samples, resampled_len % FRAME);
    }

    #[test]
    fn run_stops_on_signal_and_closes_channel() {
        let (tx, source) = channel_source(16_000);
        let mut h = harness(config(), loudness_model(), Box::new(source));
        tx.send(frames_of(&[0.5, 0.5])).unwrap();

        let signals = Arc::clone(&h.signals);
        let handle = thread::spawn(move || run(h.ctx));
        let start = recv_event_with_timeout(&mut h.events_rx, Duration::from_secs(1));
        assert!(start.is_speech_start());

        signals.request_stop();
        assert_eq!(handle.join().expect("worker panicked"), WorkerExit::Stopped);

        assert!(h.events_rx.try_recv().map(|e| e.is_speech_end()).unwrap_or(false));
        assert!(matches!(
            h.events_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
        // stop leaves status to the controller
        assert_eq!(h.status.get(), SessionStatus::Running);
        drop(tx);
    }

    #[test]
    fn pause_holds_remainder_and_resume_continues() {
        let (tx, source) = channel_source(16_000);
        let mut h = harness(config(), loudness_model(), Box::new(source));
        let signals = Arc::clone(&h.signals);
        let handle = thread::spawn(move || run(h.ctx));

        // Half a loud frame, then pause.
        tx.send(vec![0.5; FRAME / 2]).unwrap();
        thread::sleep(Duration::from_millis(60));
        signals.set_paused(true);
        thread::sleep(Duration::from_millis(60));

        // Completes frame 0 and adds frame 1; nothing advances while paused.
        tx.send(vec![0.5; FRAME / 2 + FRAME]).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(matches!(h.events_rx.try_recv(), Err(TryRecvError::Empty)));

        signals.set_paused(false);
        let start = recv_event_with_timeout(&mut h.events_rx, Duration::from_secs(1));
        assert_eq!(
            start,
            VadEvent::SpeechStart {
                start_index: 0,
                confirmed_index: 1
            }
        );

        signals.request_stop();
        handle.join().expect("worker panicked");
        drop(tx);
    }

    #[test]
    fn end_utterance_on_pause_flushes() {
        let mut cfg = config();
        cfg.end_utterance_on_pause = true;
        let (tx, source) = channel_source(16_000);
        let mut h = harness(cfg, loudness_model(), Box::new(source));
        let signals = Arc::clone(&h.signals);
        let handle = thread::spawn(move || run(h.ctx));

        tx.send(frames_of(&[0.5, 0.5])).unwrap();
        assert!(recv_event_with_timeout(&mut h.events_rx, Duration::from_secs(1)).is_speech_start());
        signals.set_paused(true);
        assert!(recv_event_with_timeout(&mut h.events_rx, Duration::from_secs(1)).is_speech_end());

        signals.request_stop();
        handle.join().expect("worker panicked");
        assert!(matches!(
            h.events_rx.try_recv(),
            Err(TryRecvError::Disconnected)
        ));
        drop(tx);
    }

    #[test]
    fn source_rate_is_converted_before_framing() {
        let (tx, source) = channel_source(48_000);
        let h = harness(config(), loudness_model(), Box::new(source));
        tx.send(vec![0.0; 48_000]).unwrap();
        drop(tx);

        let diagnostics = Arc::clone(&h.diagnostics);
        thread::spawn(move || run(h.ctx)).join().expect("worker panicked");
        let frames = diagnostics.snapshot().frames_processed;
        // ~16 000 output samples / 160
        assert!((90..=100).contains(&frames), "frames={frames}");
    }
}

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use micvad_core::audio::wav::write_wav_i16;
use micvad_core::features::RMS;
use micvad_core::{
    channel_source, FeatureVector, FnClassifier, ModelHandle, SessionConfig, SessionController,
    SessionStatus, VadError, VadEvent, WavSource,
};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

const FRAME: usize = 256;
const RATE: u32 = 16_000;

fn config() -> SessionConfig {
    SessionConfig {
        positive_speech_threshold: 0.5,
        negative_speech_threshold: 0.3,
        min_speech_frames: 2,
        min_silence_frames: 3,
        frame_size: FRAME,
        sample_rate: RATE,
        pre_speech_pad_frames: 0,
        ..SessionConfig::default()
    }
}

fn loudness_model() -> ModelHandle {
    ModelHandle::new(FnClassifier::new("loudness", |f: &FeatureVector| {
        if f.get(RMS) > 0.05 {
            0.9
        } else {
            0.0
        }
    }))
}

fn tone(frames: usize, amplitude: f32) -> Vec<f32> {
    (0..frames * FRAME)
        .map(|i| amplitude * (2.0 * PI * 1_000.0 * i as f32 / RATE as f32).sin())
        .collect()
}

fn silence(frames: usize) -> Vec<f32> {
    vec![0.0; frames * FRAME]
}

fn recv_event_with_timeout(rx: &mut UnboundedReceiver<VadEvent>, timeout: Duration) -> VadEvent {
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

fn drain_until_closed(rx: &mut UnboundedReceiver<VadEvent>, timeout: Duration) -> Vec<VadEvent> {
    let start = Instant::now();
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => events.push(ev),
            Err(TryRecvError::Disconnected) => return events,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("event channel never closed; got {events:?}");
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

#[test]
fn stop_flushes_open_utterance_and_closes_channel() {
    let controller = SessionController::new();
    let (tx, source) = channel_source(RATE);
    let mut events = controller
        .start(config(), loudness_model(), Box::new(source))
        .unwrap();

    tx.send(tone(4, 0.5)).unwrap();
    let start = recv_event_with_timeout(&mut events, Duration::from_secs(2));
    assert_eq!(
        start,
        VadEvent::SpeechStart {
            start_index: 0,
            confirmed_index: 1
        }
    );

    controller.stop();
    assert_eq!(controller.status(), SessionStatus::Stopped);

    // Audio sent after stop never turns into events.
    let _ = tx.send(tone(4, 0.5));

    let rest = drain_until_closed(&mut events, Duration::from_millis(200));
    assert_eq!(rest.len(), 1, "{rest:?}");
    match &rest[0] {
        VadEvent::SpeechEnd {
            start_index,
            end_index,
            ..
        } => {
            assert_eq!(*start_index, 0);
            assert!(*end_index >= 1 && *end_index <= 3);
        }
        other => panic!("expected flush SpeechEnd, got {other:?}"),
    }
}


#[test]
fn concurrent_stop_waits_for_the_worker() {
    let in_classifier = Arc::new(AtomicBool::new(false));
    let entered = Arc::clone(&in_classifier);
    let slow = ModelHandle::new(FnClassifier::new("slow", move |f: &FeatureVector| {
        if f.get(RMS) > 0.05 {
            entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            0.9
        } else {
            0.0
        }
    }));

    let controller = Arc::new(SessionController::new());
    let (tx, source) = channel_source(RATE);
    let mut cfg = config();
    cfg.min_speech_frames = 1;
    let mut events = controller.start(cfg, slow, Box::new(source)).unwrap();

    tx.send(tone(1, 0.5)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while !in_classifier.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "classifier never ran");
        thread::sleep(Duration::from_millis(2));
    }

    let first = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.stop())
    };
    thread::sleep(Duration::from_millis(10));
    controller.stop();

    // Everything the worker sent is already queued and the channel is closed.
    let mut delivered = Vec::new();
    let closed = loop {
        match events.try_recv() {
            Ok(ev) => delivered.push(ev),
            Err(e) => break e,
        }
    };
    assert_eq!(closed, TryRecvError::Disconnected, "{delivered:?}");
    assert_eq!(controller.status(), SessionStatus::Stopped);
    first.join().expect("stop thread panicked");
    drop(tx);
}

#[test]
fn second_start_fails_and_first_session_keeps_running() {
    let controller = SessionController::new();
    let (tx, source) = channel_source(RATE);
    let mut events = controller
        .start(config(), loudness_model(), Box::new(source))
        .unwrap();

    let (_tx2, source2) = channel_source(RATE);
    let err = controller
        .start(config(), loudness_model(), Box::new(source2))
        .unwrap_err();
    assert!(matches!(err, VadError::AlreadyRunning));
    assert_eq!(controller.status(), SessionStatus::Running);

    tx.send(tone(2, 0.5)).unwrap();
    assert!(recv_event_with_timeout(&mut events, Duration::from_secs(2)).is_speech_start());
    controller.stop();
}

#[test]
fn end_of_stream_flushes_and_finishes() {
    let controller = SessionController::new();
    let (tx, source) = channel_source(RATE);
    let mut events = controller
        .start(config(), loudness_model(), Box::new(source))
        .unwrap();

    tx.send(silence(2)).unwrap();
    tx.send(tone(3, 0.5)).unwrap();
    // Half a frame that never completes.
    tx.send(vec![0.5; FRAME / 2]).unwrap();
    drop(tx);

    let all = drain_until_closed(&mut events, Duration::from_secs(2));
    assert_eq!(all.len(), 2, "{all:?}");
    assert_eq!(
        all[0],
        VadEvent::SpeechStart {
            start_index: 2,
            confirmed_index: 3
        }
    );
    match &all[1] {
        VadEvent::SpeechEnd {
            start_index,
            end_index,
            audio,
            ..
        } => {
            assert_eq!((*start_index, *end_index), (2, 4));
            assert_eq!(audio.len(), 3 * FRAME);
        }
        other => panic!("expected SpeechEnd, got {other:?}"),
    }

    assert_eq!(controller.status(), SessionStatus::Finished);
    assert_eq!(controller.diagnostics_snapshot().discarded_samples, FRAME / 2);

    // The finished session still holds the controller until stopped.
    let (_tx, source) = channel_source(RATE);
    assert!(matches!(
        controller.start(config(), loudness_model(), Box::new(source)),
        Err(VadError::AlreadyRunning)
    ));
    controller.stop();

    let (_tx, source) = channel_source(RATE);
    let _events = controller
        .start(config(), loudness_model(), Box::new(source))
        .expect("restart after stop");
    controller.stop();
}

#[test]
fn utterance_confirmed_by_silence() {
    let controller = SessionController::new();
    let (tx, source) = channel_source(RATE);
    let mut events = controller
        .start(config(), loudness_model(), Box::new(source))
        .unwrap();

    let mut audio = tone(3, 0.5);
    audio.extend(silence(5));
    tx.send(audio).unwrap();

    assert!(recv_event_with_timeout(&mut events, Duration::from_secs(2)).is_speech_start());
    match recv_event_with_timeout(&mut events, Duration::from_secs(2)) {
        VadEvent::SpeechEnd {
            start_index,
            end_index,
            sample_rate,
            audio,
            ..
        } => {
            assert_eq!((start_index, end_index), (0, 5));
            assert_eq!(sample_rate, RATE);
            assert_eq!(audio.len(), 6 * FRAME);
        }
        other => panic!("expected SpeechEnd, got {other:?}"),
    }

    controller.stop();
    assert!(drain_until_closed(&mut events, Duration::from_millis(200)).is_empty());
    drop(tx);
}

#[test]
fn paused_session_emits_nothing_until_resumed() {
    let controller = SessionController::new();
    let (tx, source) = channel_source(RATE);
    let mut events = controller
        .start(config(), loudness_model(), Box::new(source))
        .unwrap();

    controller.pause().unwrap();
    assert_eq!(controller.status(), SessionStatus::Paused);
    tx.send(tone(3, 0.5)).unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    controller.resume().unwrap();
    assert!(recv_event_with_timeout(&mut events, Duration::from_secs(2)).is_speech_start());
    controller.stop();
}

#[test]
fn first_speech_start_latency_under_500ms() {
    let controller = SessionController::new();
    let (tx, source) = channel_source(RATE);
    let mut events = controller
        .start(config(), loudness_model(), Box::new(source))
        .unwrap();

    let start = Instant::now();
    tx.send(tone(2, 0.5)).unwrap();
    let first = recv_event_with_timeout(&mut events, Duration::from_secs(2));
    let elapsed = start.elapsed();
    controller.stop();

    assert!(first.is_speech_start());
    assert!(
        elapsed < Duration::from_millis(500),
        "speech start latency too high: {:?} (target < 500ms)",
        elapsed
    );
}

#[test]
fn wav_file_session_with_default_classifier() {
    let path = std::env::temp_dir().join(format!("micvad-session-{}.wav", std::process::id()));
    // 48 kHz file: the session resamples to 16 kHz.
    let at_48k = |frames: usize, amplitude: f32| -> Vec<f32> {
        (0..frames * FRAME * 3)
            .map(|i| amplitude * (2.0 * PI * 1_000.0 * i as f32 / 48_000.0).sin())
            .collect()
    };
    let mut audio = at_48k(10, 0.0);
    audio.extend(at_48k(20, 0.5));
    audio.extend(at_48k(20, 0.0));
    write_wav_i16(&path, &audio, 48_000).unwrap();

    let source = WavSource::open(&path).unwrap();
    let controller = SessionController::new();
    let mut cfg = config();
    cfg.min_speech_frames = 3;
    cfg.min_silence_frames = 5;
    let mut events = controller
        .start(cfg, ModelHandle::default(), Box::new(source))
        .unwrap();

    let all = drain_until_closed(&mut events, Duration::from_secs(5));
    let _ = std::fs::remove_file(&path);
    controller.stop();

    let starts: Vec<&VadEvent> = all.iter().filter(|e| e.is_speech_start()).collect();
    let ends: Vec<&VadEvent> = all.iter().filter(|e| e.is_speech_end()).collect();
    assert_eq!(starts.len(), 1, "{all:?}");
    assert_eq!(ends.len(), 1, "{all:?}");
    match starts[0] {
        VadEvent::SpeechStart { start_index, .. } => {
            assert!((9..=11).contains(start_index), "start_index={start_index}")
        }
        _ => unreachable!(),
    }
    match ends[0] {
        VadEvent::SpeechEnd { end_index, .. } => {
            assert!((33..=37).contains(end_index), "end_index={end_index}")
        }
        _ => unreachable!(),
    }
}

mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::Duration,
};

use common::{FRAME_HEIGHT, FRAME_WIDTH, FakeLoader, Rig, session_with, sources, wait_for};
use gesture_arcade::{
    error::{SessionError, VisionError},
    pipeline::{CameraConstraints, Overlay, VisionAdapter},
    session::{RecognitionSession, SessionState},
    types::{GestureLabel, Handedness},
};

const PATIENCE: Duration = Duration::from_secs(3);

#[test]
fn concurrent_initialize_loads_the_model_once() {
    let loader = Arc::new(FakeLoader {
        delay: Duration::from_millis(100),
        ..FakeLoader::default()
    });
    let session = session_with(Arc::clone(&loader));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                session.initialize()?;
                session.wait_until_ready(PATIENCE)
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap().unwrap();
    }

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.adapter().load_attempts(), 1);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    session.initialize().unwrap();
    assert_eq!(session.adapter().load_attempts(), 1);
}

#[test]
fn falls_back_when_the_primary_source_fails() {
    let loader = Arc::new(FakeLoader {
        fail_primary: true,
        ..FakeLoader::default()
    });
    let session = session_with(Arc::clone(&loader));
    session.initialize().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_initialization_blocks_recognition() {
    let session = session_with(Arc::new(FakeLoader {
        fail_primary: true,
        fail_fallback: true,
        ..FakeLoader::default()
    }));

    let err = session.initialize().unwrap_err();
    assert!(matches!(err, SessionError::Vision(VisionError::LoadFailed { .. })));
    assert!(matches!(session.state(), SessionState::Error(_)));
    assert!(session.error().unwrap().contains("could not be loaded"));

    let started = session.start_recognition(Default::default(), Overlay::new());
    assert!(matches!(started, Err(SessionError::NotReady(_))));
    assert_eq!(session.classify_calls(), 0);
}

#[test]
fn slow_model_load_times_out() {
    let loader = Arc::new(FakeLoader {
        delay: Duration::from_millis(300),
        ..FakeLoader::default()
    });
    let adapter = VisionAdapter::new(loader, sources()).with_init_timeout(Duration::from_millis(30));
    let session = RecognitionSession::new(Arc::new(adapter));

    let err = session.initialize().unwrap_err();
    assert!(matches!(err, SessionError::Vision(VisionError::Timeout(_))));
    assert!(session.error().unwrap().contains("timed out"));
}

#[test]
fn start_before_initialize_reports_not_ready() {
    let rig = Rig::new();
    let result = rig
        .session
        .start_recognition(Default::default(), Overlay::new());
    assert!(matches!(result, Err(SessionError::NotReady(_))));
    assert!(rig.session.error().is_some());
    assert_eq!(rig.session.state(), SessionState::Uninitialized);
}

#[test]
fn recognition_publishes_the_translated_gesture() {
    let rig = Rig::new();
    let stream = rig.provider.acquire(&CameraConstraints::default()).unwrap();
    let overlay = Overlay::new();
    rig.session.initialize().unwrap();
    rig.session
        .start_recognition(stream.feed().clone(), overlay.clone())
        .unwrap();
    assert_eq!(rig.session.state(), SessionState::Recognizing);

    rig.script.show(GestureLabel::OpenPalm, 0.92);
    assert!(wait_for(PATIENCE, || rig.session.current_gesture().is_some()));
    let signal = rig.session.current_gesture().unwrap();
    assert_eq!(signal.label, GestureLabel::OpenPalm);
    assert_eq!(signal.display_name, "Palma Abierta");
    assert_eq!(signal.confidence, 92);
    assert_eq!(signal.handedness, Handedness::Right);

    let canvas = overlay.snapshot();
    assert_eq!((canvas.width, canvas.height), (FRAME_WIDTH, FRAME_HEIGHT));
    assert!(!canvas.is_blank());

    rig.script.hide();
    assert!(wait_for(PATIENCE, || rig.session.current_gesture().is_none()));

    rig.session.stop_recognition();
    stream.release();
}

#[test]
fn stop_halts_classification_before_returning() {
    let rig = Rig::new();
    let stream = rig.provider.acquire(&CameraConstraints::default()).unwrap();
    let overlay = Overlay::new();
    rig.session.initialize().unwrap();
    rig.session
        .start_recognition(stream.feed().clone(), overlay.clone())
        .unwrap();
    rig.script.show(GestureLabel::Victory, 0.8);
    assert!(wait_for(PATIENCE, || rig.session.classify_calls() > 3));

    rig.session.stop_recognition();
    let calls = rig.session.classify_calls();
    assert_eq!(rig.session.state(), SessionState::Ready);
    assert_eq!(rig.session.current_gesture(), None);
    assert!(overlay.snapshot().is_blank());

    // the camera keeps producing frames, none of them may be classified
    thread::sleep(Duration::from_millis(60));
    assert_eq!(rig.session.classify_calls(), calls);

    // stopping twice is harmless, and recognition can start again
    rig.session.stop_recognition();
    rig.session
        .start_recognition(stream.feed().clone(), overlay)
        .unwrap();
    assert!(wait_for(PATIENCE, || rig.session.classify_calls() > calls));
    rig.session.stop_recognition();
}

#[test]
fn frames_without_dimensions_are_skipped() {
    let rig = Rig::new();
    rig.camera.zero_sized(true);
    let stream = rig.provider.acquire(&CameraConstraints::default()).unwrap();
    rig.session.initialize().unwrap();
    rig.session
        .start_recognition(stream.feed().clone(), Overlay::new())
        .unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.session.classify_calls(), 0);
    assert_eq!(rig.session.state(), SessionState::Recognizing);
    rig.session.stop_recognition();
}

#[test]
fn fatal_model_error_ends_the_loop_and_cleanup_recovers() {
    let rig = Rig::new();
    let stream = rig.provider.acquire(&CameraConstraints::default()).unwrap();
    rig.session.initialize().unwrap();
    rig.session
        .start_recognition(stream.feed().clone(), Overlay::new())
        .unwrap();

    rig.script.fail_fatally("inference device lost");
    assert!(wait_for(PATIENCE, || matches!(
        rig.session.state(),
        SessionState::Error(_)
    )));
    assert!(rig.session.error().unwrap().contains("inference device lost"));
    assert_eq!(rig.session.current_gesture(), None);

    rig.session.force_cleanup();
    assert_eq!(rig.session.state(), SessionState::Uninitialized);
    assert_eq!(rig.session.error(), None);

    rig.script.recover();
    rig.session.initialize().unwrap();
    assert_eq!(rig.session.adapter().load_attempts(), 2);
    rig.session
        .start_recognition(stream.feed().clone(), Overlay::new())
        .unwrap();
    assert_eq!(rig.session.state(), SessionState::Recognizing);
    rig.session.stop_recognition();
}

#[test]
fn initialize_after_a_fatal_error_loads_a_fresh_model() {
    let rig = Rig::new();
    let stream = rig.provider.acquire(&CameraConstraints::default()).unwrap();
    rig.session.initialize().unwrap();
    rig.session
        .start_recognition(stream.feed().clone(), Overlay::new())
        .unwrap();

    rig.script.fail_fatally("tensor arena corrupted");
    assert!(wait_for(PATIENCE, || matches!(
        rig.session.state(),
        SessionState::Error(_)
    )));

    rig.script.recover();
    rig.session.initialize().unwrap();
    assert_eq!(rig.session.adapter().load_attempts(), 2);
    assert_eq!(rig.session.state(), SessionState::Ready);
    assert_eq!(rig.session.error(), None);
}

//! The recognition session: owns the vision adapter and runs the
//! capture → classify → publish loop against a video feed.
//!
//! State flow: `Uninitialized → Initializing → Ready ⇄ Recognizing`, with
//! `Error` reachable from initialization and from the loop. `force_cleanup`
//! always returns the session to `Uninitialized`.

use std::{
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};

use crate::{
    error::{SessionError, VisionError},
    lock,
    pipeline::{
        recognizer::VisionAdapter,
        video::{Overlay, VideoFeed},
    },
    types::GestureSignal,
};

/// One display refresh at 60 Hz.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Recognizing,
    Error(String),
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    state_changed: Condvar,
    signal: Mutex<Option<GestureSignal>>,
    error: Mutex<Option<String>>,
    classify_calls: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: SessionState) {
        *lock(&self.state) = next;
        self.state_changed.notify_all();
    }

    fn fail(&self, message: String) {
        *lock(&self.signal) = None;
        *lock(&self.error) = Some(message.clone());
        self.set_state(SessionState::Error(message));
    }
}

struct LoopHandle {
    cancel: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl LoopHandle {
    /// Disconnects the cancel channel and waits for the loop to exit.
    fn cancel(self) {
        drop(self.cancel);
        if self.thread.join().is_err() {
            log::error!("gesture recognition loop panicked");
        }
    }
}

pub struct RecognitionSession {
    adapter: Arc<VisionAdapter>,
    shared: Arc<Shared>,
    worker: Mutex<Option<LoopHandle>>,
    tick_interval: Duration,
}

impl RecognitionSession {
    pub fn new(adapter: Arc<VisionAdapter>) -> Self {
        Self {
            adapter,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::Uninitialized),
                state_changed: Condvar::new(),
                signal: Mutex::new(None),
                error: Mutex::new(None),
                classify_calls: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn adapter(&self) -> &Arc<VisionAdapter> {
        &self.adapter
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.state).clone()
    }

    pub fn current_gesture(&self) -> Option<GestureSignal> {
        lock(&self.shared.signal).clone()
    }

    /// Latest user-facing error; cleared by a successful initialize.
    pub fn error(&self) -> Option<String> {
        lock(&self.shared.error).clone()
    }

    /// Total frames handed to the adapter since construction.
    pub fn classify_calls(&self) -> u64 {
        self.shared.classify_calls.load(Ordering::SeqCst)
    }

    /// Loads the model. A call made while initializing or after the model
    /// is ready returns immediately. After a failure the old model is
    /// discarded and loaded again.
    pub fn initialize(&self) -> Result<(), SessionError> {
        let recovering = {
            let mut state = lock(&self.shared.state);
            let recovering = match *state {
                SessionState::Initializing | SessionState::Ready | SessionState::Recognizing => {
                    return Ok(());
                }
                SessionState::Uninitialized => false,
                SessionState::Error(_) => true,
            };
            *state = SessionState::Initializing;
            recovering
        };
        self.shared.state_changed.notify_all();

        if recovering {
            // the failed loop has exited on its own; reap it before reloading
            if let Some(stale) = lock(&self.worker).take() {
                stale.cancel();
            }
            self.adapter.close();
        }
        log::info!("initializing recognition session");

        match self.adapter.initialize() {
            Ok(()) => {
                *lock(&self.shared.error) = None;
                self.shared.set_state(SessionState::Ready);
                log::info!("recognition session ready");
                Ok(())
            }
            Err(err) => {
                log::error!("recognition session failed to initialize: {err}");
                self.shared.fail(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Waits out an initialization running on another thread.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<(), SessionError> {
        let state = lock(&self.shared.state);
        let (state, _) = self
            .shared
            .state_changed
            .wait_timeout_while(state, timeout, |state| {
                *state == SessionState::Initializing
            })
            .unwrap_or_else(PoisonError::into_inner);

        match &*state {
            SessionState::Ready | SessionState::Recognizing => Ok(()),
            SessionState::Error(message) => Err(SessionError::NotReady(message.clone())),
            SessionState::Initializing => Err(SessionError::Vision(VisionError::Timeout(timeout))),
            SessionState::Uninitialized => Err(SessionError::NotReady(
                "gesture model is not initialized".into(),
            )),
        }
    }

    /// Starts the capture loop. Requires `Ready`; otherwise the error
    /// message is set and nothing runs.
    pub fn start_recognition(&self, feed: VideoFeed, overlay: Overlay) -> Result<(), SessionError> {
        let mut worker = lock(&self.worker);
        {
            let mut state = lock(&self.shared.state);
            if *state != SessionState::Ready {
                let message = match &*state {
                    SessionState::Recognizing => "gesture recognition is already running",
                    _ => "gesture model is not initialized",
                };
                drop(state);
                log::warn!("cannot start recognition: {message}");
                *lock(&self.shared.error) = Some(message.to_string());
                return Err(SessionError::NotReady(message.to_string()));
            }
            *state = SessionState::Recognizing;
        }
        self.shared.state_changed.notify_all();

        // A loop that ended on its own (fatal model error) is joined here.
        if let Some(stale) = worker.take() {
            stale.cancel();
        }

        let (cancel_tx, cancel_rx) = bounded(0);
        let capture = CaptureLoop {
            adapter: Arc::clone(&self.adapter),
            shared: Arc::clone(&self.shared),
            feed,
            overlay,
            tick_interval: self.tick_interval,
        };
        let spawned = thread::Builder::new()
            .name("gesture-recognition".into())
            .spawn(move || capture.run(cancel_rx));

        match spawned {
            Ok(thread) => {
                *worker = Some(LoopHandle {
                    cancel: cancel_tx,
                    thread,
                });
                log::info!("gesture recognition started");
                Ok(())
            }
            Err(err) => {
                self.shared.set_state(SessionState::Ready);
                Err(SessionError::Spawn(err))
            }
        }
    }

    /// Stops the loop and clears the published gesture. When this returns
    /// the loop thread has exited, so no further classification happens.
    pub fn stop_recognition(&self) {
        let mut worker = lock(&self.worker);
        let was_running = worker.is_some();
        if let Some(handle) = worker.take() {
            handle.cancel();
        }

        {
            let mut state = lock(&self.shared.state);
            if *state == SessionState::Recognizing {
                *state = SessionState::Ready;
            }
        }
        self.shared.state_changed.notify_all();
        *lock(&self.shared.signal) = None;

        if was_running {
            log::info!("gesture recognition stopped");
        }
    }

    /// Stops recognition, closes the model and returns to `Uninitialized`
    /// with the error cleared.
    pub fn force_cleanup(&self) {
        self.stop_recognition();
        self.adapter.close();
        *lock(&self.shared.error) = None;
        self.shared.set_state(SessionState::Uninitialized);
        log::info!("recognition session reset");
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        self.stop_recognition();
    }
}

struct CaptureLoop {
    adapter: Arc<VisionAdapter>,
    shared: Arc<Shared>,
    feed: VideoFeed,
    overlay: Overlay,
    tick_interval: Duration,
}

impl CaptureLoop {
    fn run(self, cancel: Receiver<()>) {
        let ticker = tick(self.tick_interval);
        let started = Instant::now();
        let mut last_presentation = 0;

        loop {
            select! {
                recv(cancel) -> _ => break,
                recv(ticker) -> _ => {}
            }

            if *lock(&self.shared.state) != SessionState::Recognizing {
                break;
            }

            if let Err(err) = self.step(&mut last_presentation, started) {
                log::error!("gesture recognition stopped on model failure: {err}");
                self.shared.fail(err.to_string());
                break;
            }
        }

        self.overlay.clear();
    }

    /// Processes the newest frame if there is one we have not seen. Frames
    /// without decoded dimensions are left for a later tick.
    fn step(&self, last_presentation: &mut u64, started: Instant) -> Result<(), VisionError> {
        let Some(sample) = self.feed.latest() else {
            return Ok(());
        };
        if sample.presentation == *last_presentation {
            return Ok(());
        }
        let frame = &sample.frame;
        if frame.width == 0 || frame.height == 0 {
            return Ok(());
        }
        *last_presentation = sample.presentation;

        self.overlay.resize(frame.width, frame.height);
        self.shared.classify_calls.fetch_add(1, Ordering::SeqCst);
        let timestamp_ms = started.elapsed().as_millis() as u64;
        let detections = self.adapter.classify(frame, timestamp_ms)?;

        self.overlay.draw_hands(&detections.hands);
        let signal = detections
            .primary()
            .map(|(hand, score)| GestureSignal::from_detection(hand, score));
        *lock(&self.shared.signal) = signal;
        Ok(())
    }
}

//! Gesture consumers: the mutually exclusive modes that drive the shared
//! recognition session, and the hub that switches between them.

pub mod overlay;
pub mod rps;
pub mod simon;

use std::{sync::Arc, time::Duration, time::Instant};

use crate::{
    error::ConsumerError,
    pipeline::{
        camera::{CameraConstraints, CameraProvider, CameraSlot},
        video::Overlay,
    },
    session::{RecognitionSession, SessionState},
    types::GestureSignal,
};

pub use self::{
    overlay::OverlayConsumer,
    rps::{RpsConsumer, RpsGame},
    simon::{SimonConsumer, SimonGame},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumerKind {
    Overlay,
    RockPaperScissors,
    SimonSays,
}

impl ConsumerKind {
    pub const ALL: [ConsumerKind; 3] = [
        ConsumerKind::Overlay,
        ConsumerKind::RockPaperScissors,
        ConsumerKind::SimonSays,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ConsumerKind::Overlay => "overlay",
            ConsumerKind::RockPaperScissors => "rock-paper-scissors",
            ConsumerKind::SimonSays => "simon-says",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LinkSettings {
    pub constraints: CameraConstraints,
    /// How long to wait for decoded frames before starting anyway.
    pub video_ready_timeout: Duration,
    /// How long to wait for an initialization started elsewhere.
    pub init_wait: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            constraints: CameraConstraints::default(),
            video_ready_timeout: Duration::from_secs(3),
            init_wait: Duration::from_secs(30),
        }
    }
}

/// Couples one consumer's camera stream with the shared recognition
/// session. Opening goes camera → model → video ready → recognition;
/// closing stops recognition before the camera is released.
pub struct LiveLink {
    session: Arc<RecognitionSession>,
    camera: CameraSlot,
    overlay: Overlay,
    settings: LinkSettings,
    recognizing: bool,
    error: Option<String>,
}

impl LiveLink {
    pub fn new(
        session: Arc<RecognitionSession>,
        provider: Arc<CameraProvider>,
        settings: LinkSettings,
    ) -> Self {
        Self {
            session,
            camera: CameraSlot::new(provider),
            overlay: Overlay::new(),
            settings,
            recognizing: false,
            error: None,
        }
    }

    /// Opens the link; a link that is already live is left as is.
    pub fn open(&mut self) -> Result<(), ConsumerError> {
        if self.is_live() {
            return Ok(());
        }
        match self.try_open() {
            Ok(()) => {
                self.error = None;
                Ok(())
            }
            Err(err) => {
                log::error!("failed to start gesture feed: {err}");
                self.error = Some(err.to_string());
                self.close();
                Err(err)
            }
        }
    }

    fn try_open(&mut self) -> Result<(), ConsumerError> {
        let feed = self.camera.acquire(&self.settings.constraints)?;
        self.session.initialize()?;
        self.session.wait_until_ready(self.settings.init_wait)?;

        if feed
            .wait_for_dimensions(self.settings.video_ready_timeout)
            .is_none()
        {
            log::warn!(
                "video not ready after {:?}, recognition will poll for frames",
                self.settings.video_ready_timeout
            );
        }

        self.session.start_recognition(feed, self.overlay.clone())?;
        self.recognizing = true;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.recognizing {
            self.session.stop_recognition();
            self.recognizing = false;
        }
        self.camera.release();
    }

    /// Tears everything down and opens again from scratch.
    pub fn retry(&mut self) -> Result<(), ConsumerError> {
        self.close();
        if matches!(self.session.state(), SessionState::Error(_)) {
            self.session.force_cleanup();
        }
        self.open()
    }

    pub fn is_live(&self) -> bool {
        self.recognizing
            && self.camera.is_active()
            && self.session.state() == SessionState::Recognizing
    }

    pub fn holds_camera(&self) -> bool {
        self.camera.is_active()
    }

    pub fn current_gesture(&self) -> Option<GestureSignal> {
        if self.recognizing {
            self.session.current_gesture()
        } else {
            None
        }
    }

    /// Camera or initialization error, else a failure raised by the loop.
    pub fn error(&self) -> Option<String> {
        self.error.clone().or_else(|| match self.session.state() {
            SessionState::Error(message) if self.recognizing => Some(message),
            _ => None,
        })
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn session(&self) -> &Arc<RecognitionSession> {
        &self.session
    }
}

pub trait GestureConsumer: Send {
    fn kind(&self) -> ConsumerKind;

    fn link(&self) -> &LiveLink;

    fn activate(&mut self, now: Instant) -> Result<(), ConsumerError>;

    /// Stops recognition and releases the camera; a no-op when inactive.
    fn deactivate(&mut self);

    /// Feeds the latest gesture into the consumer and advances its timers.
    fn update(&mut self, now: Instant);

    fn retry(&mut self, now: Instant) -> Result<(), ConsumerError>;

    fn status_line(&self) -> String;

    /// "New game" / "play again"; ignored by consumers without rounds.
    fn new_round(&mut self, _now: Instant) {}

    fn reset_stats(&mut self) {}

    fn is_live(&self) -> bool {
        self.link().is_live()
    }

    fn error(&self) -> Option<String> {
        self.link().error()
    }
}

/// Owns the consumers and guarantees at most one of them holds the camera
/// and the running session.
pub struct ConsumerHub {
    consumers: Vec<Box<dyn GestureConsumer>>,
    active: Option<ConsumerKind>,
}

impl ConsumerHub {
    pub fn new(consumers: Vec<Box<dyn GestureConsumer>>) -> Self {
        Self {
            consumers,
            active: None,
        }
    }

    /// Overlay, rock-paper-scissors and Simon-Says over one session.
    pub fn standard(
        session: Arc<RecognitionSession>,
        provider: Arc<CameraProvider>,
        settings: LinkSettings,
        rps_tuning: rps::RpsTuning,
        simon_tuning: simon::SimonTuning,
    ) -> Self {
        let link = || LiveLink::new(Arc::clone(&session), Arc::clone(&provider), settings);
        let consumers: Vec<Box<dyn GestureConsumer>> = vec![
            Box::new(OverlayConsumer::new(link())),
            Box::new(RpsConsumer::new(link(), rps_tuning)),
            Box::new(SimonConsumer::new(link(), simon_tuning)),
        ];
        Self::new(consumers)
    }

    pub fn active(&self) -> Option<ConsumerKind> {
        self.active
    }

    /// Deactivates every other consumer, waiting for each teardown, before
    /// the requested one acquires the camera.
    pub fn activate(&mut self, kind: ConsumerKind, now: Instant) -> Result<(), ConsumerError> {
        if self.active == Some(kind) {
            return Ok(());
        }
        if !self.consumers.iter().any(|c| c.kind() == kind) {
            return Err(ConsumerError::NotRegistered(kind));
        }

        for consumer in self.consumers.iter_mut().filter(|c| c.kind() != kind) {
            consumer.deactivate();
        }
        self.active = None;

        log::info!("activating {} consumer", kind.label());
        let target = self
            .consumer_mut(kind)
            .ok_or(ConsumerError::NotRegistered(kind))?;
        target.activate(now)?;
        self.active = Some(kind);
        Ok(())
    }

    pub fn deactivate_all(&mut self) {
        for consumer in &mut self.consumers {
            consumer.deactivate();
        }
        self.active = None;
    }

    pub fn update(&mut self, now: Instant) {
        if let Some(consumer) = self.active_consumer_mut() {
            consumer.update(now);
        }
    }

    /// Retries the active consumer, or the last one that failed to activate.
    pub fn retry(&mut self, kind: ConsumerKind, now: Instant) -> Result<(), ConsumerError> {
        for consumer in self.consumers.iter_mut().filter(|c| c.kind() != kind) {
            consumer.deactivate();
        }
        let target = self
            .consumer_mut(kind)
            .ok_or(ConsumerError::NotRegistered(kind))?;
        let result = target.retry(now);
        self.active = result.is_ok().then_some(kind);
        result
    }

    pub fn consumer(&self, kind: ConsumerKind) -> Option<&dyn GestureConsumer> {
        self.consumers
            .iter()
            .find(|c| c.kind() == kind)
            .map(|c| c.as_ref())
    }

    pub fn consumer_mut(&mut self, kind: ConsumerKind) -> Option<&mut dyn GestureConsumer> {
        self.consumers
            .iter_mut()
            .find(|c| c.kind() == kind)
            .map(|c| c.as_mut() as &mut dyn GestureConsumer)
    }

    pub fn active_consumer_mut(&mut self) -> Option<&mut dyn GestureConsumer> {
        let kind = self.active?;
        self.consumer_mut(kind)
    }

    /// Consumers currently holding a camera stream.
    pub fn camera_holders(&self) -> usize {
        self.consumers
            .iter()
            .filter(|c| c.link().holds_camera())
            .count()
    }

    /// Consumers with a camera stream and a running session.
    pub fn live_count(&self) -> usize {
        self.consumers.iter().filter(|c| c.is_live()).count()
    }
}

impl Drop for ConsumerHub {
    fn drop(&mut self) {
        self.deactivate_all();
    }
}

use std::time::Instant;

use super::{ConsumerKind, GestureConsumer, LiveLink};
use crate::{error::ConsumerError, types::GestureSignal};

/// Passive consumer: shows whatever the session recognizes, with the hand
/// skeleton drawn on the link's overlay.
pub struct OverlayConsumer {
    link: LiveLink,
    latest: Option<GestureSignal>,
}

impl OverlayConsumer {
    pub fn new(link: LiveLink) -> Self {
        Self { link, latest: None }
    }

    pub fn latest(&self) -> Option<&GestureSignal> {
        self.latest.as_ref()
    }
}

impl GestureConsumer for OverlayConsumer {
    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Overlay
    }

    fn link(&self) -> &LiveLink {
        &self.link
    }

    fn activate(&mut self, _now: Instant) -> Result<(), ConsumerError> {
        self.latest = None;
        self.link.open()
    }

    fn deactivate(&mut self) {
        self.link.close();
        self.latest = None;
    }

    fn update(&mut self, _now: Instant) {
        self.latest = self.link.current_gesture();
    }

    fn retry(&mut self, _now: Instant) -> Result<(), ConsumerError> {
        self.latest = None;
        self.link.retry()
    }

    fn status_line(&self) -> String {
        if let Some(err) = self.link.error() {
            return format!("overlay: error: {err}");
        }
        match &self.latest {
            Some(signal) => format!("overlay: {}", signal.display_text()),
            None if self.link.is_live() => "overlay: no hand detected".to_string(),
            None => "overlay: inactive".to_string(),
        }
    }
}

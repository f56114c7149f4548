use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Duration,
};

use image::RgbaImage;

use super::skeleton;
use crate::{
    lock,
    types::{Frame, HandDetection},
};

/// Latest decoded camera frame, shared between the capture thread and the
/// recognition loop. Every published frame gets a new presentation number.
#[derive(Clone, Debug, Default)]
pub struct VideoFeed {
    inner: Arc<FeedInner>,
}

#[derive(Debug, Default)]
struct FeedInner {
    slot: Mutex<FeedSlot>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct FeedSlot {
    frame: Option<Arc<Frame>>,
    presentation: u64,
}

#[derive(Clone, Debug)]
pub struct VideoSample {
    pub presentation: u64,
    pub frame: Arc<Frame>,
}

impl VideoFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        {
            let mut slot = lock(&self.inner.slot);
            slot.presentation += 1;
            slot.frame = Some(Arc::new(frame));
        }
        self.inner.changed.notify_all();
    }

    pub fn latest(&self) -> Option<VideoSample> {
        let slot = lock(&self.inner.slot);
        slot.frame.as_ref().map(|frame| VideoSample {
            presentation: slot.presentation,
            frame: Arc::clone(frame),
        })
    }

    /// Blocks until a frame with non-zero dimensions is available.
    pub fn wait_for_dimensions(&self, timeout: Duration) -> Option<(u32, u32)> {
        let slot = lock(&self.inner.slot);
        let (slot, _) = self
            .inner
            .changed
            .wait_timeout_while(slot, timeout, |slot| valid_dimensions(slot).is_none())
            .unwrap_or_else(PoisonError::into_inner);
        valid_dimensions(&slot)
    }

    /// Drops the current frame; the feed reads as empty until the next publish.
    pub fn detach(&self) {
        lock(&self.inner.slot).frame = None;
        self.inner.changed.notify_all();
    }
}

fn valid_dimensions(slot: &FeedSlot) -> Option<(u32, u32)> {
    slot.frame
        .as_ref()
        .filter(|frame| frame.width > 0 && frame.height > 0)
        .map(|frame| (frame.width, frame.height))
}

/// Transparent RGBA canvas the recognition loop draws hand skeletons on.
#[derive(Clone, Debug, Default)]
pub struct Overlay {
    canvas: Arc<Mutex<OverlayCanvas>>,
}

#[derive(Clone, Debug, Default)]
pub struct OverlayCanvas {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl OverlayCanvas {
    pub fn is_blank(&self) -> bool {
        self.rgba.chunks_exact(4).all(|px| px[3] == 0)
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone())
    }
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut canvas = lock(&self.canvas);
        if canvas.width == width && canvas.height == height {
            return;
        }
        canvas.width = width;
        canvas.height = height;
        canvas.rgba = vec![0; (width as usize) * (height as usize) * 4];
    }

    pub fn clear(&self) {
        lock(&self.canvas).rgba.fill(0);
    }

    /// Replaces the canvas contents with the skeletons of `hands`.
    pub fn draw_hands(&self, hands: &[HandDetection]) {
        let mut canvas = lock(&self.canvas);
        canvas.rgba.fill(0);
        let (width, height) = (canvas.width, canvas.height);
        for hand in hands {
            skeleton::draw_skeleton(&mut canvas.rgba, width, height, &hand.landmarks);
        }
    }

    pub fn snapshot(&self) -> OverlayCanvas {
        lock(&self.canvas).clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Instant};

    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            rgba: vec![0; (width * height * 4) as usize],
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn publish_advances_presentation() {
        let feed = VideoFeed::new();
        assert!(feed.latest().is_none());
        feed.publish(frame(4, 4));
        feed.publish(frame(4, 4));
        assert_eq!(feed.latest().unwrap().presentation, 2);
        feed.detach();
        assert!(feed.latest().is_none());
        // detaching does not reset the counter
        feed.publish(frame(4, 4));
        assert_eq!(feed.latest().unwrap().presentation, 3);
    }

    #[test]
    fn zero_sized_frames_are_not_ready() {
        let feed = VideoFeed::new();
        feed.publish(frame(0, 0));
        assert_eq!(feed.wait_for_dimensions(Duration::from_millis(20)), None);
    }

    #[test]
    fn wait_for_dimensions_wakes_on_publish() {
        let feed = VideoFeed::new();
        let publisher = feed.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            publisher.publish(frame(8, 6));
        });
        assert_eq!(feed.wait_for_dimensions(Duration::from_secs(2)), Some((8, 6)));
        handle.join().unwrap();
    }

    #[test]
    fn overlay_draws_and_clears() {
        let overlay = Overlay::new();
        overlay.resize(64, 64);
        let hand = HandDetection {
            gestures: Vec::new(),
            handedness: crate::types::Handedness::Left,
            landmarks: (0..21).map(|i| (10.0 + i as f32, 20.0)).collect(),
        };
        overlay.draw_hands(&[hand]);
        assert!(!overlay.snapshot().is_blank());
        overlay.clear();
        assert!(overlay.snapshot().is_blank());
    }
}

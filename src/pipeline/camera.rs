use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use serde::Deserialize;

use super::video::VideoFeed;
use crate::{error::CameraError, lock};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    Sd480,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
}

impl Resolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Sd480 => (640, 480),
            Resolution::Hd720 => (1280, 720),
            Resolution::Hd1080 => (1920, 1080),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraConstraints {
    pub resolution: Resolution,
    pub facing: Facing,
    /// Explicit device index; overrides `facing`.
    pub device: Option<u32>,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hd720,
            facing: Facing::Front,
            device: None,
        }
    }
}

impl CameraConstraints {
    pub fn device_index(&self) -> u32 {
        self.device.unwrap_or(match self.facing {
            Facing::Front => 0,
            Facing::Back => 1,
        })
    }
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: u32,
    pub label: String,
}

/// Capture device capability: starts a capture that publishes into `feed`.
pub trait CaptureBackend: Send + Sync + 'static {
    fn start(
        &self,
        constraints: &CameraConstraints,
        feed: VideoFeed,
    ) -> Result<CaptureHandle, CameraError>;

    fn devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        Ok(Vec::new())
    }
}

/// A running capture. Stopping joins the capture thread, so no frame is
/// published after `stop` returns.
#[derive(Debug)]
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn new(stop: Arc<AtomicBool>, handle: thread::JoinHandle<()>) -> Self {
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// For backends that push frames without a thread of their own.
    pub fn idle() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Default)]
struct DeviceTracker {
    last_release: Mutex<Option<Instant>>,
    active: AtomicUsize,
}

/// Hands out camera streams for the one physical device. Enforces a settle
/// delay between a release and the next acquire because capture backends
/// do not free the device synchronously.
pub struct CameraProvider {
    backend: Arc<dyn CaptureBackend>,
    settle: Duration,
    tracker: Arc<DeviceTracker>,
}

impl CameraProvider {
    pub fn new(backend: Arc<dyn CaptureBackend>, settle: Duration) -> Self {
        Self {
            backend,
            settle,
            tracker: Arc::new(DeviceTracker::default()),
        }
    }

    pub fn acquire(&self, constraints: &CameraConstraints) -> Result<CameraStream, CameraError> {
        self.wait_for_settle();

        let feed = VideoFeed::new();
        let capture = self.backend.start(constraints, feed.clone())?;
        self.tracker.active.fetch_add(1, Ordering::SeqCst);
        let (width, height) = constraints.resolution.dimensions();
        log::info!(
            "camera {} acquired at {width}x{height}",
            constraints.device_index()
        );

        Ok(CameraStream {
            feed,
            capture: Some(capture),
            constraints: *constraints,
            tracker: Arc::clone(&self.tracker),
        })
    }

    /// Streams acquired and not yet released.
    pub fn active_streams(&self) -> usize {
        self.tracker.active.load(Ordering::SeqCst)
    }

    pub fn devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        self.backend.devices()
    }

    fn wait_for_settle(&self) {
        let released_at = *lock(&self.tracker.last_release);
        if let Some(released_at) = released_at {
            let remaining = self.settle.saturating_sub(released_at.elapsed());
            if !remaining.is_zero() {
                log::debug!("waiting {remaining:?} for the camera to settle");
                thread::sleep(remaining);
            }
        }
    }
}

/// A live camera stream. Dropping it releases the device.
pub struct CameraStream {
    feed: VideoFeed,
    capture: Option<CaptureHandle>,
    constraints: CameraConstraints,
    tracker: Arc<DeviceTracker>,
}

impl CameraStream {
    pub fn feed(&self) -> &VideoFeed {
        &self.feed
    }

    /// Stops capture and detaches the feed.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        capture.stop();
        self.feed.detach();
        *lock(&self.tracker.last_release) = Some(Instant::now());
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
        log::info!("camera {} released", self.constraints.device_index());
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The camera stream held by one consumer; at most one at a time.
pub struct CameraSlot {
    provider: Arc<CameraProvider>,
    stream: Option<CameraStream>,
    last_constraints: Option<CameraConstraints>,
}

impl CameraSlot {
    pub fn new(provider: Arc<CameraProvider>) -> Self {
        Self {
            provider,
            stream: None,
            last_constraints: None,
        }
    }

    pub fn acquire(&mut self, constraints: &CameraConstraints) -> Result<VideoFeed, CameraError> {
        if self.stream.is_some() {
            return Err(CameraError::AlreadyActive);
        }
        self.last_constraints = Some(*constraints);
        let stream = self.provider.acquire(constraints)?;
        let feed = stream.feed().clone();
        self.stream = Some(stream);
        Ok(feed)
    }

    /// Returns false when nothing was held.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                stream.release();
                true
            }
            None => false,
        }
    }

    /// Release followed by a fresh acquire with the previous constraints.
    pub fn restart(&mut self) -> Result<VideoFeed, CameraError> {
        let constraints = self.last_constraints.ok_or(CameraError::NotActive)?;
        self.release();
        self.acquire(&constraints)
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(feature = "camera-nokhwa")]
pub use self::native::NokhwaBackend;

#[cfg(feature = "camera-nokhwa")]
mod native {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Instant,
    };

    use anyhow::{Result, anyhow};
    use crossbeam_channel::bounded;
    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        query,
        utils::{
            ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
            RequestedFormatType, Resolution as NokhwaResolution,
        },
    };

    use super::{CameraConstraints, CameraDevice, CaptureBackend, CaptureHandle};
    use crate::{error::CameraError, pipeline::video::VideoFeed, types::Frame};

    const TARGET_FPS: u32 = 30;

    /// Native capture through nokhwa.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct NokhwaBackend;

    fn requested_formats(width: u32, height: u32) -> [RequestedFormat<'static>; 3] {
        let closest = CameraFormat::new(
            NokhwaResolution::new(width, height),
            FrameFormat::MJPEG,
            TARGET_FPS,
        );
        [
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(closest)),
            // Some drivers reject the tier outright; prefer any high frame rate
            // over their very low default rates.
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    fn build_camera(index: CameraIndex, width: u32, height: u32) -> Result<Camera> {
        let mut last_err = None;

        for requested in requested_formats(width, height) {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }

    impl CaptureBackend for NokhwaBackend {
        fn start(
            &self,
            constraints: &CameraConstraints,
            feed: VideoFeed,
        ) -> Result<CaptureHandle, CameraError> {
            let index = CameraIndex::Index(constraints.device_index());
            let (width, height) = constraints.resolution.dimensions();
            let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

            let stop = Arc::new(AtomicBool::new(false));
            let stop_flag = stop.clone();

            let handle = thread::Builder::new()
                .name("camera-capture".into())
                .spawn(move || {
                    let mut camera = match build_camera(index, width, height) {
                        Ok(camera) => {
                            let _ = ready_tx.send(Ok(()));
                            camera
                        }
                        Err(err) => {
                            let _ = ready_tx.send(Err(format!("{err:#}")));
                            return;
                        }
                    };

                    while !stop_flag.load(Ordering::Relaxed) {
                        let buffer = match camera.frame() {
                            Ok(buffer) => buffer,
                            Err(err) => {
                                log::warn!("camera frame read failed: {err:?}");
                                continue;
                            }
                        };

                        let decoded = match buffer.decode_image::<RgbFormat>() {
                            Ok(img) => img,
                            Err(err) => {
                                log::warn!("failed to decode camera frame: {err:?}");
                                continue;
                            }
                        };

                        let (width, height) = decoded.dimensions();
                        let rgb = decoded.into_raw();
                        if rgb.is_empty() {
                            continue;
                        }

                        let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
                        for chunk in rgb.chunks_exact(3) {
                            rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
                        }

                        feed.publish(Frame {
                            rgba,
                            width,
                            height,
                            timestamp: Instant::now(),
                        });
                    }

                    if let Err(err) = camera.stop_stream() {
                        log::warn!("failed to stop camera stream: {err:?}");
                    }
                })
                .map_err(|err| CameraError::Unavailable(err.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(CaptureHandle::new(stop, handle)),
                Ok(Err(message)) => {
                    let _ = handle.join();
                    Err(CameraError::Unavailable(message))
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(CameraError::Unavailable(
                        "capture thread exited before opening the camera".into(),
                    ))
                }
            }
        }

        fn devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
            let cameras =
                query(ApiBackend::Auto).map_err(|err| CameraError::Unavailable(err.to_string()))?;
            Ok(cameras
                .into_iter()
                .enumerate()
                .map(|(idx, info)| CameraDevice {
                    index: idx as u32,
                    label: info.human_name(),
                })
                .collect())
        }
    }
}

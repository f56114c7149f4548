#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use gesture_arcade::{
    consumer::LinkSettings,
    error::{CameraError, FrameError},
    pipeline::{
        CameraConstraints, CameraProvider, CaptureBackend, CaptureHandle, GestureModel,
        ModelLoader, ModelSource, ModelSources, VideoFeed, VisionAdapter,
    },
    session::RecognitionSession,
    types::{
        DetectionFrame, Frame, GestureLabel, GestureScore, HandDetection, Handedness,
    },
};

pub const FRAME_WIDTH: u32 = 64;
pub const FRAME_HEIGHT: u32 = 48;

pub fn frame(width: u32, height: u32) -> Frame {
    Frame {
        rgba: vec![128; (width * height * 4) as usize],
        width,
        height,
        timestamp: Instant::now(),
    }
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Camera that pumps synthetic frames on its own thread until stopped.
#[derive(Default)]
pub struct FakeCamera {
    deny: AtomicBool,
    starts: AtomicUsize,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    zero_sized: AtomicBool,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Publish frames with zero dimensions, as a stream that is not ready yet.
    pub fn zero_sized(&self, zero: bool) {
        self.zero_sized.store(zero, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most captures ever running at the same time.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for FakeCamera {
    fn start(
        &self,
        _constraints: &CameraConstraints,
        feed: VideoFeed,
    ) -> Result<CaptureHandle, CameraError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CameraError::Unavailable("permission denied".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);

        let (width, height) = if self.zero_sized.load(Ordering::SeqCst) {
            (0, 0)
        } else {
            (FRAME_WIDTH, FRAME_HEIGHT)
        };
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let live = Arc::clone(&self.live);
        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                feed.publish(frame(width, height));
                thread::sleep(Duration::from_millis(3));
            }
            live.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(CaptureHandle::new(stop, handle))
    }
}

#[derive(Default)]
struct ScriptState {
    hand: Option<(GestureLabel, f32)>,
    fatal: Option<String>,
}

/// What the scripted model reports for every frame from now on.
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    pub fn show(&self, label: GestureLabel, confidence: f32) {
        self.0.lock().unwrap().hand = Some((label, confidence));
    }

    pub fn hide(&self) {
        self.0.lock().unwrap().hand = None;
    }

    pub fn fail_fatally(&self, message: &str) {
        self.0.lock().unwrap().fatal = Some(message.to_string());
    }

    pub fn recover(&self) {
        self.0.lock().unwrap().fatal = None;
    }
}

pub struct ScriptedModel {
    script: Script,
}

impl GestureModel for ScriptedModel {
    fn classify(&mut self, frame: &Frame, _timestamp_ms: u64) -> Result<DetectionFrame, FrameError> {
        let state = self.script.0.lock().unwrap();
        if let Some(message) = &state.fatal {
            return Err(FrameError::Fatal(message.clone()));
        }
        Ok(match state.hand {
            Some((label, confidence)) => DetectionFrame::single(HandDetection {
                gestures: vec![GestureScore { label, confidence }],
                handedness: Handedness::Right,
                landmarks: (0..21)
                    .map(|i| {
                        let t = i as f32 / 20.0;
                        (t * frame.width as f32 * 0.8, t * frame.height as f32 * 0.8)
                    })
                    .collect(),
            }),
            None => DetectionFrame::empty(),
        })
    }
}

#[derive(Default)]
pub struct FakeLoader {
    pub script: Script,
    pub delay: Duration,
    pub fail_primary: bool,
    pub fail_fallback: bool,
    pub loads: AtomicUsize,
}

impl ModelLoader for FakeLoader {
    fn load(&self, source: &ModelSource) -> anyhow::Result<Box<dyn GestureModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        match source {
            ModelSource::Remote { .. } if self.fail_primary => anyhow::bail!("download refused"),
            ModelSource::Local(_) if self.fail_fallback => anyhow::bail!("model file missing"),
            _ => Ok(Box::new(ScriptedModel {
                script: self.script.clone(),
            })),
        }
    }
}

pub fn sources() -> ModelSources {
    ModelSources {
        primary: ModelSource::Remote {
            url: "https://models.invalid/handpose.onnx".into(),
            cache_path: PathBuf::from("unused/handpose.onnx"),
        },
        fallback: ModelSource::Local(PathBuf::from("assets/handpose.onnx")),
    }
}

pub fn session_with(loader: Arc<FakeLoader>) -> Arc<RecognitionSession> {
    let adapter = VisionAdapter::new(loader, sources());
    Arc::new(RecognitionSession::new(Arc::new(adapter)).with_tick_interval(Duration::from_millis(2)))
}

/// Everything a consumer needs, wired to fakes.
pub struct Rig {
    pub camera: Arc<FakeCamera>,
    pub provider: Arc<CameraProvider>,
    pub session: Arc<RecognitionSession>,
    pub loader: Arc<FakeLoader>,
    pub script: Script,
}

impl Rig {
    pub fn new() -> Self {
        let camera = FakeCamera::new();
        let script = Script::default();
        let loader = Arc::new(FakeLoader {
            script: script.clone(),
            ..FakeLoader::default()
        });
        Self {
            provider: Arc::new(CameraProvider::new(
                Arc::clone(&camera) as Arc<dyn CaptureBackend>,
                Duration::from_millis(10),
            )),
            camera,
            session: session_with(Arc::clone(&loader)),
            loader,
            script,
        }
    }

    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            constraints: CameraConstraints::default(),
            video_ready_timeout: Duration::from_secs(1),
            init_wait: Duration::from_secs(5),
        }
    }

    pub fn link(&self) -> gesture_arcade::consumer::LiveLink {
        gesture_arcade::consumer::LiveLink::new(
            Arc::clone(&self.session),
            Arc::clone(&self.provider),
            self.settings(),
        )
    }
}

mod common;
pub mod onnx;

use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, bounded};
use regex::Regex;

use crate::{
    error::{FrameError, VisionError},
    lock,
    types::{DetectionFrame, Frame},
};

pub use self::onnx::OnnxModelLoader;

pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A loaded hand-gesture classifier.
pub trait GestureModel: Send + 'static {
    fn classify(&mut self, frame: &Frame, timestamp_ms: u64) -> Result<DetectionFrame, FrameError>;
}

/// Produces a [`GestureModel`] from one model source.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, source: &ModelSource) -> anyhow::Result<Box<dyn GestureModel>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    /// Downloaded once into `cache_path`, reused afterwards.
    Remote { url: String, cache_path: PathBuf },
    Local(PathBuf),
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Remote { url, .. } => write!(f, "{url}"),
            ModelSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelSources {
    pub primary: ModelSource,
    pub fallback: ModelSource,
}

/// Recognizes per-frame errors that are known runtime noise and not worth
/// reporting above `debug`.
#[derive(Clone, Debug, Default)]
pub struct NoiseFilter {
    patterns: Vec<Regex>,
}

impl NoiseFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_benign(&self, message: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(message))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterStatus {
    Idle,
    Loading,
    Ready,
}

enum AdapterState {
    Idle,
    Loading,
    Ready(Box<dyn GestureModel>),
}

/// Owns the gesture model and its load lifecycle.
pub struct VisionAdapter {
    loader: Arc<dyn ModelLoader>,
    sources: ModelSources,
    init_timeout: Duration,
    noise: NoiseFilter,
    state: Mutex<AdapterState>,
    load_attempts: AtomicUsize,
}

impl VisionAdapter {
    pub fn new(loader: Arc<dyn ModelLoader>, sources: ModelSources) -> Self {
        Self {
            loader,
            sources,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            noise: NoiseFilter::default(),
            state: Mutex::new(AdapterState::Idle),
            load_attempts: AtomicUsize::new(0),
        }
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_noise_filter(mut self, noise: NoiseFilter) -> Self {
        self.noise = noise;
        self
    }

    pub fn status(&self) -> AdapterStatus {
        match *lock(&self.state) {
            AdapterState::Idle => AdapterStatus::Idle,
            AdapterState::Loading => AdapterStatus::Loading,
            AdapterState::Ready(_) => AdapterStatus::Ready,
        }
    }

    /// Number of load attempts started since construction.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Loads the primary source, falling back to the secondary one. Returns
    /// immediately if a load is already in flight or the model is ready.
    pub fn initialize(&self) -> Result<(), VisionError> {
        {
            let mut state = lock(&self.state);
            match *state {
                AdapterState::Loading | AdapterState::Ready(_) => return Ok(()),
                AdapterState::Idle => *state = AdapterState::Loading,
            }
        }
        self.load_attempts.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = bounded(1);
        let loader = Arc::clone(&self.loader);
        let sources = self.sources.clone();
        let spawned = thread::Builder::new()
            .name("model-loader".into())
            .spawn(move || {
                // The receiver is gone if initialization already timed out.
                let _ = tx.send(load_with_fallback(loader.as_ref(), &sources));
            });
        if let Err(err) = spawned {
            *lock(&self.state) = AdapterState::Idle;
            return Err(VisionError::Model(format!("failed to spawn model loader: {err}")));
        }

        let outcome = rx.recv_timeout(self.init_timeout);
        let mut state = lock(&self.state);
        match outcome {
            Ok(Ok(model)) => match *state {
                AdapterState::Loading => {
                    *state = AdapterState::Ready(model);
                    log::info!("gesture model ready");
                    Ok(())
                }
                AdapterState::Ready(_) => Ok(()),
                AdapterState::Idle => {
                    log::warn!("discarding gesture model that finished loading after close");
                    Err(VisionError::Closed)
                }
            },
            Ok(Err(err)) => {
                *state = AdapterState::Idle;
                log::error!("{err}");
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                *state = AdapterState::Idle;
                log::error!(
                    "gesture model initialization timed out after {:?}",
                    self.init_timeout
                );
                Err(VisionError::Timeout(self.init_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                *state = AdapterState::Idle;
                Err(VisionError::Model("model loader exited without a result".into()))
            }
        }
    }

    /// Classifies one frame. Transient model errors read as "no detection";
    /// only fatal ones and use before initialization are returned.
    pub fn classify(&self, frame: &Frame, timestamp_ms: u64) -> Result<DetectionFrame, VisionError> {
        let mut state = lock(&self.state);
        let AdapterState::Ready(model) = &mut *state else {
            return Err(VisionError::NotReady);
        };

        match model.classify(frame, timestamp_ms) {
            Ok(detections) => Ok(detections),
            Err(FrameError::Transient(message)) => {
                if self.noise.is_benign(&message) {
                    log::debug!("ignoring benign frame error: {message}");
                } else {
                    log::warn!("frame classification failed: {message}");
                }
                Ok(DetectionFrame::empty())
            }
            Err(FrameError::Fatal(message)) => Err(VisionError::Model(message)),
        }
    }

    pub fn close(&self) {
        let mut state = lock(&self.state);
        if !matches!(*state, AdapterState::Idle) {
            log::info!("closing gesture model");
        }
        *state = AdapterState::Idle;
    }
}

fn load_with_fallback(
    loader: &dyn ModelLoader,
    sources: &ModelSources,
) -> Result<Box<dyn GestureModel>, VisionError> {
    let primary_err = match loader.load(&sources.primary) {
        Ok(model) => {
            log::info!("loaded gesture model from {}", sources.primary);
            return Ok(model);
        }
        Err(err) => {
            log::warn!(
                "primary gesture model {} unavailable, trying fallback: {err:#}",
                sources.primary
            );
            err
        }
    };

    match loader.load(&sources.fallback) {
        Ok(model) => {
            log::info!("loaded gesture model from fallback {}", sources.fallback);
            Ok(model)
        }
        Err(fallback_err) => Err(VisionError::LoadFailed {
            primary: format!("{primary_err:#}"),
            fallback: format!("{fallback_err:#}"),
        }),
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::consumer::ConsumerKind;

/// Failures of the vision model adapter.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("gesture model could not be loaded (primary: {primary}; fallback: {fallback})")]
    LoadFailed { primary: String, fallback: String },
    #[error("gesture model initialization timed out after {0:?}")]
    Timeout(Duration),
    #[error("gesture model was closed while it was loading")]
    Closed,
    #[error("gesture model is not initialized")]
    NotReady,
    #[error("gesture model failed: {0}")]
    Model(String),
}

/// Per-frame classification failures reported by a model.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Recoverable; the frame is treated as having no detection.
    #[error("transient frame error: {0}")]
    Transient(String),
    /// The model can no longer classify frames.
    #[error("fatal model error: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera is not accessible, check permissions ({0})")]
    Unavailable(String),
    #[error("a camera stream is already active for this consumer")]
    AlreadyActive,
    #[error("no camera stream is active")]
    NotActive,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("recognition session is not ready: {0}")]
    NotReady(String),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("failed to spawn recognition loop: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("no {0:?} consumer is registered")]
    NotRegistered(ConsumerKind),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no executable configured for process `{0}`")]
    UnknownProcess(String),
    #[error("failed to launch `{id}`: {source}")]
    Launch {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

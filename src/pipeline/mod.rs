pub mod camera;
pub mod recognizer;
pub mod skeleton;
pub mod video;

// Re-exports for convenience
pub use camera::{CameraConstraints, CameraProvider, CameraSlot, CaptureBackend, CaptureHandle};
pub use recognizer::{GestureModel, ModelLoader, ModelSource, ModelSources, VisionAdapter};
pub use video::{Overlay, VideoFeed};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use super::{
    GestureModel, ModelLoader, ModelSource,
    common::{self, INPUT_SIZE, Letterbox, NUM_LANDMARKS},
};
use crate::{
    error::FrameError,
    gesture, model_download,
    types::{DetectionFrame, Frame, GestureScore, HandDetection, Handedness},
};

/// Hands scoring below this are treated as absent.
const MIN_HAND_CONFIDENCE: f32 = 0.2;

/// Landmarks, hand confidence, handedness.
const REQUIRED_OUTPUTS: usize = 3;

/// Loads the MediaPipe handpose estimator through ONNX Runtime.
#[derive(Clone, Debug)]
pub struct OnnxModelLoader {
    intra_threads: usize,
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self { intra_threads: 2 }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, source: &ModelSource) -> Result<Box<dyn GestureModel>> {
        let path: PathBuf = match source {
            ModelSource::Remote { url, cache_path } => {
                model_download::ensure_model_ready(url, cache_path, |_| {})?;
                cache_path.clone()
            }
            ModelSource::Local(path) => {
                if !path.exists() {
                    bail!("model file {} does not exist", path.display());
                }
                path.clone()
            }
        };
        Ok(Box::new(OnnxGestureModel::new(&path, self.intra_threads)?))
    }
}

struct OnnxGestureModel {
    session: Session,
}

impl OnnxGestureModel {
    fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
        Ok(Self { session })
    }

    /// Run failures are per-frame and transient; an output layout the
    /// decoder cannot read is fatal, since every later frame fails the same.
    fn infer(&mut self, frame: &Frame) -> Result<DetectionFrame, FrameError> {
        let (input, letterbox) = common::letterbox_input(frame, INPUT_SIZE)
            .map_err(|err| FrameError::Transient(format!("{err:#}")))?;
        let tensor = Tensor::from_array(input)
            .map_err(|err| FrameError::Transient(format!("failed to build input tensor: {err}")))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|err| FrameError::Transient(format!("failed to run ORT session: {err}")))?;

        let mut flattened = Vec::with_capacity(REQUIRED_OUTPUTS);
        for idx in 0..outputs.len().min(REQUIRED_OUTPUTS) {
            let values = outputs[idx].try_extract_array::<f32>().map_err(|err| {
                FrameError::Fatal(format!("model output {idx} is not an f32 tensor: {err}"))
            })?;
            flattened.push(values.iter().copied().collect::<Vec<f32>>());
        }
        read_outputs(&flattened, &letterbox)
    }
}

/// Decodes landmarks, hand confidence and handedness from the flattened
/// model outputs.
fn read_outputs(outputs: &[Vec<f32>], letterbox: &Letterbox) -> Result<DetectionFrame, FrameError> {
    let [coords, confidence, handedness, ..] = outputs else {
        return Err(FrameError::Fatal(format!(
            "model returned {} outputs, expected {REQUIRED_OUTPUTS}",
            outputs.len()
        )));
    };
    let landmarks =
        common::decode_landmarks(coords).map_err(|err| FrameError::Fatal(format!("{err:#}")))?;

    let confidence = confidence.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
    if confidence < MIN_HAND_CONFIDENCE {
        return Ok(DetectionFrame::empty());
    }
    let handedness = if handedness.first().copied().unwrap_or(0.0) >= 0.5 {
        Handedness::Right
    } else {
        Handedness::Left
    };

    let gestures = gesture::rank_gestures(&landmarks)
        .into_iter()
        .map(|score| GestureScore {
            label: score.label,
            confidence: score.confidence * confidence,
        })
        .collect();

    Ok(DetectionFrame::single(HandDetection {
        gestures,
        handedness,
        landmarks: letterbox.project(&landmarks),
    }))
}

impl GestureModel for OnnxGestureModel {
    fn classify(&mut self, frame: &Frame, _timestamp_ms: u64) -> Result<DetectionFrame, FrameError> {
        if !frame.has_valid_dimensions() {
            return Ok(DetectionFrame::empty());
        }
        self.infer(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_local_model_fails_to_load() {
        let loader = OnnxModelLoader::default();
        let source = ModelSource::Local(PathBuf::from("does/not/exist.onnx"));
        let err = loader.load(&source).err().unwrap();
        assert!(err.to_string().contains("does not exist"));
    }

    fn letterbox() -> Letterbox {
        Letterbox::for_frame(640, 480, INPUT_SIZE)
    }

    #[test]
    fn short_landmark_output_is_fatal() {
        let outputs = [vec![0.5; 10], vec![0.9], vec![1.0]];
        let err = read_outputs(&outputs, &letterbox()).unwrap_err();
        assert!(matches!(err, FrameError::Fatal(msg) if msg.contains("landmarks length")));
    }

    #[test]
    fn missing_outputs_are_fatal() {
        let outputs = [vec![0.5; NUM_LANDMARKS * 3]];
        assert!(matches!(
            read_outputs(&outputs, &letterbox()),
            Err(FrameError::Fatal(_))
        ));
    }

    #[test]
    fn low_confidence_hand_reads_as_absent() {
        let outputs = [vec![100.0; NUM_LANDMARKS * 3], vec![0.1], vec![1.0]];
        let frame = read_outputs(&outputs, &letterbox()).unwrap();
        assert!(frame.hands.is_empty());
    }

    #[test]
    fn confident_hand_is_projected_into_the_frame() {
        let outputs = [vec![112.0; NUM_LANDMARKS * 3], vec![0.9], vec![0.2]];
        let frame = read_outputs(&outputs, &letterbox()).unwrap();
        let hand = &frame.hands[0];
        assert_eq!(hand.handedness, Handedness::Left);
        assert_eq!(hand.landmarks.len(), NUM_LANDMARKS);
        assert!(hand.landmarks.iter().all(|&(x, y)| x <= 639.0 && y <= 479.0));
        assert!(!hand.gestures.is_empty());
    }
}

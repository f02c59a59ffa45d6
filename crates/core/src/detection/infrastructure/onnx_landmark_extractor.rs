//! Landmark extractor backed by a YOLO face-pose model via `ort`.
//!
//! Letterboxes the frame, runs inference, keeps detections above the
//! confidence threshold and returns the 5-point landmarks of the most
//! prominent (largest) face as a normalised landmark vector.
use std::path::Path;
use std::sync::Mutex;

use crate::detection::domain::face_landmarks::{FaceLandmarks, NUM_POINTS};
use crate::detection::domain::landmark_extractor::{DetectError, LandmarkExtractor, LandmarkVector};
use crate::shared::constants::{LANDMARK_DIMENSION, LANDMARK_MODEL_ID};
use crate::shared::frame::Frame;

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// 5 landmarks × (x, y, conf).
const NUM_KEYPOINT_VALUES: usize = NUM_POINTS * 3;

/// Minimum keypoint confidence to treat a landmark as visible.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

pub struct OnnxLandmarkExtractor {
    session: Mutex<ort::session::Session>,
    confidence: f64,
    input_size: u32,
}

impl OnnxLandmarkExtractor {
    /// Load the pose model. The input resolution is read from the model's
    /// NCHW input shape, falling back to 640 when dynamic.
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?
            .with_execution_providers(platform_execution_providers())?
            .commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { ref shape, .. } if shape.len() >= 4 && shape[2] > 0 => {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded landmark model {} (input {input_size}px, confidence {confidence})",
            model_path.display()
        );

        Ok(Self {
            session: Mutex::new(session),
            confidence,
            input_size,
        })
    }

    fn infer(&self, frame: &Frame) -> Result<Option<LandmarkVector>, Box<dyn std::error::Error>> {
        let (input_tensor, scale, pad_x, pad_y) = letterbox(frame, self.input_size);
        let input_value = ort::value::Tensor::from_array(input_tensor)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("Landmark model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(format!("Unexpected landmark model output shape: {shape:?}").into());
        }

        // [1, features, detections] (transposed) or [1, detections, features]
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

        let rows = (0..num_dets).map(|i| {
            if transposed {
                (0..num_feats).map(|f| data[f * num_dets + i]).collect()
            } else {
                data[i * num_feats..(i + 1) * num_feats].to_vec()
            }
        });
        let letterbox = Letterbox { scale, pad_x, pad_y };
        let best = most_prominent(rows, self.confidence, &letterbox);

        Ok(best.map(|d| d.landmarks.to_vector(frame.width(), frame.height())))
    }
}

impl LandmarkExtractor for OnnxLandmarkExtractor {
    fn detect(&self, frame: &Frame) -> Result<Option<LandmarkVector>, DetectError> {
        self.infer(frame)
            .map_err(|e| -> DetectError { e.to_string().into() })
    }

    fn dimension(&self) -> usize {
        LANDMARK_DIMENSION
    }

    fn model_id(&self) -> &str {
        LANDMARK_MODEL_ID
    }
}

/// CoreML on macOS, DirectML on Windows, CPU elsewhere. ort falls back to
/// CPU when the accelerated provider fails to register.
fn platform_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    return vec![ort::execution_providers::CoreMLExecutionProvider::default().build()];
    #[cfg(target_os = "windows")]
    return vec![ort::execution_providers::DirectMLExecutionProvider::default().build()];
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    Vec::new()
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn to_frame(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_x as f64) / self.scale,
            (y - self.pad_y as f64) / self.scale,
        )
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    area: f64,
    confidence: f64,
    landmarks: FaceLandmarks,
}

/// Picks the largest face above `min_confidence`; confidence breaks ties.
///
/// Row format: `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`.
fn most_prominent(
    rows: impl Iterator<Item = Vec<f32>>,
    min_confidence: f64,
    letterbox: &Letterbox,
) -> Option<Candidate> {
    rows.filter(|row| row.len() >= 5 + NUM_KEYPOINT_VALUES)
        .filter(|row| row[4] as f64 >= min_confidence)
        .map(|row| {
            let mut points = [(0.0f64, 0.0f64); NUM_POINTS];
            let mut confidences = [0.0f64; NUM_POINTS];
            for k in 0..NUM_POINTS {
                let kconf = row[5 + k * 3 + 2] as f64;
                if kconf >= KEYPOINT_CONF_THRESH {
                    points[k] = letterbox.to_frame(row[5 + k * 3] as f64, row[5 + k * 3 + 1] as f64);
                    confidences[k] = kconf;
                }
            }
            let w = row[2] as f64 / letterbox.scale;
            let h = row[3] as f64 / letterbox.scale;
            Candidate {
                area: w.max(0.0) * h.max(0.0),
                confidence: row[4] as f64,
                landmarks: FaceLandmarks::new(points, confidences),
            }
        })
        .filter(|c| c.landmarks.has_visible())
        .max_by(|a, b| {
            a.area
                .partial_cmp(&b.area)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        })
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Letterbox-resize a frame to `target_size` × `target_size`.
///
/// Returns `(NCHW float32 tensor, scale, pad_x, pad_y)`.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, f64, u32, u32) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = (fw * scale).round() as u32;
    let new_h = (fh * scale).round() as u32;
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padding is 114/255 gray, the YOLO convention.
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (tensor, scale, pad_x, pad_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
        }
    }

    /// A detection row with all five keypoints visible around `(cx, cy)`.
    fn row(cx: f32, cy: f32, size: f32, conf: f32) -> Vec<f32> {
        let mut r = vec![cx, cy, size, size, conf];
        for k in 0..NUM_POINTS {
            r.extend_from_slice(&[cx - 10.0 + k as f32 * 5.0, cy, 0.9]);
        }
        r
    }

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        let frame = Frame::new(vec![128u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (tensor, scale, pad_x, pad_y) = letterbox(&frame, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((scale - 3.2).abs() < 0.01);
        assert_eq!(pad_x, 0);
        assert_eq!(pad_y, 160);
    }

    #[test]
    fn test_letterbox_pads_with_gray() {
        let frame = Frame::new(vec![255u8; 100 * 50 * 3], 100, 50, 3, 0);
        let (tensor, _, pad_x, pad_y) = letterbox(&frame, 640);

        let inside = tensor[[0, 0, pad_y as usize + 1, pad_x as usize + 1]];
        assert!((inside - 1.0).abs() < 0.01);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_most_prominent_prefers_largest_face() {
        let rows = vec![row(100.0, 100.0, 40.0, 0.95), row(300.0, 300.0, 120.0, 0.6)];
        let best = most_prominent(rows.into_iter(), 0.5, &identity_letterbox()).unwrap();
        assert!((best.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_most_prominent_drops_low_confidence() {
        let rows = vec![row(100.0, 100.0, 200.0, 0.3)];
        assert!(most_prominent(rows.into_iter(), 0.5, &identity_letterbox()).is_none());
    }

    #[test]
    fn test_most_prominent_ignores_rows_without_keypoints() {
        let rows = vec![vec![100.0, 100.0, 50.0, 50.0, 0.9]];
        assert!(most_prominent(rows.into_iter(), 0.5, &identity_letterbox()).is_none());
    }

    #[test]
    fn test_keypoints_mapped_back_through_letterbox() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 0,
            pad_y: 40,
        };
        let rows = vec![row(200.0, 140.0, 100.0, 0.9)];
        let best = most_prominent(rows.into_iter(), 0.5, &lb).unwrap();
        // nose keypoint x = 200, y = 140 → ((200-0)/2, (140-40)/2)
        assert_eq!(best.landmarks.points()[2], (100.0, 50.0));
    }
}

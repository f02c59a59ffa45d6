//! 5-point face landmarks as produced by the pose model.
//!
//! Flattened into a landmark vector of `(x, y, confidence)` triples with
//! coordinates normalised to the frame, so vectors from different camera
//! resolutions share one dimension and scale.

use super::landmark_extractor::LandmarkVector;

pub const NUM_POINTS: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct FaceLandmarks {
    /// Pixel coordinates. Points with x <= 0 are treated as invisible.
    points: [(f64, f64); NUM_POINTS],
    confidences: [f64; NUM_POINTS],
}

impl FaceLandmarks {
    pub fn new(points: [(f64, f64); NUM_POINTS], confidences: [f64; NUM_POINTS]) -> Self {
        Self {
            points,
            confidences,
        }
    }

    pub fn points(&self) -> &[(f64, f64); NUM_POINTS] {
        &self.points
    }

    pub fn has_visible(&self) -> bool {
        self.points.iter().any(|(x, _)| *x > 0.0)
    }

    /// Flattens to `[x0/w, y0/h, c0, x1/w, ...]`, clamped to `[0, 1]`.
    /// Invisible points contribute zeros.
    pub fn to_vector(&self, frame_width: u32, frame_height: u32) -> LandmarkVector {
        let w = f64::from(frame_width.max(1));
        let h = f64::from(frame_height.max(1));
        let mut out = Vec::with_capacity(NUM_POINTS * 3);
        for ((x, y), conf) in self.points.iter().zip(self.confidences.iter()) {
            if *x > 0.0 {
                out.push((x / w).clamp(0.0, 1.0) as f32);
                out.push((y / h).clamp(0.0, 1.0) as f32);
                out.push(conf.clamp(0.0, 1.0) as f32);
            } else {
                out.extend_from_slice(&[0.0, 0.0, 0.0]);
            }
        }
        out
    }
}

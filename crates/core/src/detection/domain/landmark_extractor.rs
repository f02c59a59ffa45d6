use crate::shared::frame::Frame;

/// Fixed-dimension facial geometry descriptor for one face.
pub type LandmarkVector = Vec<f32>;

pub type DetectError = Box<dyn std::error::Error + Send + Sync>;

/// Domain interface for facial-landmark extraction.
///
/// `detect` describes the single most prominent face in the frame, or
/// returns `Ok(None)` when no face is present. Implementations hold no
/// per-call state, so one extractor is shared between the frame producer
/// and capture commands.
pub trait LandmarkExtractor: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Option<LandmarkVector>, DetectError>;

    /// Length `D` of every vector returned by `detect`.
    fn dimension(&self) -> usize;

    /// Identifier recorded in persisted profiles.
    fn model_id(&self) -> &str;
}

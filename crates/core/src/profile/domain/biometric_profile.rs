use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::shared::frame::Frame;

/// Per-angle entry of a persisted profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleRecord {
    pub angle: String,
    /// Image file name, relative to the profile directory.
    pub filename: String,
    pub landmarks: Vec<f32>,
    pub landmark_count: usize,
}

/// The enrollment record written once per successful session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiometricProfile {
    pub name: String,
    pub created_at: DateTime<Local>,
    /// Identifier of the landmark model that produced every vector.
    pub model: String,
    pub photos: Vec<AngleRecord>,
    pub average_landmarks: Option<Vec<f32>>,
    pub total_landmarks: usize,
    pub photo_count: usize,
}

/// A profile together with the images it references, ready to persist.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledProfile {
    pub profile: BiometricProfile,
    /// `(file name, image)` for each angle record, in record order.
    pub images: Vec<(String, Frame)>,
    /// The canonical angle's image.
    pub reference: Frame,
}

impl AssembledProfile {
    pub fn user_id(&self) -> &str {
        &self.profile.name
    }
}

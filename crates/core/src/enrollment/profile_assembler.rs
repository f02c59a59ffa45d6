use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::detection::domain::landmark_extractor::LandmarkVector;
use crate::enrollment::angle_sequence::AngleSequence;
use crate::enrollment::enrollment_error::EnrollmentError;
use crate::enrollment::session_state::CapturedAngle;
use crate::profile::domain::biometric_profile::{AngleRecord, AssembledProfile, BiometricProfile};
use crate::profile::domain::profile_store::ProfileStore;

/// Turns a session's captures into a profile record and persists it.
pub struct ProfileAssembler {
    canonical_angle: String,
    model_id: String,
    store: Arc<dyn ProfileStore>,
}

impl ProfileAssembler {
    /// The reference image comes from the sequence's canonical angle.
    pub fn new(angles: &AngleSequence, model_id: &str, store: Arc<dyn ProfileStore>) -> Self {
        Self {
            canonical_angle: angles.canonical().name.clone(),
            model_id: model_id.to_string(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Builds the profile. Pure: touches no storage.
    pub fn assemble(
        &self,
        user_id: &str,
        captured: &[CapturedAngle],
        created_at: DateTime<Local>,
    ) -> Result<AssembledProfile, EnrollmentError> {
        let average_landmarks = average_landmarks(captured)?;

        let reference = captured
            .iter()
            .find(|c| c.angle.name == self.canonical_angle)
            .map(|c| c.image.clone())
            .ok_or_else(|| EnrollmentError::NoCanonicalAngle(self.canonical_angle.clone()))?;

        let photos: Vec<AngleRecord> = captured
            .iter()
            .map(|c| AngleRecord {
                angle: c.angle.name.clone(),
                filename: c.angle.storage_key.clone(),
                landmarks: c.landmarks.clone(),
                landmark_count: c.landmarks.len(),
            })
            .collect();
        let images = captured
            .iter()
            .map(|c| (c.angle.storage_key.clone(), c.image.clone()))
            .collect();

        Ok(AssembledProfile {
            profile: BiometricProfile {
                name: user_id.to_string(),
                created_at,
                model: self.model_id.clone(),
                photo_count: photos.len(),
                photos,
                total_landmarks: average_landmarks.as_ref().map_or(0, Vec::len),
                average_landmarks,
            },
            images,
            reference,
        })
    }

    /// Writes an assembled profile. Failures are reported, never retried.
    pub fn persist(&self, assembled: &AssembledProfile) -> Result<PathBuf, EnrollmentError> {
        self.store
            .save(assembled)
            .map_err(|source| EnrollmentError::PersistenceFailed {
                user_id: assembled.user_id().to_string(),
                source,
            })
    }
}

/// Element-wise mean of every capture's landmark vector, or `None` when
/// nothing was captured. All vectors must share one dimension.
pub fn average_landmarks(
    captured: &[CapturedAngle],
) -> Result<Option<LandmarkVector>, EnrollmentError> {
    let Some(first) = captured.first() else {
        return Ok(None);
    };
    let dimension = first.landmarks.len();

    let mut sums = vec![0.0f64; dimension];
    for capture in captured {
        if capture.landmarks.len() != dimension {
            return Err(EnrollmentError::DimensionMismatch {
                angle: capture.angle.name.clone(),
                expected: dimension,
                actual: capture.landmarks.len(),
            });
        }
        for (sum, value) in sums.iter_mut().zip(&capture.landmarks) {
            *sum += f64::from(*value);
        }
    }

    let n = captured.len() as f64;
    Ok(Some(sums.into_iter().map(|s| (s / n) as f32).collect()))
}

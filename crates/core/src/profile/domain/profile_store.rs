use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::biometric_profile::{AssembledProfile, BiometricProfile};

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// What to do with a profile already stored under the same user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistingProfilePolicy {
    /// Replace it wholesale (last writer wins).
    #[default]
    Overwrite,
    /// Keep it under a timestamped sibling name.
    Backup,
}

/// Durable storage for enrollment profiles, one record per user id.
pub trait ProfileStore: Send + Sync {
    /// Writes the profile and its images, replacing any existing record for
    /// the same user. Returns the record's location.
    fn save(&self, profile: &AssembledProfile) -> Result<PathBuf, StoreError>;

    fn exists(&self, user_id: &str) -> bool;

    fn load(&self, user_id: &str) -> Result<Option<BiometricProfile>, StoreError>;
}

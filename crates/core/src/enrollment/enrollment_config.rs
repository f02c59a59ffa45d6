use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::enrollment::angle_sequence::{default_angles, AngleSequence, AngleSpec};
use crate::enrollment::enrollment_error::EnrollmentError;
use crate::profile::domain::profile_store::ExistingProfilePolicy;
use crate::shared::constants::{
    APP_DIR_NAME, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_JPEG_QUALITY,
    DEFAULT_STOP_TIMEOUT_MS, DEFAULT_TARGET_FPS,
};

/// User-tunable enrollment settings, stored as JSON.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    pub device_index: u32,
    /// Tried once when `device_index` cannot be opened.
    pub fallback_device_index: Option<u32>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: f64,
    pub stop_timeout_ms: u64,
    pub profiles_dir: PathBuf,
    pub angles: Vec<AngleSpec>,
    pub canonical_angle: String,
    pub detection_confidence: f64,
    pub jpeg_quality: u8,
    pub existing_profile: ExistingProfilePolicy,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            fallback_device_index: Some(1),
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            profiles_dir: default_profiles_dir(),
            angles: default_angles(),
            canonical_angle: String::from("frontal"),
            detection_confidence: 0.5,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            existing_profile: ExistingProfilePolicy::Overwrite,
        }
    }
}

impl EnrollmentConfig {
    /// `<config_dir>/FaceEnroll/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.json"))
    }

    /// Loads from `path`, or from [`default_path`](Self::default_path) when
    /// `None`. An explicit path must exist; a missing default file yields
    /// defaults. The result is validated either way.
    pub fn load(path: Option<&Path>) -> Result<Self, EnrollmentError> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, EnrollmentError> {
        let json = fs::read_to_string(path).map_err(|e| {
            EnrollmentError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = serde_json::from_str(&json).map_err(|e| {
            EnrollmentError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EnrollmentError> {
        self.angle_sequence()?;
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(EnrollmentError::InvalidConfig(format!(
                "target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(EnrollmentError::InvalidConfig(format!(
                "jpeg_quality must be in 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if !(0.0..=1.0).contains(&self.detection_confidence) {
            return Err(EnrollmentError::InvalidConfig(format!(
                "detection_confidence must be in 0..=1, got {}",
                self.detection_confidence
            )));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(EnrollmentError::InvalidConfig(
                "frame dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn angle_sequence(&self) -> Result<AngleSequence, EnrollmentError> {
        AngleSequence::new(self.angles.clone(), &self.canonical_angle)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn default_profiles_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("profiles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = EnrollmentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.fallback_device_index, Some(1));
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.stop_timeout(), Duration::from_secs(2));
        assert!(config.profiles_dir.ends_with("FaceEnroll/profiles"));
    }

    #[test]
    fn test_partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"device_index": 2, "existing_profile": "backup"}"#).unwrap();

        let config = EnrollmentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.device_index, 2);
        assert_eq!(config.existing_profile, ExistingProfilePolicy::Backup);
        assert_eq!(config.angles.len(), 3);
        assert_eq!(config.canonical_angle, "frontal");
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = EnrollmentConfig::load(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(EnrollmentError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(EnrollmentConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = EnrollmentConfig {
            target_fps: 15.0,
            profiles_dir: dir.path().join("profiles"),
            ..EnrollmentConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EnrollmentConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_canonical_angle_must_be_configured() {
        let config = EnrollmentConfig {
            canonical_angle: "up".into(),
            ..EnrollmentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::zero_fps(EnrollmentConfig { target_fps: 0.0, ..EnrollmentConfig::default() })]
    #[case::nan_fps(EnrollmentConfig { target_fps: f64::NAN, ..EnrollmentConfig::default() })]
    #[case::zero_quality(EnrollmentConfig { jpeg_quality: 0, ..EnrollmentConfig::default() })]
    #[case::high_quality(EnrollmentConfig { jpeg_quality: 101, ..EnrollmentConfig::default() })]
    #[case::confidence(EnrollmentConfig { detection_confidence: 1.5, ..EnrollmentConfig::default() })]
    #[case::no_angles(EnrollmentConfig { angles: vec![], ..EnrollmentConfig::default() })]
    #[case::zero_width(EnrollmentConfig { frame_width: 0, ..EnrollmentConfig::default() })]
    fn test_invalid_values_rejected(#[case] config: EnrollmentConfig) {
        assert!(matches!(
            config.validate(),
            Err(EnrollmentError::InvalidConfig(_))
        ));
    }
}

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::enrollment::enrollment_error::EnrollmentError;
use crate::shared::constants::{PROFILE_FILE_NAME, REFERENCE_IMAGE_NAME};

/// One head pose the enrollment protocol asks the user for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AngleSpec {
    pub name: String,
    /// File name the angle's image is stored under.
    pub storage_key: String,
    pub instruction_text: String,
}

impl AngleSpec {
    pub fn new(name: &str, storage_key: &str, instruction_text: &str) -> Self {
        Self {
            name: name.to_string(),
            storage_key: storage_key.to_string(),
            instruction_text: instruction_text.to_string(),
        }
    }
}

/// frontal, left, right.
pub fn default_angles() -> Vec<AngleSpec> {
    vec![
        AngleSpec::new(
            "frontal",
            "frontal.jpg",
            "Look straight at the camera and keep your face centered",
        ),
        AngleSpec::new(
            "left",
            "left.jpg",
            "Turn your head slightly to the left (about 15-30 degrees)",
        ),
        AngleSpec::new(
            "right",
            "right.jpg",
            "Turn your head slightly to the right (about 15-30 degrees)",
        ),
    ]
}

/// A validated, ordered angle list containing its canonical angle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AngleSequence {
    angles: Vec<AngleSpec>,
    canonical: usize,
}

impl AngleSequence {
    pub fn new(angles: Vec<AngleSpec>, canonical_angle: &str) -> Result<Self, EnrollmentError> {
        if angles.is_empty() {
            return Err(EnrollmentError::InvalidConfig(
                "angle sequence is empty".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for angle in &angles {
            if angle.name.trim().is_empty() {
                return Err(EnrollmentError::InvalidConfig("angle name is empty".into()));
            }
            if !names.insert(angle.name.as_str()) {
                return Err(EnrollmentError::InvalidConfig(format!(
                    "duplicate angle name '{}'",
                    angle.name
                )));
            }
            if !is_plain_file_name(&angle.storage_key) {
                return Err(EnrollmentError::InvalidConfig(format!(
                    "storage key '{}' must be a plain file name",
                    angle.storage_key
                )));
            }
            if is_reserved_file_name(&angle.storage_key) {
                return Err(EnrollmentError::InvalidConfig(format!(
                    "storage key '{}' is reserved for the profile record",
                    angle.storage_key
                )));
            }
            if !keys.insert(angle.storage_key.as_str()) {
                return Err(EnrollmentError::InvalidConfig(format!(
                    "duplicate storage key '{}'",
                    angle.storage_key
                )));
            }
        }

        let canonical = angles
            .iter()
            .position(|a| a.name == canonical_angle)
            .ok_or_else(|| {
                EnrollmentError::InvalidConfig(format!(
                    "canonical angle '{canonical_angle}' is not in the angle sequence"
                ))
            })?;

        Ok(Self { angles, canonical })
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AngleSpec> {
        self.angles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AngleSpec> {
        self.angles.iter()
    }

    pub fn canonical(&self) -> &AngleSpec {
        &self.angles[self.canonical]
    }
}

impl Default for AngleSequence {
    fn default() -> Self {
        Self {
            angles: default_angles(),
            canonical: 0,
        }
    }
}

/// Files the profile store writes next to the angle images.
fn is_reserved_file_name(name: &str) -> bool {
    [PROFILE_FILE_NAME, REFERENCE_IMAGE_NAME]
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).file_name().and_then(|f| f.to_str()) == Some(name)
        && !name.contains(['/', '\\'])
}

use crate::enrollment::session_state::Phase;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures surfaced by the capture session and its collaborators.
///
/// `NoFaceDetected` and `Detection` are routine negative results; the
/// session stays where it was. Device and persistence failures carry their
/// cause and leave retry policy to the caller.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("camera device {device_index} unavailable")]
    DeviceUnavailable {
        device_index: u32,
        #[source]
        source: BoxError,
    },

    #[error("no face detected, adjust position and try again")]
    NoFaceDetected,

    #[error("invalid user id: {0}")]
    InvalidUser(String),

    #[error("session is closed ({0:?})")]
    SessionClosed(Phase),

    #[error("landmark dimension mismatch: expected {expected}, got {actual} for angle '{angle}'")]
    DimensionMismatch {
        angle: String,
        expected: usize,
        actual: usize,
    },

    #[error("canonical angle '{0}' was not captured")]
    NoCanonicalAngle(String),

    #[error("failed to persist profile for '{user_id}'")]
    PersistenceFailed {
        user_id: String,
        #[source]
        source: BoxError,
    },

    #[error("camera stopped producing frames: {0}")]
    SourceExhausted(String),

    #[error("frame producer is already running")]
    AlreadyRunning,

    #[error("'{command}' is not accepted while {phase:?}")]
    InvalidPhase { command: &'static str, phase: Phase },

    #[error("no capture to retake")]
    NothingToRetry,

    #[error("landmark detection failed: {0}")]
    Detection(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EnrollmentError {
    /// Errors after which the session moves to a terminal phase.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable { .. }
                | Self::DimensionMismatch { .. }
                | Self::NoCanonicalAngle(_)
                | Self::PersistenceFailed { .. }
        )
    }
}

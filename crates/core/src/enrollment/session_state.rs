use chrono::{DateTime, Local};
use serde::Serialize;

use crate::detection::domain::landmark_extractor::LandmarkVector;
use crate::enrollment::angle_sequence::{AngleSequence, AngleSpec};
use crate::shared::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingUser,
    Capturing,
    ReadyToFinalize,
    Finalized,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Cancelled | Self::Failed)
    }
}

/// One successfully captured pose. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedAngle {
    pub angle: AngleSpec,
    pub image: Frame,
    pub landmarks: LandmarkVector,
    pub captured_at: DateTime<Local>,
}

/// Mutable progress of one session. Only the owning session touches it.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub phase: Phase,
    pub user_id: Option<String>,
    pub active_angle_index: usize,
    pub captured: Vec<CapturedAngle>,
    /// Set by a successful capture, cleared by retry or a failed attempt.
    pub retry_available: bool,
    pub failure: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            user_id: None,
            active_angle_index: 0,
            captured: Vec::new(),
            retry_available: false,
            failure: None,
        }
    }

    pub fn snapshot(&self, angles: &AngleSequence) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            user_id: self.user_id.clone(),
            active_angle_index: self.active_angle_index,
            total_angles: angles.len(),
            captured: self.captured.clone(),
            failure: self.failure.clone(),
        }
    }

    pub fn status(&self, angles: &AngleSequence, message: Option<String>) -> StatusRecord {
        let instruction_text = match self.phase {
            Phase::Capturing => angles
                .get(self.active_angle_index)
                .map(|a| a.instruction_text.clone()),
            _ => None,
        };
        StatusRecord {
            phase: self.phase,
            user_id: self.user_id.clone(),
            active_angle_index: self.active_angle_index,
            total_angles: angles.len(),
            instruction_text,
            message,
        }
    }
}

/// Point-in-time copy of a session's state, returned by `get_state`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub user_id: Option<String>,
    pub active_angle_index: usize,
    pub total_angles: usize,
    pub captured: Vec<CapturedAngle>,
    /// Reason for entering `Failed`.
    pub failure: Option<String>,
}

impl SessionSnapshot {
    pub fn captured_names(&self) -> Vec<&str> {
        self.captured.iter().map(|c| c.angle.name.as_str()).collect()
    }
}

/// Emitted to the sink on every phase change and angle advance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusRecord {
    pub phase: Phase,
    pub user_id: Option<String>,
    pub active_angle_index: usize,
    pub total_angles: usize,
    pub instruction_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::capture::domain::frame_sink::FrameSink;
use crate::capture::domain::frame_source::{FrameSource, FrameSourceOpener};
use crate::detection::domain::landmark_extractor::{LandmarkExtractor, LandmarkVector};
use crate::enrollment::angle_sequence::{AngleSequence, AngleSpec};
use crate::enrollment::enrollment_config::EnrollmentConfig;
use crate::enrollment::enrollment_error::EnrollmentError;
use crate::enrollment::frame_producer::{CameraLease, FrameProducer, StopOutcome};
use crate::enrollment::profile_assembler::ProfileAssembler;
use crate::enrollment::session_logger::{NullSessionLogger, SessionLogger};
use crate::enrollment::session_state::{
    CapturedAngle, Phase, SessionSnapshot, SessionState, StatusRecord,
};
use crate::profile::domain::biometric_profile::AssembledProfile;
use crate::profile::domain::profile_store::ProfileStore;
use crate::shared::frame::Frame;

/// Result of a successful `finalize`.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizedProfile {
    pub assembled: AssembledProfile,
    /// Where the store put the record.
    pub location: PathBuf,
}

/// `user_YYYYMMDD_HHMMSS`, the identity used when a user gives no name.
pub fn timestamp_user_id(now: DateTime<Local>) -> String {
    now.format("user_%Y%m%d_%H%M%S").to_string()
}

/// Trims and validates a user id. Ids become directory names, so path
/// separators, parent references, leading dots and control characters are
/// rejected.
pub fn validate_user_id(raw: &str) -> Result<String, EnrollmentError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(EnrollmentError::InvalidUser("user id is empty".into()));
    }
    if id.starts_with('.') || id.contains("..") {
        return Err(EnrollmentError::InvalidUser(format!(
            "'{id}' may not start with '.' or contain '..'"
        )));
    }
    if id.contains(['/', '\\']) || id.chars().any(char::is_control) {
        return Err(EnrollmentError::InvalidUser(format!(
            "'{}' contains a path separator or control character",
            id.escape_debug()
        )));
    }
    Ok(id.to_string())
}

/// Step-driven enrollment state machine over a live camera.
///
/// Commands take `&self` and may be issued from any thread. They are
/// serialised by a command lock so results apply in issue order. `cancel`
/// bypasses that lock so it takes effect while a capture is mid-flight; the
/// capture then observes the terminal phase and discards its result.
///
/// The camera and its preview producer are held as one [`CameraLease`]:
/// leaving the session (cancel, finalize, failure or drop) releases both.
pub struct CaptureSession {
    angles: AngleSequence,
    opener: Arc<dyn FrameSourceOpener>,
    extractor: Arc<dyn LandmarkExtractor>,
    sink: Arc<dyn FrameSink>,
    assembler: ProfileAssembler,
    logger: Mutex<Box<dyn SessionLogger>>,
    fallback_device_index: Option<u32>,
    target_fps: f64,
    stop_timeout: Duration,
    command_lock: Mutex<()>,
    state: Mutex<SessionState>,
    lease: Mutex<Option<CameraLease>>,
}

impl CaptureSession {
    pub fn new(
        config: &EnrollmentConfig,
        opener: Arc<dyn FrameSourceOpener>,
        extractor: Arc<dyn LandmarkExtractor>,
        sink: Arc<dyn FrameSink>,
        store: Arc<dyn ProfileStore>,
    ) -> Result<Self, EnrollmentError> {
        config.validate()?;
        let angles = config.angle_sequence()?;
        let assembler = ProfileAssembler::new(&angles, extractor.model_id(), store);
        Ok(Self {
            angles,
            opener,
            extractor,
            sink,
            assembler,
            logger: Mutex::new(Box::new(NullSessionLogger)),
            fallback_device_index: config.fallback_device_index,
            target_fps: config.target_fps,
            stop_timeout: config.stop_timeout(),
            command_lock: Mutex::new(()),
            state: Mutex::new(SessionState::new()),
            lease: Mutex::new(None),
        })
    }

    pub fn with_logger(self, logger: Box<dyn SessionLogger>) -> Self {
        *self.logger.lock().unwrap_or_else(PoisonError::into_inner) = logger;
        self
    }

    pub fn angles(&self) -> &AngleSequence {
        &self.angles
    }

    /// Whether a profile is already stored under `user_id`.
    pub fn profile_exists(&self, user_id: &str) -> bool {
        self.assembler.store().exists(user_id)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Opens the camera (falling back to the configured secondary device) and
    /// starts the preview producer. `Idle -> AwaitingUser`; a camera that
    /// cannot be opened moves the session to `Failed`.
    pub fn start(&self, device_index: u32) -> Result<(), EnrollmentError> {
        let _command = self.lock_command();
        self.require_phase("start", &[Phase::Idle])?;

        let source = match self.open_device(device_index) {
            Ok(source) => source,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let producer = FrameProducer::new(self.target_fps, self.stop_timeout);
        producer.start(source.clone(), self.extractor.clone(), self.sink.clone())?;
        let lease = CameraLease::new(producer, source);

        let status = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                // Cancelled while the device was opening; the lease drops here.
                return Err(EnrollmentError::SessionClosed(state.phase));
            }
            *self.lock_lease() = Some(lease);
            self.transition(&mut state, Phase::AwaitingUser);
            state.status(&self.angles, Some("Camera ready, enter your name".into()))
        };
        self.sink.on_status(&status);
        Ok(())
    }

    /// `AwaitingUser -> Capturing`. An empty `name` uses `fallback` when
    /// given, otherwise fails with `InvalidUser`.
    pub fn set_user(&self, name: &str, fallback: Option<&str>) -> Result<String, EnrollmentError> {
        let _command = self.lock_command();
        self.require_phase("set_user", &[Phase::AwaitingUser])?;

        let candidate = match (name.trim().is_empty(), fallback) {
            (true, Some(fallback)) => fallback,
            _ => name,
        };
        let user_id = validate_user_id(candidate)?;

        let status = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return Err(EnrollmentError::SessionClosed(state.phase));
            }
            state.user_id = Some(user_id.clone());
            state.active_angle_index = 0;
            state.captured.clear();
            state.retry_available = false;
            self.transition(&mut state, Phase::Capturing);
            state.status(&self.angles, Some(format!("Welcome, {user_id}")))
        };
        self.log_info(&format!("Enrolling '{user_id}'"));
        self.sink.on_status(&status);
        Ok(user_id)
    }

    /// Reads a fresh frame from the camera and records it for the current
    /// angle if a face is found. Returns the captured angle.
    pub fn capture_current_angle(&self) -> Result<AngleSpec, EnrollmentError> {
        let _command = self.lock_command();
        self.require_phase("capture", &[Phase::Capturing])?;

        let (angle, source) = {
            let state = self.lock_state();
            let angle = self
                .angles
                .get(state.active_angle_index)
                .cloned()
                .ok_or(EnrollmentError::InvalidPhase {
                    command: "capture",
                    phase: state.phase,
                })?;
            let source = self
                .lock_lease()
                .as_ref()
                .map(|lease| lease.source().clone())
                .ok_or(EnrollmentError::SessionClosed(state.phase))?;
            (angle, source)
        };

        let started = Instant::now();
        let observed = self.observe(&source, &angle);
        self.log_timing("capture", started.elapsed());

        let mut state = self.lock_state();
        if state.phase.is_terminal() {
            self.log_event("capture_discarded", &angle.name);
            return Err(EnrollmentError::SessionClosed(state.phase));
        }
        let (frame, landmarks) = match observed {
            Ok(observation) => observation,
            Err(e) => {
                state.retry_available = false;
                drop(state);
                self.log_event("capture_failed", &format!("{}: {e}", angle.name));
                if e.is_fatal() {
                    self.fail(&e);
                }
                return Err(e);
            }
        };

        state.captured.push(CapturedAngle {
            angle: angle.clone(),
            image: frame,
            landmarks,
            captured_at: Local::now(),
        });
        state.active_angle_index += 1;
        state.retry_available = true;
        let message = if state.active_angle_index == self.angles.len() {
            self.transition(&mut state, Phase::ReadyToFinalize);
            "All angles captured".to_string()
        } else {
            format!("Captured {}", angle.name)
        };
        let status = state.status(&self.angles, Some(message));
        drop(state);

        self.log_event("captured", &angle.name);
        self.sink.on_status(&status);
        Ok(angle)
    }

    /// Discards the most recent capture so its angle can be taken again.
    /// Allowed only right after a successful capture. Returns the angle to
    /// retake.
    ///
    /// Besides `Capturing`, this is also accepted in `ReadyToFinalize`, so
    /// the last photo can be retaken before saving. The session then goes
    /// back to `Capturing` for that angle.
    pub fn retry_current_angle(&self) -> Result<AngleSpec, EnrollmentError> {
        let _command = self.lock_command();
        self.require_phase("retry", &[Phase::Capturing, Phase::ReadyToFinalize])?;

        let (angle, status) = {
            let mut state = self.lock_state();
            if !state.retry_available {
                return Err(EnrollmentError::NothingToRetry);
            }
            let discarded = state.captured.pop().ok_or(EnrollmentError::NothingToRetry)?;
            state.active_angle_index -= 1;
            state.retry_available = false;
            if state.phase != Phase::Capturing {
                self.transition(&mut state, Phase::Capturing);
            }
            let status = state.status(
                &self.angles,
                Some(format!("Retake {}", discarded.angle.name)),
            );
            (discarded.angle, status)
        };

        self.log_event("retry", &angle.name);
        self.sink.on_status(&status);
        Ok(angle)
    }

    /// Stops the camera, assembles the profile and persists it.
    /// `ReadyToFinalize -> Finalized`, or `Failed` if assembly or
    /// persistence fails.
    pub fn finalize(&self) -> Result<FinalizedProfile, EnrollmentError> {
        let _command = self.lock_command();
        self.require_phase("finalize", &[Phase::ReadyToFinalize])?;

        let (user_id, captured) = {
            let state = self.lock_state();
            let user_id = state
                .user_id
                .clone()
                .ok_or_else(|| EnrollmentError::InvalidUser("no user set".into()))?;
            (user_id, state.captured.clone())
        };

        self.release_camera();

        let started = Instant::now();
        let result = self
            .assembler
            .assemble(&user_id, &captured, Local::now())
            .and_then(|assembled| {
                let location = self.assembler.persist(&assembled)?;
                Ok(FinalizedProfile {
                    assembled,
                    location,
                })
            });
        self.log_timing("finalize", started.elapsed());

        match result {
            Ok(finalized) => {
                let status = {
                    let mut state = self.lock_state();
                    if state.phase.is_terminal() {
                        log::warn!(
                            "Session closed during finalize; profile for '{user_id}' was written to {}",
                            finalized.location.display()
                        );
                        return Err(EnrollmentError::SessionClosed(state.phase));
                    }
                    self.transition(&mut state, Phase::Finalized);
                    state.status(
                        &self.angles,
                        Some(format!("Profile saved for {user_id}")),
                    )
                };
                self.sink.on_status(&status);
                self.log_summary();
                Ok(finalized)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Abandons the session from any non-terminal phase: stops the producer,
    /// releases the camera and drops every capture.
    pub fn cancel(&self) -> Result<(), EnrollmentError> {
        let status = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return Err(EnrollmentError::SessionClosed(state.phase));
            }
            state.captured.clear();
            state.active_angle_index = 0;
            state.retry_available = false;
            self.transition(&mut state, Phase::Cancelled);
            state.status(&self.angles, Some("Enrollment cancelled".into()))
        };

        self.release_camera();
        self.sink.on_status(&status);
        self.log_summary();
        Ok(())
    }

    pub fn get_state(&self) -> SessionSnapshot {
        self.lock_state().snapshot(&self.angles)
    }

    pub fn status(&self) -> StatusRecord {
        self.lock_state().status(&self.angles, None)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock_command(&self) -> MutexGuard<'_, ()> {
        self.command_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lease(&self) -> MutexGuard<'_, Option<CameraLease>> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Terminal phases reject with `SessionClosed`, other unexpected phases
    /// with `InvalidPhase`. Never mutates state.
    fn require_phase(&self, command: &'static str, allowed: &[Phase]) -> Result<(), EnrollmentError> {
        let phase = self.lock_state().phase;
        if phase.is_terminal() {
            Err(EnrollmentError::SessionClosed(phase))
        } else if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(EnrollmentError::InvalidPhase { command, phase })
        }
    }

    fn open_device(&self, device_index: u32) -> Result<Arc<dyn FrameSource>, EnrollmentError> {
        let primary = match self.opener.open(device_index) {
            Ok(source) => return Ok(source),
            Err(e) => e,
        };
        log::warn!("Camera {device_index} unavailable: {primary}");

        match self.fallback_device_index.filter(|&f| f != device_index) {
            Some(fallback) => match self.opener.open(fallback) {
                Ok(source) => {
                    self.log_info(&format!("Using fallback camera {fallback}"));
                    Ok(source)
                }
                Err(e) => {
                    log::warn!("Fallback camera {fallback} unavailable: {e}");
                    Err(EnrollmentError::DeviceUnavailable {
                        device_index,
                        source: primary,
                    })
                }
            },
            None => Err(EnrollmentError::DeviceUnavailable {
                device_index,
                source: primary,
            }),
        }
    }

    /// One authoritative frame plus its landmarks, read directly from the
    /// camera rather than from the preview. Landmarks must have the
    /// extractor's declared dimension.
    fn observe(
        &self,
        source: &Arc<dyn FrameSource>,
        angle: &AngleSpec,
    ) -> Result<(Frame, LandmarkVector), EnrollmentError> {
        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(EnrollmentError::SourceExhausted("end of stream".into())),
            Err(e) => return Err(EnrollmentError::SourceExhausted(e.to_string())),
        };
        match self.extractor.detect(&frame) {
            Ok(Some(landmarks)) if landmarks.len() != self.extractor.dimension() => {
                Err(EnrollmentError::DimensionMismatch {
                    angle: angle.name.clone(),
                    expected: self.extractor.dimension(),
                    actual: landmarks.len(),
                })
            }
            Ok(Some(landmarks)) => Ok((frame, landmarks)),
            Ok(None) => Err(EnrollmentError::NoFaceDetected),
            Err(e) => Err(EnrollmentError::Detection(e.to_string())),
        }
    }

    fn release_camera(&self) {
        let lease = self.lock_lease().take();
        if let Some(lease) = lease {
            if lease.close() == StopOutcome::TimedOut {
                self.log_event("stop_timeout", "producer did not exit in time");
            }
        }
    }

    /// Moves to `Failed`, releasing the camera and reporting the cause.
    fn fail(&self, error: &EnrollmentError) {
        let status = {
            let mut state = self.lock_state();
            if state.phase.is_terminal() {
                return;
            }
            state.failure = Some(error.to_string());
            self.transition(&mut state, Phase::Failed);
            state.status(&self.angles, Some(error.to_string()))
        };
        self.release_camera();
        log::error!("Enrollment failed: {error}");
        self.sink.on_status(&status);
        self.log_summary();
    }

    fn transition(&self, state: &mut SessionState, to: Phase) {
        let from = state.phase;
        state.phase = to;
        self.log_event("phase", &format!("{from:?} -> {to:?}"));
    }

    fn log_event(&self, kind: &str, detail: &str) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .event(kind, detail);
    }

    fn log_info(&self, message: &str) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .info(message);
    }

    fn log_timing(&self, stage: &str, elapsed: Duration) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timing(stage, elapsed.as_secs_f64() * 1000.0);
    }

    fn log_summary(&self) {
        self.logger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary();
    }
}

//! Terminal front-end: status lines on stderr, single-letter commands on stdin.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use chrono::Local;

use faceenroll_core::capture::domain::frame_sink::FrameSink;
use faceenroll_core::enrollment::capture_session::{timestamp_user_id, CaptureSession};
use faceenroll_core::enrollment::enrollment_error::EnrollmentError;
use faceenroll_core::enrollment::session_state::{Phase, StatusRecord};
use faceenroll_core::shared::frame::Frame;

const FACE_UNKNOWN: u8 = 0;
const FACE_ABSENT: u8 = 1;
const FACE_PRESENT: u8 = 2;

/// Prints session status and face-presence changes to stderr.
pub struct TerminalSink {
    face: AtomicU8,
    frames: AtomicUsize,
    source_lost: AtomicBool,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self {
            face: AtomicU8::new(FACE_UNKNOWN),
            frames: AtomicUsize::new(0),
            source_lost: AtomicBool::new(false),
        }
    }

    pub fn source_lost(&self) -> bool {
        self.source_lost.load(Ordering::SeqCst)
    }

    pub fn frames_seen(&self) -> usize {
        self.frames.load(Ordering::Relaxed)
    }
}

impl FrameSink for TerminalSink {
    fn on_frame(&self, _frame: &Frame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn on_face_detected(&self, detected: bool) {
        let now = if detected { FACE_PRESENT } else { FACE_ABSENT };
        if self.face.swap(now, Ordering::Relaxed) != now {
            eprintln!(
                "  [{}]",
                if detected { "face detected" } else { "no face in view" }
            );
        }
    }

    fn on_status(&self, status: &StatusRecord) {
        eprintln!("{}", describe_status(status));
    }

    fn on_source_lost(&self, reason: &str) {
        self.source_lost.store(true, Ordering::SeqCst);
        eprintln!("Camera lost: {reason}");
    }
}

fn describe_status(status: &StatusRecord) -> String {
    let mut line = match status.phase {
        Phase::Capturing => format!(
            "Photo {}/{}: {}",
            status.active_angle_index + 1,
            status.total_angles,
            status.instruction_text.as_deref().unwrap_or("")
        ),
        Phase::ReadyToFinalize => format!("All {} photos taken", status.total_angles),
        phase => format!("{phase:?}"),
    };
    if let Some(message) = &status.message {
        line = format!("{line}  ({message})");
    }
    line
}

type Lines<'a> = io::Lines<io::StdinLock<'a>>;

fn prompt(lines: &mut Lines<'_>, text: &str) -> io::Result<Option<String>> {
    eprint!("{text}");
    io::stderr().flush()?;
    lines.next().transpose()
}

fn confirm(lines: &mut Lines<'_>, question: &str) -> io::Result<bool> {
    Ok(prompt(lines, question)?
        .map(|answer| matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
        .unwrap_or(false))
}

/// Errors the user can recover from by trying again.
fn is_recoverable(error: &EnrollmentError) -> bool {
    matches!(
        error,
        EnrollmentError::NoFaceDetected
            | EnrollmentError::Detection(_)
            | EnrollmentError::InvalidPhase { .. }
            | EnrollmentError::NothingToRetry
    )
}

fn print_help() {
    eprintln!("Commands: [s]/Enter capture, [r] retake last photo, [f] save profile, [q] cancel");
}

fn abandon(session: &CaptureSession) {
    if let Err(e) = session.cancel() {
        log::debug!("Cancel after exit: {e}");
    }
}

pub fn run(
    session: &CaptureSession,
    sink: &TerminalSink,
    device_index: u32,
    user: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    session.start(device_index)?;

    let name = match user {
        Some(user) => user.to_string(),
        None => prompt(&mut lines, "Name (blank for automatic): ")?.unwrap_or_default(),
    };
    let fallback = timestamp_user_id(Local::now());
    let user_id = if name.trim().is_empty() {
        fallback.clone()
    } else {
        name.trim().to_string()
    };
    if session.profile_exists(&user_id)
        && !confirm(
            &mut lines,
            &format!("A profile for '{user_id}' already exists. Overwrite? [y/N] "),
        )?
    {
        abandon(session);
        return Ok(());
    }
    session.set_user(&name, Some(&fallback))?;
    print_help();

    loop {
        if sink.source_lost() {
            abandon(session);
            return Err("camera disconnected during enrollment".into());
        }

        let text = match session.get_state().phase {
            Phase::ReadyToFinalize => "[f] save  [r] retake  [q] cancel > ",
            _ => "[s] capture  [r] retake  [q] cancel > ",
        };
        let Some(line) = prompt(&mut lines, text)? else {
            abandon(session);
            return Err("input closed before enrollment finished".into());
        };

        let outcome = match line.trim() {
            "" | "s" => session
                .capture_current_angle()
                .map(|angle| eprintln!("Captured {}", angle.name)),
            "r" => session
                .retry_current_angle()
                .map(|angle| eprintln!("Retake {}", angle.name)),
            "f" => match session.finalize() {
                Ok(finalized) => {
                    let profile = &finalized.assembled.profile;
                    eprintln!(
                        "Profile for '{}' saved to {} ({} photos, {} landmark values, {} preview frames)",
                        profile.name,
                        finalized.location.display(),
                        profile.photo_count,
                        profile.total_landmarks,
                        sink.frames_seen()
                    );
                    return Ok(());
                }
                Err(e) => Err(e),
            },
            "q" => {
                if confirm(&mut lines, "Cancel enrollment? [y/N] ")? {
                    session.cancel()?;
                    return Ok(());
                }
                Ok(())
            }
            "h" | "?" => {
                print_help();
                Ok(())
            }
            other => {
                eprintln!("Unknown command '{other}'");
                Ok(())
            }
        };

        match outcome {
            Err(e) if is_recoverable(&e) => eprintln!("{e}"),
            Err(e) => {
                abandon(session);
                return Err(e.into());
            }
            Ok(()) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(phase: Phase, index: usize, message: Option<&str>) -> StatusRecord {
        StatusRecord {
            phase,
            user_id: Some("alice".into()),
            active_angle_index: index,
            total_angles: 3,
            instruction_text: Some("Turn left".into()),
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_capturing_status_is_one_based() {
        let line = describe_status(&status(Phase::Capturing, 1, None));
        assert_eq!(line, "Photo 2/3: Turn left");
    }

    #[test]
    fn test_status_appends_message() {
        let line = describe_status(&status(Phase::Cancelled, 0, Some("Enrollment cancelled")));
        assert_eq!(line, "Cancelled  (Enrollment cancelled)");
    }

    #[test]
    fn test_face_changes_are_tracked() {
        let sink = TerminalSink::new();
        sink.on_face_detected(true);
        assert_eq!(sink.face.load(Ordering::Relaxed), FACE_PRESENT);
        sink.on_face_detected(false);
        assert_eq!(sink.face.load(Ordering::Relaxed), FACE_ABSENT);
    }

    #[test]
    fn test_source_lost_sets_flag() {
        let sink = TerminalSink::new();
        assert!(!sink.source_lost());
        sink.on_source_lost("unplugged");
        assert!(sink.source_lost());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(is_recoverable(&EnrollmentError::NoFaceDetected));
        assert!(is_recoverable(&EnrollmentError::NothingToRetry));
        assert!(!is_recoverable(&EnrollmentError::SourceExhausted("gone".into())));
        assert!(!is_recoverable(&EnrollmentError::SessionClosed(Phase::Cancelled)));
    }
}

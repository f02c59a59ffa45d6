//! JSON-lines front-end for remote clients: one request object per stdin
//! line, one event object per stdout line.
//!
//! Requests: `{"cmd": "start", "device": 0}`, `{"cmd": "set_user", "name": "alice"}`,
//! `{"cmd": "capture"}`, `{"cmd": "retry"}`, `{"cmd": "finalize"}`,
//! `{"cmd": "cancel"}`, `{"cmd": "state"}`.
//!
//! Events: `frame` (base64 JPEG), `face_detected`, `status`, `source_lost`
//! and a `reply` for every request.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Local;
use crossbeam_channel::{select, Receiver};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use faceenroll_core::capture::infrastructure::channel_sink::{ChannelSink, SinkEvent};
use faceenroll_core::enrollment::capture_session::{timestamp_user_id, CaptureSession};
use faceenroll_core::enrollment::enrollment_config::EnrollmentConfig;
use faceenroll_core::enrollment::enrollment_error::EnrollmentError;
use faceenroll_core::enrollment::session_state::{SessionSnapshot, StatusRecord};

/// Sink events buffered for the writer; preview frames beyond this are dropped.
const EVENT_BUFFER: usize = 8;

#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request {
    Start {
        #[serde(default)]
        device: Option<u32>,
    },
    SetUser {
        #[serde(default)]
        name: String,
    },
    Capture,
    Retry,
    Finalize,
    Cancel,
    State,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::SetUser { .. } => "set_user",
            Self::Capture => "capture",
            Self::Retry => "retry",
            Self::Finalize => "finalize",
            Self::Cancel => "cancel",
            Self::State => "state",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    Frame {
        index: usize,
        width: u32,
        height: u32,
        jpeg: String,
    },
    FaceDetected {
        detected: bool,
    },
    Status {
        status: StatusRecord,
    },
    SourceLost {
        reason: String,
    },
    Reply {
        cmd: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}


/// The sink handed to the session, and the receiver the writer drains.
pub fn json_lines_sink() -> (ChannelSink, Receiver<SinkEvent>) {
    ChannelSink::new(EVENT_BUFFER)
}

pub fn run(
    session: CaptureSession,
    events: Receiver<SinkEvent>,
    config: &EnrollmentConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let out = Arc::new(Mutex::new(io::stdout()));
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
    let writer = spawn_event_writer(events, shutdown_rx, out.clone(), config.jpeg_quality);

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(&session, request, config.device_index),
            Err(e) => Event::Reply {
                cmd: String::from("invalid"),
                ok: false,
                error: Some(e.to_string()),
                data: None,
            },
        };
        write_line(&*out, &reply)?;
    }

    // Input closed: leave nothing running.
    if !session.get_state().phase.is_terminal() {
        session.cancel()?;
    }
    drop(session);

    // A producer that timed out on a stuck read still holds a sink sender,
    // so the writer is ended explicitly rather than by disconnection.
    drop(shutdown_tx);
    match writer.join() {
        Ok(result) => result?,
        Err(_) => return Err("event writer panicked".into()),
    }
    Ok(())
}

fn handle(session: &CaptureSession, request: Request, default_device: u32) -> Event {
    let cmd = request.name();
    let result: Result<Option<Value>, EnrollmentError> = match request {
        Request::Start { device } => session.start(device.unwrap_or(default_device)).map(|()| None),
        Request::SetUser { name } => session
            .set_user(&name, Some(&timestamp_user_id(Local::now())))
            .map(|user_id| Some(json!({ "user_id": user_id }))),
        Request::Capture => session
            .capture_current_angle()
            .map(|angle| Some(json!({ "angle": angle.name }))),
        Request::Retry => session
            .retry_current_angle()
            .map(|angle| Some(json!({ "angle": angle.name }))),
        Request::Finalize => session.finalize().map(|finalized| {
            Some(json!({
                "profile_dir": finalized.location,
                "profile": finalized.assembled.profile,
            }))
        }),
        Request::Cancel => session.cancel().map(|()| None),
        Request::State => Ok(Some(snapshot_json(&session.get_state()))),
    };

    match result {
        Ok(data) => Event::Reply {
            cmd: cmd.to_string(),
            ok: true,
            error: None,
            data,
        },
        Err(e) => {
            log::debug!("{cmd} failed: {e}");
            Event::Reply {
                cmd: cmd.to_string(),
                ok: false,
                error: Some(e.to_string()),
                data: None,
            }
        }
    }
}

fn snapshot_json(snapshot: &SessionSnapshot) -> Value {
    json!({
        "phase": snapshot.phase,
        "user_id": snapshot.user_id,
        "active_angle_index": snapshot.active_angle_index,
        "total_angles": snapshot.total_angles,
        "captured": snapshot.captured_names(),
        "failure": snapshot.failure,
    })
}

/// Converts sink events to wire events, encoding frames as base64 JPEG.
/// Frames that fail to encode are logged and skipped.
fn to_event(event: SinkEvent, jpeg_quality: u8) -> Option<Event> {
    match event {
        SinkEvent::Frame(frame) => match frame.encode_jpeg(jpeg_quality) {
            Ok(bytes) => Some(Event::Frame {
                index: frame.index(),
                width: frame.width(),
                height: frame.height(),
                jpeg: STANDARD.encode(bytes),
            }),
            Err(e) => {
                log::warn!("Skipping frame {}: {e}", frame.index());
                None
            }
        },
        SinkEvent::FaceDetected(detected) => Some(Event::FaceDetected { detected }),
        SinkEvent::Status(status) => Some(Event::Status { status }),
        SinkEvent::SourceLost(reason) => Some(Event::SourceLost { reason }),
    }
}

/// Writes sink events until the sink disconnects or `shutdown` is dropped.
/// On shutdown at most one buffer's worth of pending events is flushed.
fn spawn_event_writer<W: Write + Send + 'static>(
    events: Receiver<SinkEvent>,
    shutdown: Receiver<()>,
    out: Arc<Mutex<W>>,
    jpeg_quality: u8,
) -> JoinHandle<io::Result<()>> {
    std::thread::spawn(move || {
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => write_event(&*out, event, jpeg_quality)?,
                    Err(_) => return Ok(()),
                },
                recv(shutdown) -> _ => break,
            }
        }
        for event in events.try_iter().take(EVENT_BUFFER) {
            write_event(&*out, event, jpeg_quality)?;
        }
        Ok(())
    })
}

fn write_event<W: Write>(out: &Mutex<W>, event: SinkEvent, jpeg_quality: u8) -> io::Result<()> {
    match to_event(event, jpeg_quality) {
        Some(event) => write_line(out, &event),
        None => Ok(()),
    }
}

fn write_line<W: Write>(out: &Mutex<W>, event: &Event) -> io::Result<()> {
    let line = serde_json::to_string(event)?;
    let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(out, "{line}")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceenroll_core::enrollment::session_state::Phase;
    use faceenroll_core::shared::frame::Frame;

    #[test]
    fn test_parses_requests() {
        let start: Request = serde_json::from_str(r#"{"cmd":"start","device":1}"#).unwrap();
        assert_eq!(start, Request::Start { device: Some(1) });

        let start: Request = serde_json::from_str(r#"{"cmd":"start"}"#).unwrap();
        assert_eq!(start, Request::Start { device: None });

        let user: Request = serde_json::from_str(r#"{"cmd":"set_user","name":"alice"}"#).unwrap();
        assert_eq!(user.name(), "set_user");

        let capture: Request = serde_json::from_str(r#"{"cmd":"capture"}"#).unwrap();
        assert_eq!(capture, Request::Capture);
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"explode"}"#).is_err());
    }

    #[test]
    fn test_frame_event_is_base64_jpeg() {
        let frame = Frame::new(vec![90u8; 8 * 6 * 3], 8, 6, 3, 4);
        let event = to_event(SinkEvent::Frame(frame), 75).unwrap();
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "frame");
        assert_eq!(json["index"], 4);
        assert_eq!(json["width"], 8);
        let bytes = STANDARD.decode(json["jpeg"].as_str().unwrap()).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_status_event_shape() {
        let status = StatusRecord {
            phase: Phase::Capturing,
            user_id: Some("alice".into()),
            active_angle_index: 1,
            total_angles: 3,
            instruction_text: Some("Turn left".into()),
            message: None,
        };
        let json = serde_json::to_value(to_event(SinkEvent::Status(status), 75).unwrap()).unwrap();
        assert_eq!(json["event"], "status");
        assert_eq!(json["status"]["phase"], "capturing");
        assert_eq!(json["status"]["active_angle_index"], 1);
    }

    #[test]
    fn test_writer_ends_on_shutdown_while_sink_is_still_held() {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let out = Arc::new(Mutex::new(Vec::<u8>::new()));
        let writer = spawn_event_writer(events_rx, shutdown_rx, out.clone(), 75);

        events_tx.send(SinkEvent::FaceDetected(true)).unwrap();
        events_tx
            .send(SinkEvent::SourceLost("end of stream".into()))
            .unwrap();
        drop(shutdown_tx);

        writer.join().unwrap().unwrap();
        let written = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "face_detected");
        assert_eq!(lines[1]["event"], "source_lost");
        drop(events_tx);
    }

    #[test]
    fn test_writer_ends_when_sink_disconnects() {
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_BUFFER);
        let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let out = Arc::new(Mutex::new(Vec::<u8>::new()));
        let writer = spawn_event_writer(events_rx, shutdown_rx, out.clone(), 75);

        events_tx.send(SinkEvent::FaceDetected(false)).unwrap();
        drop(events_tx);

        writer.join().unwrap().unwrap();
        let written = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        assert!(written.contains("\"detected\":false"));
    }

    #[test]
    fn test_failed_reply_omits_data() {
        let reply = Event::Reply {
            cmd: "capture".into(),
            ok: false,
            error: Some("no face detected, adjust position and try again".into()),
            data: None,
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["event"], "reply");
        assert_eq!(json["ok"], false);
        assert!(json.get("data").is_none());
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::capture::domain::frame_sink::FrameSink;
use crate::enrollment::session_state::StatusRecord;
use crate::shared::frame::Frame;

/// How long a status event may wait for room before it is logged and dropped.
const CONTROL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Frame(Frame),
    FaceDetected(bool),
    Status(StatusRecord),
    SourceLost(String),
}

/// Forwards sink callbacks into a bounded channel for a consumer thread.
///
/// Preview events never block the producer: when the consumer falls behind,
/// frames and face flags are dropped and counted. Status and source-lost
/// events wait briefly for room, since a front-end must see them.
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<SinkEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, crossbeam_channel::Receiver<SinkEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Preview events discarded because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn offer(&self, event: SinkEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn deliver(&self, event: SinkEvent) {
        if let Err(e) = self.tx.send_timeout(event, CONTROL_SEND_TIMEOUT) {
            log::warn!("Sink consumer unavailable, dropping event: {:?}", e.into_inner());
        }
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&self, frame: &Frame) {
        self.offer(SinkEvent::Frame(frame.clone()));
    }

    fn on_face_detected(&self, detected: bool) {
        self.offer(SinkEvent::FaceDetected(detected));
    }

    fn on_status(&self, status: &StatusRecord) {
        self.deliver(SinkEvent::Status(status.clone()));
    }

    fn on_source_lost(&self, reason: &str) {
        self.deliver(SinkEvent::SourceLost(reason.to_string()));
    }
}

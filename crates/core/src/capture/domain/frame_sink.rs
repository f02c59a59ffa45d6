use crate::enrollment::session_state::StatusRecord;
use crate::shared::frame::Frame;

/// Receiver of live preview output and session status.
///
/// `on_frame` and `on_face_detected` run on the frame producer's thread at up
/// to the producer's rate cap; `on_status` runs on whichever thread issued
/// the session command. Implementations must not block for long and must
/// tolerate interleaving between the two.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &Frame);

    fn on_face_detected(&self, detected: bool);

    fn on_status(&self, status: &StatusRecord);

    /// The camera stopped producing frames. The producer has exited; the
    /// owning front-end decides whether to cancel the session.
    fn on_source_lost(&self, reason: &str);
}

use std::sync::Arc;

use crate::shared::frame::Frame;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// An open camera handle.
///
/// `read` is called both by the frame producer's thread and by capture
/// commands on the caller's thread, so implementations serialise access
/// internally. Reads are not required to interleave atomically.
pub trait FrameSource: Send + Sync {
    /// Blocks for the next frame. `Ok(None)` means end-of-stream.
    fn read(&self) -> Result<Option<Frame>, SourceError>;

    /// Closes the device. Idempotent and callable from any thread; reads
    /// after release return end-of-stream.
    fn release(&self);

    /// Human-readable device description for logs.
    fn describe(&self) -> String {
        String::from("frame source")
    }
}

/// Opens camera devices by index.
pub trait FrameSourceOpener: Send + Sync {
    fn open(&self, device_index: u32) -> Result<Arc<dyn FrameSource>, SourceError>;
}

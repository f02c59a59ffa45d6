use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::capture::domain::frame_sink::FrameSink;
use crate::capture::domain::frame_source::FrameSource;
use crate::detection::domain::landmark_extractor::LandmarkExtractor;
use crate::enrollment::enrollment_error::EnrollmentError;

/// Frames between periodic debug log lines.
const LOG_EVERY_FRAMES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running.
    NotRunning,
    /// The loop exited within the timeout.
    Clean,
    /// The loop did not exit in time (typically stuck in a camera read).
    /// The source was released anyway and the thread was detached.
    TimedOut,
}

struct RunningLoop {
    /// Dropping the sender is the stop signal.
    stop_tx: Sender<()>,
    /// Disconnects when the loop thread exits.
    done_rx: Receiver<()>,
    source: Arc<dyn FrameSource>,
    handle: JoinHandle<()>,
}

/// Background loop publishing preview frames and face presence to a sink.
///
/// Runs on its own thread at a capped rate. `stop` is idempotent and may be
/// called from any thread; it waits a bounded time for the loop to exit and
/// always releases the source.
pub struct FrameProducer {
    interval: Duration,
    stop_timeout: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl FrameProducer {
    pub fn new(target_fps: f64, stop_timeout: Duration) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / target_fps.max(f64::EPSILON)),
            stop_timeout,
            running: Mutex::new(None),
        }
    }

    pub fn start(
        &self,
        source: Arc<dyn FrameSource>,
        extractor: Arc<dyn LandmarkExtractor>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<(), EnrollmentError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = running.as_ref() {
            if !active.handle.is_finished() {
                return Err(EnrollmentError::AlreadyRunning);
            }
            // The previous loop ended on its own (source lost); reap it.
            if let Some(finished) = running.take() {
                finished.source.release();
                let _ = finished.handle.join();
            }
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let interval = self.interval;
        let loop_source = source.clone();

        let handle = std::thread::spawn(move || {
            let _done = done_tx;
            run_loop(loop_source, extractor, sink, stop_rx, interval);
        });

        log::debug!("Frame producer started on {}", source.describe());
        *running = Some(RunningLoop {
            stop_tx,
            done_rx,
            source,
            handle,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn stop(&self) -> StopOutcome {
        let Some(active) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return StopOutcome::NotRunning;
        };

        drop(active.stop_tx);
        let outcome = match active.done_rx.recv_timeout(self.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => StopOutcome::TimedOut,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => StopOutcome::Clean,
        };
        active.source.release();

        match outcome {
            StopOutcome::Clean => {
                if active.handle.join().is_err() {
                    log::warn!("Frame producer thread panicked");
                }
                log::debug!("Frame producer stopped");
            }
            _ => log::warn!(
                "Frame producer did not stop within {:?}; source released, thread detached",
                self.stop_timeout
            ),
        }
        outcome
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty))
}

fn run_loop(
    source: Arc<dyn FrameSource>,
    extractor: Arc<dyn LandmarkExtractor>,
    sink: Arc<dyn FrameSink>,
    stop_rx: Receiver<()>,
    interval: Duration,
) {
    let mut published = 0usize;
    loop {
        let tick = Instant::now();
        if stop_requested(&stop_rx) {
            break;
        }

        let read = source.read();
        // A stop that arrived during the read wins over whatever it returned.
        if stop_requested(&stop_rx) {
            break;
        }
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::warn!("Frame source reached end of stream");
                sink.on_source_lost("end of stream");
                break;
            }
            Err(e) => {
                log::warn!("Frame source failed: {e}");
                sink.on_source_lost(&e.to_string());
                break;
            }
        };

        let detected = match extractor.detect(&frame) {
            Ok(landmarks) => landmarks.is_some(),
            Err(e) => {
                log::warn!("Landmark detection failed on frame {}: {e}", frame.index());
                false
            }
        };
        sink.on_frame(&frame);
        sink.on_face_detected(detected);

        published += 1;
        if published % LOG_EVERY_FRAMES == 0 {
            log::debug!(
                "Published {published} frames (last read+detect {:.1}ms, face: {detected})",
                tick.elapsed().as_secs_f64() * 1000.0
            );
        }

        let remaining = interval.saturating_sub(tick.elapsed());
        match stop_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("Frame producer loop exited after {published} frames");
}

/// A camera handle paired with the producer reading it.
///
/// Dropping the lease stops the producer and releases the camera on every
/// exit path, including unwinding.
pub struct CameraLease {
    producer: FrameProducer,
    source: Arc<dyn FrameSource>,
}

impl CameraLease {
    pub fn new(producer: FrameProducer, source: Arc<dyn FrameSource>) -> Self {
        Self { producer, source }
    }

    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }

    pub fn producer(&self) -> &FrameProducer {
        &self.producer
    }

    /// Stops the producer and releases the camera.
    pub fn close(&self) -> StopOutcome {
        let outcome = self.producer.stop();
        self.source.release();
        outcome
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.close();
    }
}

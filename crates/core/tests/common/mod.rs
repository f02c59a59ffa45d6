#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use faceenroll_core::capture::domain::frame_sink::FrameSink;
use faceenroll_core::capture::domain::frame_source::{FrameSource, FrameSourceOpener, SourceError};
use faceenroll_core::detection::domain::landmark_extractor::{
    DetectError, LandmarkExtractor, LandmarkVector,
};
use faceenroll_core::enrollment::capture_session::CaptureSession;
use faceenroll_core::enrollment::enrollment_config::EnrollmentConfig;
use faceenroll_core::enrollment::session_state::StatusRecord;
use faceenroll_core::profile::domain::biometric_profile::{AssembledProfile, BiometricProfile};
use faceenroll_core::profile::domain::profile_store::{ProfileStore, StoreError};
use faceenroll_core::shared::frame::Frame;

/// Endless camera producing distinct frames; counts releases.
pub struct FakeCamera {
    reads: AtomicUsize,
    pub released: AtomicUsize,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl FrameSource for FakeCamera {
    fn read(&self) -> Result<Option<Frame>, SourceError> {
        if self.released.load(Ordering::SeqCst) > 0 {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(1));
        let i = self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Frame::new(vec![(i % 251) as u8; 4 * 4 * 3], 4, 4, 3, i)))
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeOpener {
    pub camera: Arc<FakeCamera>,
}

impl FrameSourceOpener for FakeOpener {
    fn open(&self, device_index: u32) -> Result<Arc<dyn FrameSource>, SourceError> {
        if device_index == 0 {
            Ok(self.camera.clone())
        } else {
            Err(format!("no camera at index {device_index}").into())
        }
    }
}

/// Detects whatever the test set last.
pub struct ControlledDetector {
    next: Mutex<Option<LandmarkVector>>,
    dimension: usize,
}

impl ControlledDetector {
    pub fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(Some(vec![0.0; dimension])),
            dimension,
        })
    }

    pub fn face(&self, landmarks: Vec<f32>) {
        *self.next.lock().unwrap() = Some(landmarks);
    }

    pub fn no_face(&self) {
        *self.next.lock().unwrap() = None;
    }
}

impl LandmarkExtractor for ControlledDetector {
    fn detect(&self, _frame: &Frame) -> Result<Option<LandmarkVector>, DetectError> {
        Ok(self.next.lock().unwrap().clone())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "controlled_detector"
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub statuses: Mutex<Vec<StatusRecord>>,
    pub frames: AtomicUsize,
}

impl FrameSink for CollectingSink {
    fn on_frame(&self, _frame: &Frame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn on_face_detected(&self, _detected: bool) {}

    fn on_status(&self, status: &StatusRecord) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn on_source_lost(&self, _reason: &str) {}
}

/// Keeps saved profiles in memory; `fail` makes every save error.
#[derive(Default)]
pub struct InMemoryStore {
    pub saved: Mutex<Vec<AssembledProfile>>,
    pub fail: AtomicBool,
}

impl ProfileStore for InMemoryStore {
    fn save(&self, profile: &AssembledProfile) -> Result<PathBuf, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("disk full".into());
        }
        self.saved.lock().unwrap().push(profile.clone());
        Ok(PathBuf::from(profile.user_id()))
    }

    fn exists(&self, user_id: &str) -> bool {
        self.saved.lock().unwrap().iter().any(|p| p.user_id() == user_id)
    }

    fn load(&self, user_id: &str) -> Result<Option<BiometricProfile>, StoreError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.user_id() == user_id)
            .map(|p| p.profile.clone()))
    }
}

pub struct Rig {
    pub session: CaptureSession,
    pub camera: Arc<FakeCamera>,
    pub detector: Arc<ControlledDetector>,
    pub sink: Arc<CollectingSink>,
    pub store: Arc<InMemoryStore>,
}

pub fn rig(dimension: usize) -> Rig {
    rig_with_store(dimension, Arc::new(InMemoryStore::default()))
}

pub fn rig_with_store(dimension: usize, store: Arc<InMemoryStore>) -> Rig {
    let camera = FakeCamera::new();
    let detector = ControlledDetector::new(dimension);
    let sink = Arc::new(CollectingSink::default());
    let config = EnrollmentConfig {
        target_fps: 60.0,
        fallback_device_index: None,
        ..EnrollmentConfig::default()
    };
    let session = CaptureSession::new(
        &config,
        Arc::new(FakeOpener {
            camera: camera.clone(),
        }),
        detector.clone(),
        sink.clone(),
        store.clone(),
    )
    .unwrap();
    Rig {
        session,
        camera,
        detector,
        sink,
        store,
    }
}

pub const LANDMARK_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const LANDMARK_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

/// Identifier written into every persisted profile record.
pub const LANDMARK_MODEL_ID: &str = "yolo11n_pose_widerface_5pt_v1";

/// Five keypoints, each `(x, y, confidence)` normalised to the frame.
pub const LANDMARK_DIMENSION: usize = 15;

/// Producer throughput cap.
pub const DEFAULT_TARGET_FPS: f64 = 30.0;

/// Bounded wait for the producer thread to observe a stop request.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 2000;

pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

pub const PROFILE_FILE_NAME: &str = "profile.json";
pub const REFERENCE_IMAGE_NAME: &str = "reference.jpg";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Application directory name under the platform config/data/cache roots.
pub const APP_DIR_NAME: &str = "FaceEnroll";

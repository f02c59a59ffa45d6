use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::capture::domain::frame_source::{FrameSource, FrameSourceOpener, SourceError};
use crate::shared::frame::Frame;

/// ffmpeg input formats that read from a local camera, by platform.
#[cfg(target_os = "linux")]
const CAPTURE_FORMATS: &[&str] = &["video4linux2", "v4l2"];
#[cfg(target_os = "macos")]
const CAPTURE_FORMATS: &[&str] = &["avfoundation"];
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const CAPTURE_FORMATS: &[&str] = &["vfwcap", "dshow"];

/// Highest device index probed when the platform has no device nodes to scan.
#[cfg(not(target_os = "linux"))]
const MAX_PROBED_DEVICES: u32 = 4;

/// Opens cameras through libavdevice, requesting a resolution and frame rate.
///
/// The device may ignore the request; frames carry whatever size the
/// decoder reports.
pub struct FfmpegCameraOpener {
    width: u32,
    height: u32,
    fps: f64,
}

impl FfmpegCameraOpener {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }
}

impl FrameSourceOpener for FfmpegCameraOpener {
    fn open(&self, device_index: u32) -> Result<Arc<dyn FrameSource>, SourceError> {
        let source = FfmpegCameraSource::open(device_index, self.width, self.height, self.fps)?;
        Ok(Arc::new(source))
    }
}

/// Decoder state for one open device.
struct CameraStream {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    next_index: usize,
}

// Safety: CameraStream is only touched while holding the source's mutex, so
// the raw ffmpeg pointers are never used from two threads at once.
unsafe impl Send for CameraStream {}

impl CameraStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
                self.scaler.run(&decoded, &mut rgb)?;
                let frame = Frame::new(
                    packed_rgb(&rgb, self.width, self.height),
                    self.width,
                    self.height,
                    3,
                    self.next_index,
                );
                self.next_index += 1;
                return Ok(Some(frame));
            }

            let Some((stream, packet)) = self.ictx.packets().next() else {
                return Ok(None);
            };
            if stream.index() != self.stream_index {
                continue;
            }
            // Corrupt packets from a flaky device are skipped, not fatal.
            if let Err(e) = self.decoder.send_packet(&packet) {
                log::debug!("Dropping undecodable camera packet: {e}");
            }
        }
    }
}

/// A live camera opened through ffmpeg's capture input formats.
pub struct FfmpegCameraSource {
    device: String,
    stream: Mutex<Option<CameraStream>>,
    released: AtomicBool,
}

impl FfmpegCameraSource {
    pub fn open(device_index: u32, width: u32, height: u32, fps: f64) -> Result<Self, SourceError> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let format = capture_format()?;
        let device = device_url(device_index);

        let mut options = ffmpeg_next::Dictionary::new();
        options.set("video_size", &format!("{width}x{height}"));
        options.set("framerate", &format!("{}", fps.round() as u32));

        let ictx = match ffmpeg_next::format::open_with(&device, &format, options)? {
            ffmpeg_next::format::context::Context::Input(ictx) => ictx,
            ffmpeg_next::format::context::Context::Output(_) => {
                return Err(format!("{device} opened as an output").into())
            }
        };

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| format!("{device} has no video stream"))?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let (actual_w, actual_h) = (decoder.width(), decoder.height());
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            actual_w,
            actual_h,
            ffmpeg_next::format::Pixel::RGB24,
            actual_w,
            actual_h,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        log::info!(
            "Opened camera {device} via {} at {actual_w}x{actual_h} (requested {width}x{height})",
            format.name()
        );

        Ok(Self {
            device,
            stream: Mutex::new(Some(CameraStream {
                ictx,
                decoder,
                scaler,
                stream_index,
                width: actual_w,
                height: actual_h,
                next_index: 0,
            })),
            released: AtomicBool::new(false),
        })
    }
}

impl FrameSource for FfmpegCameraSource {
    fn read(&self) -> Result<Option<Frame>, SourceError> {
        if self.released.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut guard = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        // A release that raced with an in-flight read closes the device here.
        if self.released.load(Ordering::Acquire) {
            guard.take();
            return Ok(None);
        }
        match guard.as_mut() {
            Some(stream) => stream.next_frame(),
            None => Ok(None),
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // A reader blocked on the device still holds the lock; it drops the
        // stream itself once its read returns.
        if let Ok(mut guard) = self.stream.try_lock() {
            guard.take();
        }
        log::debug!("Released camera {}", self.device);
    }

    fn describe(&self) -> String {
        self.device.clone()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDevice {
    pub index: u32,
    pub name: String,
}

/// Lists camera devices. Scans `/dev/video*` on Linux; elsewhere probes the
/// first few indices by opening them.
pub fn available_devices() -> Vec<CameraDevice> {
    #[cfg(target_os = "linux")]
    {
        let mut devices: Vec<CameraDevice> = std::fs::read_dir("/dev")
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let index = video_node_index(&name)?;
                Some(CameraDevice {
                    index,
                    name: format!("/dev/{name}"),
                })
            })
            .collect();
        devices.sort_by_key(|d| d.index);
        devices
    }
    #[cfg(not(target_os = "linux"))]
    {
        (0..MAX_PROBED_DEVICES)
            .filter_map(|index| {
                let source = FfmpegCameraSource::open(index, 640, 480, 30.0).ok()?;
                let name = source.describe();
                source.release();
                Some(CameraDevice { index, name })
            })
            .collect()
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn video_node_index(file_name: &str) -> Option<u32> {
    file_name.strip_prefix("video")?.parse().ok()
}

fn capture_format() -> Result<ffmpeg_next::format::format::Format, SourceError> {
    ffmpeg_next::device::input::video()
        .find(|f| f.name().split(',').any(|n| CAPTURE_FORMATS.contains(&n)))
        .ok_or_else(|| format!("No camera input format available (tried {CAPTURE_FORMATS:?})").into())
}

fn device_url(index: u32) -> String {
    #[cfg(target_os = "linux")]
    return format!("/dev/video{index}");
    #[cfg(target_os = "macos")]
    return format!("{index}:none");
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    index.to_string()
}

/// Copies an RGB24 frame into a tightly packed buffer, dropping row padding.
fn packed_rgb(rgb: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_bytes = width as usize * 3;
    (0..height as usize)
        .flat_map(|row| &data[row * stride..row * stride + row_bytes])
        .copied()
        .collect()
}

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::capture::domain::frame_source::{FrameSource, FrameSourceOpener, SourceError};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// Replays a directory of still images as a camera.
///
/// Images are served in file-name order. Without looping the source reports
/// end-of-stream after the last image, which the producer treats the same
/// way as a disconnected camera.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: Mutex<usize>,
    looping: bool,
    released: AtomicBool,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, looping: bool) -> Result<Self, SourceError> {
        let paths = list_images(dir)?;
        if paths.is_empty() {
            return Err(format!("No images found in {}", dir.display()).into());
        }
        log::info!("Replaying {} images from {}", paths.len(), dir.display());
        Ok(Self {
            paths,
            cursor: Mutex::new(0),
            looping,
            released: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read(&self) -> Result<Option<Frame>, SourceError> {
        if self.released.load(Ordering::Acquire) {
            return Ok(None);
        }
        let index = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            if *cursor >= self.paths.len() {
                if !self.looping {
                    return Ok(None);
                }
                *cursor = 0;
            }
            let index = *cursor;
            *cursor += 1;
            index
        };
        let path = &self.paths[index];
        let image = image::open(path)
            .map_err(|e| format!("Failed to decode {}: {e}", path.display()))?
            .to_rgb8();
        Ok(Some(Frame::from_rgb_image(image, index)))
    }

    fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    fn describe(&self) -> String {
        match self.paths.first().and_then(|p| p.parent()) {
            Some(dir) => format!("replay:{}", dir.display()),
            None => String::from("replay"),
        }
    }
}

/// Opens the same image directory for every device index.
pub struct ImageSequenceOpener {
    dir: PathBuf,
    looping: bool,
}

impl ImageSequenceOpener {
    pub fn new(dir: PathBuf, looping: bool) -> Self {
        Self { dir, looping }
    }
}

impl FrameSourceOpener for ImageSequenceOpener {
    fn open(&self, device_index: u32) -> Result<Arc<dyn FrameSource>, SourceError> {
        log::debug!("Replay source ignores device index {device_index}");
        Ok(Arc::new(ImageSequenceSource::open(&self.dir, self.looping)?))
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| format!("Cannot read {}: {e}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    paths.sort();
    Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

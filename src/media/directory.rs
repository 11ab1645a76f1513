use chrono::Utc;
use image::{imageops::FilterType, RgbaImage};
use log::debug;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use crate::error::MediaError;

use super::{CaptureDevice, Frame, StreamConstraints, VideoStream};

const DEFAULT_FRAME_PERIOD: Duration = Duration::from_secs(1);
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays still images from a directory as a looping camera feed.
///
/// A `user/` or `environment/` subdirectory, when present, is used for the
/// matching facing mode; otherwise the root directory serves both.
pub struct DirectoryCamera {
    root: PathBuf,
    frame_period: Duration,
}

impl DirectoryCamera {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            frame_period: DEFAULT_FRAME_PERIOD,
        }
    }

    pub fn with_frame_period(mut self, frame_period: Duration) -> Self {
        self.frame_period = frame_period.max(Duration::from_millis(1));
        self
    }

    fn directory_for(&self, constraints: &StreamConstraints) -> PathBuf {
        let facing_dir = self.root.join(constraints.facing_mode.as_str());
        if facing_dir.is_dir() {
            facing_dir
        } else {
            self.root.clone()
        }
    }
}

impl CaptureDevice for DirectoryCamera {
    fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>, MediaError> {
        let dir = self.directory_for(constraints);
        let paths = list_images(&dir)?;
        if paths.is_empty() {
            return Err(MediaError::DeviceUnavailable(format!(
                "no images in {}",
                dir.display()
            )));
        }

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            match load_frame(path, constraints) {
                Ok(image) => frames.push(Arc::new(image)),
                Err(err) => debug!("Skipping unreadable frame {}: {}", path.display(), err),
            }
        }
        if frames.is_empty() {
            return Err(MediaError::DeviceUnavailable(format!(
                "no decodable images in {}",
                dir.display()
            )));
        }

        Ok(Box::new(DirectoryStream {
            frames,
            frame_period: self.frame_period,
            opened_at: Instant::now(),
            live: true,
        }))
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let entries = fs::read_dir(dir).map_err(|err| match err.kind() {
        io::ErrorKind::PermissionDenied => MediaError::PermissionDenied,
        _ => MediaError::DeviceUnavailable(format!("{}: {err}", dir.display())),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    paths.sort();
    Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_frame(path: &Path, constraints: &StreamConstraints) -> image::ImageResult<RgbaImage> {
    let image = image::open(path)?.to_rgba8();
    if image.width() == constraints.width && image.height() == constraints.height {
        return Ok(image);
    }
    Ok(image::imageops::resize(
        &image,
        constraints.width,
        constraints.height,
        FilterType::Triangle,
    ))
}

struct DirectoryStream {
    frames: Vec<Arc<RgbaImage>>,
    frame_period: Duration,
    opened_at: Instant,
    live: bool,
}

impl VideoStream for DirectoryStream {
    fn read_frame(&mut self) -> Option<Frame> {
        if !self.live {
            return None;
        }
        let elapsed = self.opened_at.elapsed().as_millis();
        let index = (elapsed / self.frame_period.as_millis()) as usize % self.frames.len();
        Some(Frame::from_shared(Arc::clone(&self.frames[index]), Utc::now()))
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

pub mod directory;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};

use crate::error::MediaError;

pub use directory::DirectoryCamera;

/// Which physical camera to open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

impl FromStr for FacingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(FacingMode::User),
            "environment" | "back" => Ok(FacingMode::Environment),
            other => Err(format!("unknown facing mode '{other}'")),
        }
    }
}

/// Requested stream shape, mirrors what a browser would ask of `getUserMedia`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
    pub facing_mode: FacingMode,
}

impl StreamConstraints {
    pub fn for_facing(facing_mode: FacingMode) -> Self {
        Self {
            width: 640,
            height: 480,
            facing_mode,
        }
    }
}

/// Visual content of the stream at one instant. Cheap to clone.
#[derive(Clone)]
pub struct Frame {
    image: Arc<RgbaImage>,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbaImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn from_shared(image: Arc<RgbaImage>, captured_at: DateTime<Utc>) -> Self {
        Self { image, captured_at }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}x{} @ {})", self.width(), self.height(), self.captured_at)
    }
}

/// Boundary to the platform camera stack.
pub trait CaptureDevice: Send + Sync {
    fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>, MediaError>;
}

/// An open camera stream.
pub trait VideoStream: Send {
    /// `None` until the stream has a decodable frame.
    fn read_frame(&mut self) -> Option<Frame>;
    /// Stops every underlying track. Must tolerate repeated calls.
    fn stop(&mut self);
    fn is_live(&self) -> bool;
}

struct MediaSourceState {
    stream: Option<Box<dyn VideoStream>>,
    facing_mode: FacingMode,
}

/// Holds at most one open stream at a time.
pub struct MediaSource {
    device: Arc<dyn CaptureDevice>,
    state: Mutex<MediaSourceState>,
}

impl MediaSource {
    pub fn new(device: Arc<dyn CaptureDevice>, facing_mode: FacingMode) -> Self {
        Self {
            device,
            state: Mutex::new(MediaSourceState {
                stream: None,
                facing_mode,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MediaSourceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Opens a stream for `facing_mode`, releasing any stream already held.
    pub fn acquire(&self, facing_mode: FacingMode) -> Result<(), MediaError> {
        let mut state = self.lock_state();
        self.reopen(&mut state, facing_mode)
    }

    fn reopen(
        &self,
        state: &mut MediaSourceState,
        facing_mode: FacingMode,
    ) -> Result<(), MediaError> {
        if let Some(mut previous) = state.stream.take() {
            previous.stop();
        }
        state.facing_mode = facing_mode;

        let stream = self
            .device
            .open(&StreamConstraints::for_facing(facing_mode))
            .map_err(|err| {
                warn!("Camera acquisition failed ({}): {}", facing_mode.as_str(), err);
                err
            })?;

        info!("Camera stream opened (facing {})", facing_mode.as_str());
        state.stream = Some(stream);
        Ok(())
    }

    /// Stops the held stream, if any. Safe to call any number of times.
    pub fn release(&self) {
        let mut state = self.lock_state();
        if let Some(mut stream) = state.stream.take() {
            stream.stop();
            info!("Camera stream released");
        }
    }

    /// Records the preference and, when a stream is open, reopens it on the new camera.
    pub fn switch_facing_mode(&self, facing_mode: FacingMode) -> Result<(), MediaError> {
        let mut state = self.lock_state();
        if state.stream.is_none() {
            state.facing_mode = facing_mode;
            return Ok(());
        }
        self.reopen(&mut state, facing_mode)
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().stream.is_some()
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.lock_state().facing_mode
    }

    pub fn current_frame(&self) -> Option<Frame> {
        let mut state = self.lock_state();
        let stream = state.stream.as_mut()?;
        if !stream.is_live() {
            return None;
        }
        stream.read_frame()
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.release();
    }
}

//! In-memory stand-ins for the camera, model and speaker used by unit tests.

use chrono::Utc;
use image::{Rgba, RgbImage, RgbaImage};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Condvar, Mutex,
};
use std::time::Duration;
use tokio::time::Instant;

use crate::alarm::{Tone, ToneOutput};
use crate::detection::{Detection, InferenceBackend, ModelLoader};
use crate::error::{DetectorError, MediaError};
use crate::media::{CaptureDevice, FacingMode, Frame, StreamConstraints, VideoStream};

pub fn solid_frame(width: u32, height: u32) -> Frame {
    Frame::new(
        RgbaImage::from_pixel(width, height, Rgba([90, 120, 150, 255])),
        Utc::now(),
    )
}

pub struct FakeCamera {
    live: Arc<AtomicUsize>,
    opened_with: Mutex<Vec<FacingMode>>,
    deny: AtomicBool,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            opened_with: Mutex::new(Vec::new()),
            deny: AtomicBool::new(false),
        }
    }

    pub fn denying() -> Self {
        let camera = Self::new();
        camera.set_denying(true);
        camera
    }

    /// Later `open` calls fail with a permission error.
    pub fn set_denying(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opened_with(&self) -> Vec<FacingMode> {
        self.opened_with.lock().unwrap().clone()
    }
}

impl CaptureDevice for FakeCamera {
    fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        self.opened_with.lock().unwrap().push(constraints.facing_mode);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            live: Arc::clone(&self.live),
            stopped: false,
            width: constraints.width,
            height: constraints.height,
        }))
    }
}

struct FakeStream {
    live: Arc<AtomicUsize>,
    stopped: bool,
    width: u32,
    height: u32,
}

impl VideoStream for FakeStream {
    fn read_frame(&mut self) -> Option<Frame> {
        (!self.stopped).then(|| solid_frame(self.width, self.height))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        !self.stopped
    }
}

enum BackendMode {
    Script(Vec<Vec<Detection>>),
    Erroring,
}

/// Loader that counts loads and hands out a scripted backend.
pub struct CountingLoader {
    loads: AtomicUsize,
    fail_first: AtomicBool,
    always_fail: bool,
    backend: Arc<ScriptedBackend>,
}

impl CountingLoader {
    fn with_mode(mode: BackendMode) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            fail_first: AtomicBool::new(false),
            always_fail: false,
            backend: Arc::new(ScriptedBackend {
                mode,
                calls: AtomicUsize::new(0),
                last_size: Mutex::new(None),
            }),
        }
    }

    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self::with_mode(BackendMode::Script(script))
    }

    pub fn erroring() -> Self {
        Self::with_mode(BackendMode::Erroring)
    }

    pub fn failing_first(script: Vec<Vec<Detection>>) -> Self {
        let loader = Self::new(script);
        loader.fail_first.store(true, Ordering::SeqCst);
        loader
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn infer_count(&self) -> usize {
        self.backend.calls.load(Ordering::SeqCst)
    }

    pub fn last_input_size(&self) -> Option<(u32, u32)> {
        *self.backend.last_size.lock().unwrap()
    }
}

impl ModelLoader for CountingLoader {
    fn load(
        &self,
        _model_id: &str,
        _device_hint: &str,
    ) -> Result<Arc<dyn InferenceBackend>, DetectorError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || self.fail_first.swap(false, Ordering::SeqCst) {
            return Err(DetectorError::ModelLoad("weights unavailable".into()));
        }
        Ok(self.backend.clone())
    }
}

struct ScriptedBackend {
    mode: BackendMode,
    calls: AtomicUsize,
    last_size: Mutex<Option<(u32, u32)>>,
}

impl InferenceBackend for ScriptedBackend {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_size.lock().unwrap() = Some(image.dimensions());
        match &self.mode {
            BackendMode::Script(frames) if frames.is_empty() => Ok(Vec::new()),
            BackendMode::Script(frames) => Ok(frames[call % frames.len()].clone()),
            BackendMode::Erroring => Err(DetectorError::Inference("gpu lost".into())),
        }
    }
}

pub struct PanickingLoader;

impl ModelLoader for PanickingLoader {
    fn load(
        &self,
        _model_id: &str,
        _device_hint: &str,
    ) -> Result<Arc<dyn InferenceBackend>, DetectorError> {
        Ok(Arc::new(PanickingBackend))
    }
}

struct PanickingBackend;

impl InferenceBackend for PanickingBackend {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        panic!("backend crashed");
    }
}

/// Backend whose `detect` blocks until the test opens the gate.
pub struct GatedLoader {
    gate: Arc<(Mutex<bool>, Condvar)>,
    calls: Arc<AtomicUsize>,
}

impl GatedLoader {
    pub fn new() -> Self {
        Self {
            gate: Arc::new((Mutex::new(false), Condvar::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_gate(&self) {
        let (open, cvar) = &*self.gate;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn detect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ModelLoader for GatedLoader {
    fn load(
        &self,
        _model_id: &str,
        _device_hint: &str,
    ) -> Result<Arc<dyn InferenceBackend>, DetectorError> {
        Ok(Arc::new(GatedBackend {
            gate: Arc::clone(&self.gate),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct GatedBackend {
    gate: Arc<(Mutex<bool>, Condvar)>,
    calls: Arc<AtomicUsize>,
}

impl InferenceBackend for GatedBackend {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (open, cvar) = &*self.gate;
        let guard = open.lock().unwrap();
        let _open = cvar
            .wait_timeout_while(guard, Duration::from_secs(10), |open| !*open)
            .unwrap();
        Ok(vec![Detection::new("person", 0.9)])
    }
}

/// Tracks which tones would still be audible on the (paused) tokio clock.
pub struct RecordingToneOutput {
    tones: Mutex<Vec<Instant>>,
    plays: AtomicUsize,
    silences: AtomicUsize,
}

impl RecordingToneOutput {
    pub fn new() -> Self {
        Self {
            tones: Mutex::new(Vec::new()),
            plays: AtomicUsize::new(0),
            silences: AtomicUsize::new(0),
        }
    }

    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn silence_count(&self) -> usize {
        self.silences.load(Ordering::SeqCst)
    }

    pub fn active_tones(&self) -> usize {
        let now = Instant::now();
        self.tones.lock().unwrap().iter().filter(|end| **end > now).count()
    }
}

impl ToneOutput for RecordingToneOutput {
    fn play(&self, tone: &Tone) {
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.tones.lock().unwrap().push(Instant::now() + tone.duration);
    }

    fn silence(&self) {
        self.silences.fetch_add(1, Ordering::SeqCst);
        self.tones.lock().unwrap().clear();
    }
}

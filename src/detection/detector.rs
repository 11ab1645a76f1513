use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::DetectorError;
use crate::media::Frame;
use crate::settings::MonitorSettings;

use super::{Detection, ModelCache, ModelLoader};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

type InferenceTask = JoinHandle<Result<Vec<Detection>, DetectorError>>;

/// Turns frames into detections through an injected model cache.
///
/// At most one inference runs at a time. A call that times out leaves its
/// blocking task parked here and later calls are refused until it finishes.
pub struct Detector {
    cache: Arc<ModelCache>,
    loader: Arc<dyn ModelLoader>,
    model_id: String,
    device_hint: String,
    input_size: (u32, u32),
    timeout: Duration,
    in_flight: Mutex<Option<InferenceTask>>,
}

impl Detector {
    pub fn new(
        cache: Arc<ModelCache>,
        loader: Arc<dyn ModelLoader>,
        settings: &MonitorSettings,
    ) -> Self {
        Self {
            cache,
            loader,
            model_id: settings.model_id.clone(),
            device_hint: settings.device_hint.clone(),
            input_size: (
                settings.inference_width.max(1),
                settings.inference_height.max(1),
            ),
            timeout: settings.inference_timeout(),
            in_flight: Mutex::new(None),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<InferenceTask>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.is_loaded()
    }

    /// Loads the model unless it is loaded or already loading.
    pub async fn load_model(&self) -> Result<(), DetectorError> {
        self.cache
            .get_or_load(Arc::clone(&self.loader), &self.model_id, &self.device_hint)
            .await
            .map(|_| ())
    }

    /// Never fails: any error is logged and reported as "nothing detected".
    pub async fn infer(&self, frame: &Frame) -> Vec<Detection> {
        self.poll(frame).await.unwrap_or_default()
    }

    /// Like [`Detector::infer`], but `None` when an earlier inference is
    /// still running and no new one was started.
    pub async fn poll(&self, frame: &Frame) -> Option<Vec<Detection>> {
        match self.try_infer(frame).await {
            Ok(detections) => Some(detections),
            Err(DetectorError::Busy) => {
                log_warn!("detection skipped: previous inference still running");
                None
            }
            Err(err) => {
                log_warn!("detection skipped: {err}");
                Some(Vec::new())
            }
        }
    }

    async fn try_infer(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let backend = self.cache.get().ok_or(DetectorError::ModelNotLoaded)?;

        {
            let mut in_flight = self.in_flight();
            if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
                return Err(DetectorError::Busy);
            }
            // A late result from a timed-out call is stale; drop it.
            *in_flight = None;
        }

        let frame = frame.clone();
        let (width, height) = self.input_size;
        let mut task = tokio::task::spawn_blocking(move || {
            let raster = to_raster(frame.image(), width, height);
            backend.detect(&raster)
        });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(DetectorError::Inference(format!(
                "inference worker join failed: {join_err}"
            ))),
            Err(_) => {
                *self.in_flight() = Some(task);
                Err(DetectorError::Inference(format!(
                    "inference timeout (> {}ms)",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// Downscales to the fixed inference raster and drops alpha.
pub fn to_raster(image: &RgbaImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    }
    let resized = image::imageops::resize(image, width, height, FilterType::Triangle);
    DynamicImage::ImageRgba8(resized).into_rgb8()
}

pub mod cache;
pub mod detector;
pub mod latch;
pub mod loop_worker;
pub mod replay;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::DetectorError;

pub use cache::ModelCache;
pub use detector::Detector;
pub use latch::DetectionLatch;
pub use loop_worker::{detection_loop, DetectionWorker};
pub use replay::ReplayLoader;

pub const PERSON_LABEL: &str = "person";
pub const PERSON_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// One labeled box from the inference capability. Boxes themselves are not kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(alias = "score")]
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Where the detection loop is in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DetectionPhase {
    #[default]
    Idle,
    Loading,
    Polling,
    LoadFailed,
}

/// True iff some detection is a person with confidence strictly above 0.5.
pub fn has_person(detections: &[Detection]) -> bool {
    detections
        .iter()
        .any(|d| d.label == PERSON_LABEL && d.confidence > PERSON_CONFIDENCE_THRESHOLD)
}

/// A loaded model. Called from the blocking pool.
pub trait InferenceBackend: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Produces a backend for a model identifier. Expected to block for seconds.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        model_id: &str,
        device_hint: &str,
    ) -> Result<Arc<dyn InferenceBackend>, DetectorError>;
}

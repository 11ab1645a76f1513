use image::RgbImage;
use serde::Deserialize;
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::error::DetectorError;

use super::{Detection, InferenceBackend, ModelLoader};

/// JSON script for the replay backend:
///
/// ```json
/// { "load_delay_ms": 1500, "frames": [[{"label": "person", "score": 0.92}], []] }
/// ```
///
/// Each inference call answers with the next entry of `frames`, wrapping around.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplayScript {
    pub load_delay_ms: u64,
    pub frames: Vec<Vec<Detection>>,
}

/// Stands in for a neural network by replaying scripted detections.
pub struct ReplayLoader {
    script_path: PathBuf,
}

impl ReplayLoader {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
        }
    }
}

impl ModelLoader for ReplayLoader {
    fn load(
        &self,
        model_id: &str,
        device_hint: &str,
    ) -> Result<Arc<dyn InferenceBackend>, DetectorError> {
        let contents = fs::read_to_string(&self.script_path).map_err(|err| {
            DetectorError::ModelLoad(format!(
                "failed to read replay script {}: {err}",
                self.script_path.display()
            ))
        })?;
        let script: ReplayScript = serde_json::from_str(&contents)
            .map_err(|err| DetectorError::ModelLoad(format!("invalid replay script: {err}")))?;

        if script.load_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(script.load_delay_ms));
        }

        log::info!(
            "Replay model ready for {} on {} ({} scripted frames)",
            model_id,
            device_hint,
            script.frames.len()
        );
        Ok(Arc::new(ReplayBackend::new(script.frames)))
    }
}

pub struct ReplayBackend {
    frames: Vec<Vec<Detection>>,
    cursor: AtomicUsize,
}

impl ReplayBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl InferenceBackend for ReplayBackend {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.frames.len();
        Ok(self.frames[index].clone())
    }
}

use log::info;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::DetectorError;

use super::{InferenceBackend, ModelLoader};

/// Owns the loaded model for the whole process.
///
/// Created once by whoever builds the controllers and injected into each
/// `Detector`; it is never torn down. Concurrent callers of `get_or_load`
/// wait on a single in-flight load. A failed load leaves the cache empty so a
/// later activation can try again.
pub struct ModelCache {
    cell: OnceCell<Arc<dyn InferenceBackend>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Option<Arc<dyn InferenceBackend>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get_or_load(
        &self,
        loader: Arc<dyn ModelLoader>,
        model_id: &str,
        device_hint: &str,
    ) -> Result<Arc<dyn InferenceBackend>, DetectorError> {
        let model_id = model_id.to_string();
        let device_hint = device_hint.to_string();

        let backend = self
            .cell
            .get_or_try_init(|| async move {
                info!("Loading detection model {} on {}", model_id, device_hint);
                let backend = tokio::task::spawn_blocking(move || loader.load(&model_id, &device_hint))
                    .await
                    .map_err(|err| DetectorError::ModelLoad(format!("loader worker join failed: {err}")))??;
                info!("Detection model loaded");
                Ok::<_, DetectorError>(backend)
            })
            .await?;

        Ok(Arc::clone(backend))
    }
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new()
    }
}

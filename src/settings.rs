use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::media::FacingMode;

const DEBUG_DETECTION_INTERVAL_MS: u64 = 500;

/// Tunables for one monitoring controller. Read once at startup, never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub alarm_enabled: bool,
    pub facing_mode: FacingMode,
    pub detection_interval_ms: u64,
    pub inference_timeout_ms: u64,
    pub alarm_interval_ms: u64,
    pub capture_interval_ms: u64,
    /// `None` keeps every capture for the lifetime of the process.
    pub max_captures: Option<usize>,
    pub capture_quality: u8,
    pub capture_scale: f32,
    pub inference_width: u32,
    pub inference_height: u32,
    pub model_id: String,
    pub device_hint: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            alarm_enabled: true,
            facing_mode: FacingMode::User,
            detection_interval_ms: 2000,
            inference_timeout_ms: 10_000,
            alarm_interval_ms: 500,
            capture_interval_ms: 8000,
            max_captures: Some(10),
            capture_quality: 60,
            capture_scale: 0.5,
            inference_width: 640,
            inference_height: 480,
            model_id: "Xenova/detr-resnet-50".into(),
            device_hint: "webgpu".into(),
        }
    }
}

impl MonitorSettings {
    /// Reads settings from `path`, falling back to defaults when the file is
    /// missing or malformed. Applies the `AREAWATCH_DEBUG` override afterwards.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings in {}: {}", path.display(), err);
                Self::default()
            })
        } else {
            Self::default()
        };

        Ok(settings.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var("AREAWATCH_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if debug_mode {
            self.detection_interval_ms = DEBUG_DETECTION_INTERVAL_MS;
        }
        self
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms.max(1))
    }

    pub fn alarm_interval(&self) -> Duration {
        Duration::from_millis(self.alarm_interval_ms.max(1))
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms.max(1))
    }
}

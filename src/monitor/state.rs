use serde::{Deserialize, Serialize};

use crate::detection::DetectionPhase;
use crate::media::FacingMode;

/// Operator-facing switches. Detection state lives in the latch, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorFlags {
    pub active: bool,
    pub alarm_enabled: bool,
}

impl MonitorFlags {
    pub fn new(alarm_enabled: bool) -> Self {
        Self {
            active: false,
            alarm_enabled,
        }
    }

    /// Gate for the alarm driver.
    pub fn should_sound(&self, detected: bool) -> bool {
        detected && self.alarm_enabled && self.active
    }

    /// Gate for the capture store.
    pub fn should_capture(&self, detected: bool) -> bool {
        detected && self.active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub active: bool,
    pub phase: DetectionPhase,
    pub detecting: bool,
    pub alarm_enabled: bool,
    pub alarm_active: bool,
    pub facing_mode: FacingMode,
    pub capture_count: usize,
}

impl MonitorStatus {
    pub fn is_loading(&self) -> bool {
        self.phase == DetectionPhase::Loading
    }
}

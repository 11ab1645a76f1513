use chrono::{DateTime, Utc};
use serde::Serialize;

use super::MonitorStatus;

/// Everything a status display or gallery view needs to stay current.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MonitorEvent {
    StatusChanged(MonitorStatus),
    #[serde(rename_all = "camelCase")]
    CaptureAdded {
        id: String,
        taken_at: DateTime<Utc>,
    },
    CaptureDeleted {
        id: String,
    },
    ModelLoadFailed {
        message: String,
    },
}

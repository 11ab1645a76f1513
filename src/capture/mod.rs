pub mod encode;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::CaptureError;
use crate::media::MediaSource;
use crate::monitor::MonitorEvent;
use crate::settings::MonitorSettings;

use encode::{encode_snapshot, export_file_name};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// One stored snapshot. The JPEG bytes are shared, so clones are cheap.
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: String,
    pub image: Arc<[u8]>,
    pub taken_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

/// Newest-first list with an optional capacity; overflow evicts the oldest.
#[derive(Debug, Default)]
pub struct CaptureCollection {
    items: VecDeque<Capture>,
    capacity: Option<usize>,
}

impl CaptureCollection {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Prepends `capture` and returns whatever fell off the end.
    pub fn push(&mut self, capture: Capture) -> Vec<Capture> {
        self.items.push_front(capture);
        let mut evicted = Vec::new();
        if let Some(capacity) = self.capacity {
            while self.items.len() > capacity {
                if let Some(oldest) = self.items.pop_back() {
                    evicted.push(oldest);
                }
            }
        }
        evicted
    }

    pub fn remove(&mut self, id: &str) -> Option<Capture> {
        let index = self.items.iter().position(|c| c.id == id)?;
        self.items.remove(index)
    }

    pub fn get(&self, id: &str) -> Option<&Capture> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capture> {
        self.items.iter()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    pub interval: Duration,
    pub scale: f32,
    pub quality: u8,
}

impl From<&MonitorSettings> for CaptureOptions {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            interval: settings.capture_interval(),
            scale: settings.capture_scale,
            quality: settings.capture_quality,
        }
    }
}

struct CaptureTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

struct StoreInner {
    media: Arc<MediaSource>,
    options: CaptureOptions,
    collection: Mutex<CaptureCollection>,
    events: broadcast::Sender<MonitorEvent>,
}

impl StoreInner {
    fn collection(&self) -> MutexGuard<'_, CaptureCollection> {
        match self.collection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn capture_now(&self) -> Result<Capture, CaptureError> {
        let frame = self.media.current_frame().ok_or(CaptureError::FrameNotReady)?;
        let CaptureOptions { scale, quality, .. } = self.options;
        let taken_at = frame.captured_at();

        let snapshot = tokio::task::spawn_blocking(move || encode_snapshot(frame.image(), scale, quality))
            .await
            .map_err(|err| CaptureError::Io(std::io::Error::other(err)))??;

        let capture = Capture {
            id: Uuid::new_v4().to_string(),
            image: Arc::from(snapshot.bytes),
            taken_at,
            width: snapshot.width,
            height: snapshot.height,
        };

        let evicted = self.collection().push(capture.clone());
        for old in &evicted {
            log_debug!("evicted capture {}", old.id);
        }
        let _ = self.events.send(MonitorEvent::CaptureAdded {
            id: capture.id.clone(),
            taken_at: capture.taken_at,
        });
        Ok(capture)
    }
}

/// Owns the capture gallery and the periodic capture task.
pub struct CaptureStore {
    inner: Arc<StoreInner>,
    task: Mutex<Option<CaptureTask>>,
}

impl CaptureStore {
    pub fn new(
        media: Arc<MediaSource>,
        options: CaptureOptions,
        capacity: Option<usize>,
        events: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                media,
                options,
                collection: Mutex::new(CaptureCollection::new(capacity)),
                events,
            }),
            task: Mutex::new(None),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<CaptureTask>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.task().is_some()
    }

    /// Rising edge starts capturing at once and then every interval; falling
    /// edge cancels the task. Must be called from within a tokio runtime.
    pub fn set_signal(&self, should_capture: bool) {
        let mut task = self.task();

        if should_capture {
            if task.is_some() {
                return;
            }
            let cancel_token = CancellationToken::new();
            let handle = tokio::spawn(capture_loop(Arc::clone(&self.inner), cancel_token.clone()));
            *task = Some(CaptureTask {
                cancel_token,
                handle,
            });
            log_info!("capturing every {}ms", self.inner.options.interval.as_millis());
        } else if let Some(running) = task.take() {
            running.cancel_token.cancel();
            running.handle.abort();
            log_info!("capturing stopped");
        }
    }

    /// Takes one snapshot outside the periodic schedule.
    pub async fn capture_now(&self) -> Result<Capture, CaptureError> {
        self.inner.capture_now().await
    }

    /// Newest first.
    pub fn captures(&self) -> Vec<Capture> {
        self.inner.collection().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Capture> {
        self.inner.collection().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.collection().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.collection().is_empty()
    }

    /// Unknown ids are ignored; returns whether anything was removed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.inner.collection().remove(id).is_some();
        if removed {
            let _ = self.inner.events.send(MonitorEvent::CaptureDeleted { id: id.to_string() });
        }
        removed
    }

    /// Writes the capture's JPEG into `dir` and returns the file path.
    pub fn export(&self, id: &str, dir: &Path) -> Result<PathBuf, CaptureError> {
        let capture = self
            .get(id)
            .ok_or_else(|| CaptureError::NotFound(id.to_string()))?;
        fs::create_dir_all(dir)?;
        let path = dir.join(export_file_name(capture.taken_at));
        fs::write(&path, &capture.image)?;
        Ok(path)
    }
}

impl Drop for CaptureStore {
    fn drop(&mut self) {
        if let Some(running) = self.task().take() {
            running.cancel_token.cancel();
            running.handle.abort();
        }
    }
}

async fn capture_loop(inner: Arc<StoreInner>, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = tokio::select! {
                    result = inner.capture_now() => result,
                    _ = cancel_token.cancelled() => break,
                };
                match result {
                    Ok(capture) => log_info!("captured {} ({}x{}, {} bytes)",
                        capture.id, capture.width, capture.height, capture.image.len()),
                    Err(CaptureError::FrameNotReady) => log_debug!("capture skipped: frame not ready"),
                    Err(err) => log_warn!("capture failed: {err}"),
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::{
    sync::{broadcast, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    alarm::{AlarmDriver, Tone, ToneOutput},
    capture::{Capture, CaptureOptions, CaptureStore},
    detection::{
        detection_loop, DetectionLatch, DetectionPhase, DetectionWorker, Detector, ModelCache,
        ModelLoader,
    },
    media::{CaptureDevice, FacingMode, MediaSource},
    settings::MonitorSettings,
};

use super::{MonitorEvent, MonitorFlags, MonitorStatus};

const EVENT_CAPACITY: usize = 64;

/// External collaborators the controller drives.
pub struct MonitorBackends {
    pub camera: Arc<dyn CaptureDevice>,
    pub model_loader: Arc<dyn ModelLoader>,
    pub tone_output: Arc<dyn ToneOutput>,
    /// Share one cache between controllers to load the model once per process.
    pub model_cache: Option<Arc<ModelCache>>,
}

struct ActiveSession {
    generation: u64,
    cancel_token: CancellationToken,
    worker: JoinHandle<()>,
    relay: JoinHandle<()>,
}

struct ControllerInner {
    settings: MonitorSettings,
    media: Arc<MediaSource>,
    detector: Arc<Detector>,
    latch: Arc<DetectionLatch>,
    phase: Arc<watch::Sender<DetectionPhase>>,
    alarm: AlarmDriver,
    captures: CaptureStore,
    flags: Mutex<MonitorFlags>,
    session: AsyncMutex<Option<ActiveSession>>,
    events: broadcast::Sender<MonitorEvent>,
}

impl ControllerInner {
    fn flags(&self) -> MutexGuard<'_, MonitorFlags> {
        match self.flags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Recomputes both gates from the latch and the operator flags. The flags
    /// lock is held until both gates are set.
    fn apply_signals(&self) {
        let flags = self.flags();
        let detected = self.latch.is_detected();
        self.alarm.set_signal(flags.should_sound(detected));
        self.captures.set_signal(flags.should_capture(detected));
    }

    fn status(&self) -> MonitorStatus {
        let flags = *self.flags();
        MonitorStatus {
            active: flags.active,
            phase: *self.phase.borrow(),
            detecting: self.latch.is_detected(),
            alarm_enabled: flags.alarm_enabled,
            alarm_active: self.alarm.is_sounding(),
            facing_mode: self.media.facing_mode(),
            capture_count: self.captures.len(),
        }
    }

    fn emit_status(&self) {
        let _ = self.events.send(MonitorEvent::StatusChanged(self.status()));
    }
}

/// Composition root for one camera: owns every component and exposes the
/// operator controls.
#[derive(Clone)]
pub struct MonitorController {
    inner: Arc<ControllerInner>,
}

impl MonitorController {
    pub fn new(settings: MonitorSettings, backends: MonitorBackends) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (phase_tx, _) = watch::channel(DetectionPhase::Idle);

        let cache = backends
            .model_cache
            .unwrap_or_else(|| Arc::new(ModelCache::new()));
        let media = Arc::new(MediaSource::new(backends.camera, settings.facing_mode));
        let detector = Arc::new(Detector::new(cache, backends.model_loader, &settings));
        let alarm = AlarmDriver::new(
            backends.tone_output,
            Tone::default(),
            settings.alarm_interval(),
        );
        let captures = CaptureStore::new(
            Arc::clone(&media),
            CaptureOptions::from(&settings),
            settings.max_captures,
            events.clone(),
        );

        Self {
            inner: Arc::new(ControllerInner {
                flags: Mutex::new(MonitorFlags::new(settings.alarm_enabled)),
                settings,
                media,
                detector,
                latch: Arc::new(DetectionLatch::new()),
                phase: Arc::new(phase_tx),
                alarm,
                captures,
                session: AsyncMutex::new(None),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> MonitorStatus {
        self.inner.status()
    }

    /// Opens the camera and starts the detection loop. Camera errors are
    /// returned and leave monitoring off.
    pub async fn start_monitoring(&self) -> Result<MonitorStatus> {
        let mut session = self.inner.session.lock().await;
        if session.is_some() {
            bail!("monitoring already active");
        }

        let facing_mode = self.inner.media.facing_mode();
        self.inner
            .media
            .acquire(facing_mode)
            .context("failed to start camera")?;

        let generation = self.inner.latch.begin_generation();
        let cancel_token = CancellationToken::new();

        self.inner.flags().active = true;

        // Subscribed before the worker runs so a warm cache's first result is seen.
        let detected_rx = self.inner.latch.subscribe();
        let phase_rx = self.inner.phase.subscribe();

        let worker = tokio::spawn(detection_loop(
            DetectionWorker {
                detector: Arc::clone(&self.inner.detector),
                media: Arc::clone(&self.inner.media),
                latch: Arc::clone(&self.inner.latch),
                phase: Arc::clone(&self.inner.phase),
                events: self.inner.events.clone(),
                generation,
                interval: self.inner.settings.detection_interval(),
            },
            cancel_token.clone(),
        ));

        let relay = tokio::spawn(signal_relay(
            Arc::downgrade(&self.inner),
            detected_rx,
            phase_rx,
            cancel_token.clone(),
        ));

        *session = Some(ActiveSession {
            generation,
            cancel_token,
            worker,
            relay,
        });
        drop(session);

        info!("Monitoring started (generation {})", generation);
        self.inner.emit_status();
        Ok(self.status())
    }

    /// Cancels every loop, silences the alarm, stops capturing and releases
    /// the camera before returning. No-op when idle.
    pub async fn stop_monitoring(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let Some(active) = session.take() else {
            return Ok(());
        };

        self.end_session(active).await;
        drop(session);

        self.inner.emit_status();
        Ok(())
    }

    /// Callers hold the session lock.
    async fn end_session(&self, active: ActiveSession) {
        self.inner.flags().active = false;
        active.cancel_token.cancel();
        self.inner.latch.reset();
        self.inner.media.release();

        if let Err(err) = active.worker.await {
            error!("Detection loop task failed to join: {}", err);
        }
        if let Err(err) = active.relay.await {
            error!("Signal relay task failed to join: {}", err);
        }
        // Applied once nothing else can raise the gates again.
        self.inner.apply_signals();
        self.inner.phase.send_replace(DetectionPhase::Idle);

        info!("Monitoring stopped (generation {})", active.generation);
    }

    pub fn set_alarm_enabled(&self, enabled: bool) {
        self.inner.flags().alarm_enabled = enabled;
        self.inner.apply_signals();
        self.inner.emit_status();
    }

    /// Returns the new setting.
    pub fn toggle_alarm(&self) -> bool {
        let enabled = {
            let mut flags = self.inner.flags();
            flags.alarm_enabled = !flags.alarm_enabled;
            flags.alarm_enabled
        };
        self.inner.apply_signals();
        self.inner.emit_status();
        enabled
    }

    /// Reopens the camera on `facing_mode` when active. If the new camera
    /// cannot be opened, monitoring is stopped and the error returned.
    pub async fn switch_facing_mode(&self, facing_mode: FacingMode) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let switched = self.inner.media.switch_facing_mode(facing_mode);
        if let Err(err) = &switched {
            warn!("Facing mode switch failed, stopping monitoring: {}", err);
            if let Some(active) = session.take() {
                self.end_session(active).await;
            }
        }
        drop(session);

        self.inner.emit_status();
        switched.context("failed to switch camera")
    }

    pub async fn toggle_facing_mode(&self) -> Result<FacingMode> {
        let next = self.inner.media.facing_mode().toggled();
        self.switch_facing_mode(next).await?;
        Ok(next)
    }

    /// Newest first.
    pub fn captures(&self) -> Vec<Capture> {
        self.inner.captures.captures()
    }

    pub fn delete_capture(&self, id: &str) -> bool {
        let removed = self.inner.captures.delete(id);
        if removed {
            self.inner.emit_status();
        }
        removed
    }

    pub fn export_capture(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        self.inner
            .captures
            .export(id, dir)
            .with_context(|| format!("failed to export capture {id}"))
    }
}

/// Pushes detection changes into the alarm and capture gates.
async fn signal_relay(
    inner: Weak<ControllerInner>,
    mut detected: watch::Receiver<bool>,
    mut phase: watch::Receiver<DetectionPhase>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            changed = detected.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(inner) = inner.upgrade() else { break };
                if cancel_token.is_cancelled() {
                    break;
                }
                inner.apply_signals();
                inner.emit_status();
            }
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(inner) = inner.upgrade() else { break };
                inner.emit_status();
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::testing::{CountingLoader, FakeCamera, RecordingToneOutput};
    use tokio::time::{sleep, Duration};

    struct Fixture {
        controller: MonitorController,
        camera: Arc<FakeCamera>,
        loader: Arc<CountingLoader>,
        tones: Arc<RecordingToneOutput>,
    }

    fn fixture_with(camera: FakeCamera, loader: CountingLoader) -> Fixture {
        let camera = Arc::new(camera);
        let loader = Arc::new(loader);
        let tones = Arc::new(RecordingToneOutput::new());
        let controller = MonitorController::new(
            MonitorSettings::default(),
            MonitorBackends {
                camera: camera.clone(),
                model_loader: loader.clone(),
                tone_output: tones.clone(),
                model_cache: None,
            },
        );
        Fixture {
            controller,
            camera,
            loader,
            tones,
        }
    }

    fn person_script() -> Vec<Vec<Detection>> {
        vec![vec![Detection::new("person", 0.9)]]
    }

    #[tokio::test(start_paused = true)]
    async fn person_triggers_alarm_and_capture_immediately() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));
        let mut events = f.controller.subscribe();

        let status = f.controller.start_monitoring().await.unwrap();
        assert!(status.active);

        sleep(Duration::from_millis(50)).await;

        let status = f.controller.status();
        assert_eq!(status.phase, DetectionPhase::Polling);
        assert!(status.detecting);
        assert!(status.alarm_active);
        assert_eq!(f.tones.play_count(), 1);
        assert_eq!(f.controller.captures().len(), 1);

        let mut saw_capture = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MonitorEvent::CaptureAdded { .. }) {
                saw_capture = true;
            }
        }
        assert!(saw_capture);

        f.controller.stop_monitoring().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_everything_in_one_call() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));
        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(600)).await;
        assert!(f.controller.status().alarm_active);

        f.controller.stop_monitoring().await.unwrap();

        let status = f.controller.status();
        assert!(!status.active);
        assert!(!status.detecting);
        assert!(!status.alarm_active);
        assert_eq!(status.phase, DetectionPhase::Idle);
        assert_eq!(f.camera.live_streams(), 0);
        assert_eq!(f.tones.active_tones(), 0);

        let plays = f.tones.play_count();
        let captures = f.controller.captures().len();
        sleep(Duration::from_secs(20)).await;
        assert_eq!(f.tones.play_count(), plays);
        assert_eq!(f.controller.captures().len(), captures);
    }

    #[tokio::test(start_paused = true)]
    async fn model_loads_once_across_activations() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(Vec::new()));

        for _ in 0..3 {
            f.controller.start_monitoring().await.unwrap();
            sleep(Duration::from_millis(100)).await;
            f.controller.stop_monitoring().await.unwrap();
        }

        assert_eq!(f.loader.load_count(), 1);
        assert_eq!(f.camera.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_denial_keeps_monitoring_off() {
        let f = fixture_with(FakeCamera::denying(), CountingLoader::new(person_script()));

        let err = f.controller.start_monitoring().await.unwrap_err();

        assert!(format!("{err:#}").contains("permission denied"));
        assert!(!f.controller.status().active);
        assert_eq!(f.loader.load_count(), 0);
        f.controller.start_monitoring().await.unwrap_err();
    }

    #[tokio::test(start_paused = true)]
    async fn model_failure_is_surfaced_without_polling() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::always_failing());
        let mut events = f.controller.subscribe();

        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(f.controller.status().phase, DetectionPhase::LoadFailed);
        assert_eq!(f.loader.infer_count(), 0);
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MonitorEvent::ModelLoadFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        f.controller.stop_monitoring().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_alarm_keeps_capturing() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));
        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(!f.controller.toggle_alarm());

        let status = f.controller.status();
        assert!(!status.alarm_active);
        assert!(status.detecting);
        let plays = f.tones.play_count();
        sleep(Duration::from_millis(8100)).await;
        assert_eq!(f.tones.play_count(), plays);
        assert_eq!(f.controller.captures().len(), 2);

        f.controller.set_alarm_enabled(true);
        assert!(f.controller.status().alarm_active);
        assert_eq!(f.tones.play_count(), plays + 1);
        f.controller.stop_monitoring().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn facing_switch_while_active_keeps_one_stream() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(Vec::new()));
        f.controller.start_monitoring().await.unwrap();

        assert_eq!(
            f.controller.toggle_facing_mode().await.unwrap(),
            FacingMode::Environment
        );
        assert_eq!(f.camera.live_streams(), 1);
        assert_eq!(f.controller.status().facing_mode, FacingMode::Environment);

        f.controller.stop_monitoring().await.unwrap();
        assert_eq!(f.camera.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_rejected_and_stop_is_idempotent() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(Vec::new()));

        f.controller.stop_monitoring().await.unwrap();
        f.controller.start_monitoring().await.unwrap();
        assert!(f.controller.start_monitoring().await.is_err());
        assert_eq!(f.camera.live_streams(), 1);

        f.controller.stop_monitoring().await.unwrap();
        f.controller.stop_monitoring().await.unwrap();
        assert_eq!(f.camera.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_captures_by_id() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));
        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        f.controller.stop_monitoring().await.unwrap();

        let id = f.controller.captures()[0].id.clone();
        assert!(!f.controller.delete_capture("unknown"));
        assert!(f.controller.delete_capture(&id));
        assert!(f.controller.captures().is_empty());
        assert!(!f.controller.delete_capture(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn warm_cache_activation_acts_on_first_result() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));
        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        f.controller.stop_monitoring().await.unwrap();
        let plays = f.tones.play_count();

        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(10)).await;

        let status = f.controller.status();
        assert!(status.detecting);
        assert!(status.alarm_active);
        assert_eq!(f.tones.play_count(), plays + 1);
        assert_eq!(f.loader.load_count(), 1);
        f.controller.stop_monitoring().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_facing_switch_stops_monitoring() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));
        f.controller.start_monitoring().await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(f.controller.status().alarm_active);

        f.camera.set_denying(true);
        let err = f
            .controller
            .switch_facing_mode(FacingMode::Environment)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("permission denied"));
        let status = f.controller.status();
        assert!(!status.active);
        assert!(!status.alarm_active);
        assert_eq!(status.phase, DetectionPhase::Idle);
        assert_eq!(f.camera.live_streams(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_racing_alarm_toggles_leaves_gates_closed() {
        let f = fixture_with(FakeCamera::new(), CountingLoader::new(person_script()));

        for _ in 0..25 {
            f.controller.start_monitoring().await.unwrap();
            for _ in 0..200 {
                if f.controller.status().alarm_active {
                    break;
                }
                sleep(Duration::from_millis(1)).await;
            }

            let toggler = {
                let controller = f.controller.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        controller.toggle_alarm();
                        tokio::task::yield_now().await;
                    }
                })
            };
            f.controller.stop_monitoring().await.unwrap();
            toggler.await.unwrap();

            assert!(!f.controller.status().alarm_active);
            assert!(!f.controller.inner.captures.is_capturing());
            assert_eq!(f.camera.live_streams(), 0);
        }
    }
}

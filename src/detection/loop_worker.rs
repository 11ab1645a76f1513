use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::media::MediaSource;
use crate::monitor::MonitorEvent;

use super::{has_person, DetectionLatch, DetectionPhase, Detector};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Everything one activation of the detection loop needs.
pub struct DetectionWorker {
    pub detector: Arc<Detector>,
    pub media: Arc<MediaSource>,
    pub latch: Arc<DetectionLatch>,
    pub phase: Arc<watch::Sender<DetectionPhase>>,
    pub events: broadcast::Sender<MonitorEvent>,
    pub generation: u64,
    pub interval: Duration,
}

/// Loads the model if needed, then polls the detector until cancelled.
///
/// Each inference is awaited before the next tick and late ticks are skipped,
/// so calls never overlap. A tick that finds a timed-out inference still
/// running is skipped too and leaves the detection state as it was. Results go through the latch tagged with this
/// activation's generation.
pub async fn detection_loop(worker: DetectionWorker, cancel_token: CancellationToken) {
    let DetectionWorker {
        detector,
        media,
        latch,
        phase,
        events,
        generation,
        interval,
    } = worker;

    if !detector.is_loaded() {
        phase.send_replace(DetectionPhase::Loading);

        // The load runs detached so a cancelled activation still fills the cache.
        let load = tokio::spawn({
            let detector = Arc::clone(&detector);
            async move { detector.load_model().await }
        });

        tokio::select! {
            result = load => {
                let failure = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(join_err) => Some(format!("model load task failed: {join_err}")),
                };
                if let Some(message) = failure {
                    log_error!("detection model failed to load: {message}");
                    phase.send_replace(DetectionPhase::LoadFailed);
                    let _ = events.send(MonitorEvent::ModelLoadFailed { message });
                    return;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("detection loop cancelled while loading model (generation {generation})");
                return;
            }
        }
    }

    phase.send_replace(DetectionPhase::Polling);
    log_info!("detection loop polling every {}ms (generation {generation})", interval.as_millis());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(frame) = media.current_frame() else {
                    log_debug!("detection tick skipped: frame not ready");
                    continue;
                };

                sequence += 1;
                let detections = tokio::select! {
                    detections = detector.poll(&frame) => detections,
                    _ = cancel_token.cancelled() => break,
                };
                let Some(detections) = detections else {
                    continue;
                };

                let present = has_person(&detections);
                if !latch.apply(generation, sequence, present) {
                    log_debug!("discarded stale detection result (generation {generation}, seq {sequence})");
                }
            }
            _ = cancel_token.cancelled() => {
                break;
            }
        }
    }

    log_info!("detection loop shutting down (generation {generation})");
}

pub mod beep;
pub mod engine;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use engine::RodioToneOutput;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// A short alarm pulse with an exponential gain decay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency_hz: f32,
    pub start_gain: f32,
    pub end_gain: f32,
    pub duration: Duration,
}

impl Default for Tone {
    fn default() -> Self {
        Self {
            frequency_hz: 800.0,
            start_gain: 0.3,
            end_gain: 0.01,
            duration: Duration::from_millis(200),
        }
    }
}

/// Audio sink for alarm pulses.
pub trait ToneOutput: Send + Sync {
    fn play(&self, tone: &Tone);
    /// Fades out anything still sounding.
    fn silence(&self);
}

struct PulseTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Sounds `tone` every `interval` while its signal is high.
///
/// `set_signal` must be called from within a tokio runtime.
pub struct AlarmDriver {
    output: Arc<dyn ToneOutput>,
    tone: Tone,
    interval: Duration,
    pulse: Arc<Mutex<Option<PulseTask>>>,
}

impl AlarmDriver {
    pub fn new(output: Arc<dyn ToneOutput>, tone: Tone, interval: Duration) -> Self {
        Self {
            output,
            tone,
            interval,
            pulse: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_sounding(&self) -> bool {
        lock_pulse(&self.pulse).is_some()
    }

    /// Rising edge: first tone now, then one per interval. Falling edge:
    /// the pulse task is cancelled and the output silenced before returning.
    pub fn set_signal(&self, should_sound: bool) {
        let mut pulse = lock_pulse(&self.pulse);

        if should_sound {
            if pulse.is_some() {
                return;
            }
            log_info!("alarm on");
            self.output.play(&self.tone);

            let cancel_token = CancellationToken::new();
            let handle = tokio::spawn(pulse_loop(
                Arc::clone(&self.output),
                Arc::clone(&self.pulse),
                self.tone,
                self.interval,
                cancel_token.clone(),
            ));
            *pulse = Some(PulseTask {
                cancel_token,
                handle,
            });
        } else if let Some(task) = pulse.take() {
            task.cancel_token.cancel();
            task.handle.abort();
            self.output.silence();
            log_info!("alarm off");
        }
    }
}

impl Drop for AlarmDriver {
    fn drop(&mut self) {
        if let Some(task) = lock_pulse(&self.pulse).take() {
            task.cancel_token.cancel();
            task.handle.abort();
            self.output.silence();
        }
    }
}

fn lock_pulse(pulse: &Mutex<Option<PulseTask>>) -> MutexGuard<'_, Option<PulseTask>> {
    match pulse.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// Checked under the driver lock so a tone can never start after silence().
fn play_unless_cancelled(
    output: &dyn ToneOutput,
    pulse: &Mutex<Option<PulseTask>>,
    tone: &Tone,
    cancel_token: &CancellationToken,
) -> bool {
    let _guard = lock_pulse(pulse);
    if cancel_token.is_cancelled() {
        return false;
    }
    output.play(tone);
    true
}

async fn pulse_loop(
    output: Arc<dyn ToneOutput>,
    pulse: Arc<Mutex<Option<PulseTask>>>,
    tone: Tone,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !play_unless_cancelled(output.as_ref(), &pulse, &tone, &cancel_token) {
                    break;
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
    log_debug!("alarm pulse task stopped");
}

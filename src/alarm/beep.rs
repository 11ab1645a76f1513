use rodio::Source;
use std::f32::consts::PI;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use super::Tone;

const SAMPLE_RATE: u32 = 44100;
/// 5 ms linear ramp to zero once a release is requested.
pub const RELEASE_SAMPLES: usize = (SAMPLE_RATE as usize) / 200;

/// One alarm pulse: a mono sine with an exponential gain decay.
///
/// The envelope ends near silence, so a pulse that runs to completion never
/// clicks. Setting the shared release flag cuts it short with a short linear
/// fade instead of stopping mid-waveform.
pub struct Beep {
    frequency_hz: f32,
    start_gain: f32,
    decay_ratio: f32,
    total_samples: usize,
    num_sample: usize,
    release: Arc<AtomicBool>,
    release_started_at: Option<usize>,
}

impl Beep {
    pub fn new(tone: &Tone) -> Self {
        Self::with_release(tone, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_release(tone: &Tone, release: Arc<AtomicBool>) -> Self {
        let total_samples = (tone.duration.as_secs_f32() * SAMPLE_RATE as f32).round() as usize;
        let start_gain = tone.start_gain.max(f32::EPSILON);
        Self {
            frequency_hz: tone.frequency_hz,
            start_gain,
            decay_ratio: tone.end_gain.max(f32::EPSILON) / start_gain,
            total_samples,
            num_sample: 0,
            release,
            release_started_at: None,
        }
    }

    fn gain_at(&self, progress: f32) -> f32 {
        self.start_gain * self.decay_ratio.powf(progress)
    }

    /// 1.0 until released, then a linear ramp down to 0.0.
    fn release_gain(&mut self) -> Option<f32> {
        if self.release_started_at.is_none() && self.release.load(Ordering::Relaxed) {
            // A pulse released before its first sample never starts.
            if self.num_sample == 0 {
                return None;
            }
            self.release_started_at = Some(self.num_sample);
        }

        match self.release_started_at {
            None => Some(1.0),
            Some(start) => {
                let elapsed = self.num_sample - start;
                if elapsed >= RELEASE_SAMPLES {
                    None
                } else {
                    Some(1.0 - elapsed as f32 / RELEASE_SAMPLES as f32)
                }
            }
        }
    }

    fn remaining(&self) -> usize {
        let natural = self.total_samples.saturating_sub(self.num_sample);
        match self.release_started_at {
            Some(start) => natural.min((start + RELEASE_SAMPLES).saturating_sub(self.num_sample)),
            None => natural,
        }
    }
}

impl Iterator for Beep {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }
        let fade = self.release_gain()?;

        let t = self.num_sample as f32 / SAMPLE_RATE as f32;
        let progress = self.num_sample as f32 / self.total_samples as f32;
        self.num_sample += 1;

        Some((2.0 * PI * self.frequency_hz * t).sin() * self.gain_at(progress) * fade)
    }
}

impl Source for Beep {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.remaining())
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f32(
            self.total_samples as f32 / SAMPLE_RATE as f32,
        ))
    }
}

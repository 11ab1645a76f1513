use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct LatchState {
    generation: u64,
    last_applied: u64,
}

/// Single writer of the "person present" signal.
///
/// Results are tagged with the activation generation and a per-activation
/// sequence number. A result is applied only if its generation is current and
/// its sequence is newer than the last one applied.
pub struct DetectionLatch {
    tx: watch::Sender<bool>,
    state: Mutex<LatchState>,
}

impl DetectionLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            state: Mutex::new(LatchState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LatchState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_detected(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Opens a new activation. Results from earlier generations are rejected from now on.
    pub fn begin_generation(&self) -> u64 {
        let mut state = self.lock_state();
        state.generation = state.generation.wrapping_add(1);
        state.last_applied = 0;
        self.set(false);
        state.generation
    }

    /// Ends the current activation and clears the signal.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.generation = state.generation.wrapping_add(1);
        state.last_applied = 0;
        self.set(false);
    }

    /// Returns whether the result was applied.
    pub fn apply(&self, generation: u64, sequence: u64, present: bool) -> bool {
        let mut state = self.lock_state();
        if generation != state.generation || sequence <= state.last_applied {
            return false;
        }
        state.last_applied = sequence;
        self.set(present);
        true
    }

    fn set(&self, present: bool) {
        self.tx.send_if_modified(|current| {
            if *current == present {
                false
            } else {
                *current = present;
                true
            }
        });
    }
}

impl Default for DetectionLatch {
    fn default() -> Self {
        Self::new()
    }
}

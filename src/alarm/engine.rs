use log::{debug, warn};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;

use super::{beep::Beep, Tone, ToneOutput};

enum AudioCommand {
    Play(Tone),
    Silence,
}

/// Speaker output backed by rodio.
///
/// rodio's `OutputStream` is not `Send`, so a dedicated thread owns the stream
/// and sink and is driven through a command channel. Silencing releases the
/// pulses in the current sink so they fade out rather than being cut.
pub struct RodioToneOutput {
    tx: Mutex<Option<Sender<AudioCommand>>>,
}

impl RodioToneOutput {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, String> {
        let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("alarm-audio".to_string())
            .spawn(move || {
                let mut stream: Option<(OutputStream, OutputStreamHandle)> = None;
                let mut sink: Option<(Sink, Arc<AtomicBool>)> = None;

                fn ensure_sink(
                    stream: &mut Option<(OutputStream, OutputStreamHandle)>,
                    sink: &mut Option<(Sink, Arc<AtomicBool>)>,
                ) -> Result<(), String> {
                    if stream.is_none() {
                        let opened = OutputStream::try_default()
                            .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                        *stream = Some(opened);
                    }
                    if sink.is_none() {
                        if let Some((_, handle)) = stream.as_ref() {
                            let new_sink = Sink::try_new(handle)
                                .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                            *sink = Some((new_sink, Arc::new(AtomicBool::new(false))));
                        }
                    }
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Play(tone) => {
                            if let Err(err) = ensure_sink(&mut stream, &mut sink) {
                                warn!("Alarm tone dropped: {}", err);
                                continue;
                            }
                            if let Some((s, release)) = sink.as_ref() {
                                s.append(Beep::with_release(&tone, Arc::clone(release)));
                            }
                        }
                        AudioCommand::Silence => {
                            // The stream stays open so the released pulse can finish its fade.
                            if let Some((s_old, release)) = sink.take() {
                                release.store(true, Ordering::Relaxed);
                                s_old.detach();
                            }
                        }
                    }
                }
                debug!("Alarm audio thread exiting");
            })
            .map_err(|e| e.to_string())?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

impl Default for RodioToneOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneOutput for RodioToneOutput {
    fn play(&self, tone: &Tone) {
        match self.ensure_thread() {
            Ok(tx) => {
                if let Err(err) = tx.send(AudioCommand::Play(*tone)) {
                    warn!("Alarm audio thread unavailable: {}", err);
                }
            }
            Err(err) => warn!("Failed to start alarm audio thread: {}", err),
        }
    }

    fn silence(&self) {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(AudioCommand::Silence);
        }
    }
}

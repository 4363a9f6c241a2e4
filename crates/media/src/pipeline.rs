use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::capture::{CaptureDevice, CaptureError, CaptureSession};
use crate::encoder::{decode_wav, EncodeError, EncodedVoiceNote, VoiceEncoder};

/// Fixed interval driving the elapsed-time display while recording.
pub const RECORDER_TICK: Duration = Duration::from_millis(250);

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderEvent {
    Started,
    Tick { elapsed: Duration },
    Cancelled,
    Stopped { elapsed: Duration },
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Locally playable artifact the user confirms or discards before anything
/// is uploaded or dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceNotePreview {
    pub encoded: EncodedVoiceNote,
    /// Tick-tracked elapsed time, as shown to the user while recording.
    pub elapsed: Duration,
}

struct ActiveRecording {
    session: Box<dyn CaptureSession>,
    started_at: Instant,
    ticker: JoinHandle<()>,
}

/// Recording state machine: `idle -> recording -> (stopped | cancelled)`.
/// The capture device is exclusively owned while recording and released on
/// every exit path.
pub struct AudioPipeline {
    device: Arc<dyn CaptureDevice>,
    encoder: Arc<dyn VoiceEncoder>,
    active: Mutex<Option<ActiveRecording>>,
    events: broadcast::Sender<RecorderEvent>,
}

impl AudioPipeline {
    pub fn new(device: Arc<dyn CaptureDevice>, encoder: Arc<dyn VoiceEncoder>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            device,
            encoder,
            active: Mutex::new(None),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> RecorderState {
        if self.active.lock().await.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub async fn start(&self) -> Result<(), RecordError> {
        let mut guard = self.active.lock().await;
        if guard.is_some() {
            return Err(RecordError::AlreadyRecording);
        }
        let session = self.device.acquire().await?;
        let started_at = Instant::now();
        let events = self.events.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = time::interval(RECORDER_TICK);
            interval.tick().await; // completes immediately
            loop {
                let now = interval.tick().await;
                let _ = events.send(RecorderEvent::Tick {
                    elapsed: now - started_at,
                });
            }
        });
        *guard = Some(ActiveRecording {
            session,
            started_at,
            ticker,
        });
        let _ = self.events.send(RecorderEvent::Started);
        Ok(())
    }

    /// Discard all buffered audio and release the device.
    pub async fn cancel(&self) -> Result<(), RecordError> {
        let active = self
            .active
            .lock()
            .await
            .take()
            .ok_or(RecordError::NotRecording)?;
        active.ticker.abort();
        active.session.discard().await;
        debug!("recording cancelled");
        let _ = self.events.send(RecorderEvent::Cancelled);
        Ok(())
    }

    /// Stop, drain, and transcode into a playable preview. The encode is
    /// CPU-bound and runs off the cooperative thread.
    pub async fn stop(&self) -> Result<VoiceNotePreview, RecordError> {
        let active = self
            .active
            .lock()
            .await
            .take()
            .ok_or(RecordError::NotRecording)?;
        active.ticker.abort();
        let elapsed = active.started_at.elapsed();

        let captured = match active.session.finish().await {
            Ok(captured) => captured,
            Err(err) => {
                warn!(error = %err, "capture drain failed");
                let _ = self.events.send(RecorderEvent::Cancelled);
                return Err(err.into());
            }
        };

        let encoder = Arc::clone(&self.encoder);
        let encoded = tokio::task::spawn_blocking(move || {
            let pcm = decode_wav(&captured.wav_bytes)?;
            encoder.encode(&pcm)
        })
        .await
        .map_err(|err| EncodeError::Encoder(format!("encode task aborted: {err}")))??;

        debug!(
            ?elapsed,
            bytes = encoded.bytes.len(),
            "voice note preview ready"
        );
        let _ = self.events.send(RecorderEvent::Stopped { elapsed });
        Ok(VoiceNotePreview { encoded, elapsed })
    }
}

#[cfg(test)]
#[path = "tests/pipeline_tests.rs"]
mod tests;

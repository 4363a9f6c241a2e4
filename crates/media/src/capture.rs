use async_trait::async_trait;
use thiserror::Error;

/// Raw recording as drained from the device, WAV-framed so the pipeline can
/// decode it into PCM without caring which backend captured it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub wav_bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("capture device is busy")]
    DeviceBusy,
    #[error("capture device failure: {0}")]
    Device(String),
}

/// A live recording session. The microphone stays exclusively owned until
/// the session is consumed; both exits release the device.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    /// Stop capturing and drain the buffered recording.
    async fn finish(self: Box<Self>) -> Result<CapturedAudio, CaptureError>;

    /// Release the device without producing an artifact.
    async fn discard(self: Box<Self>);
}

#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

pub struct MissingCaptureDevice;

#[async_trait]
impl CaptureDevice for MissingCaptureDevice {
    async fn acquire(&self) -> Result<Box<dyn CaptureSession>, CaptureError> {
        Err(CaptureError::Device(
            "no capture backend configured".to_string(),
        ))
    }
}

pub mod capture;
pub mod encoder;
pub mod pipeline;

pub use capture::{
    CaptureDevice, CaptureError, CaptureSession, CapturedAudio, MissingCaptureDevice,
};
pub use encoder::{
    decode_wav, EncodeError, EncodedVoiceNote, OpusVoiceEncoder, PcmAudio, VoiceEncoder,
    VOICE_NOTE_MIME,
};
pub use pipeline::{
    AudioPipeline, RecordError, RecorderEvent, RecorderState, VoiceNotePreview, RECORDER_TICK,
};

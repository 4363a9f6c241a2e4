use std::io::Cursor;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

pub const VOICE_NOTE_MIME: &str = "audio/ogg";

/// Fixed stream serial; one logical stream per artifact, so no collisions.
const OGG_STREAM_SERIAL: u32 = 0x4352_4d31;
const OPUS_MAX_PACKET: usize = 4000;

#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved i16 samples, matching the source channel count.
    pub samples: Vec<i16>,
}

impl PcmAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("could not decode captured audio: {0}")]
    Decode(String),
    #[error("unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u16),
    #[error("encoder failure: {0}")]
    Encoder(String),
}

/// Decode a WAV-framed capture into interleaved i16 PCM.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmAudio, EncodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|err| EncodeError::Decode(err.to_string()))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| EncodeError::Decode(err.to_string()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| EncodeError::Decode(err.to_string()))?,
    };
    if samples.is_empty() {
        return Err(EncodeError::Decode(
            "recording contained no samples".to_string(),
        ));
    }
    Ok(PcmAudio {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVoiceNote {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    /// Duration covered by the encoded frames; the final partial frame is
    /// zero-padded, so this is always a whole number of frame intervals.
    pub duration: Duration,
}

pub trait VoiceEncoder: Send + Sync {
    fn encode(&self, pcm: &PcmAudio) -> Result<EncodedVoiceNote, EncodeError>;
    fn frame_interval(&self) -> Duration;
}

/// Streaming Opus encoder producing an Ogg-contained voice note: fixed-size
/// PCM frames in, compressed packets out, last frame zero-padded as the
/// flush.
pub struct OpusVoiceEncoder {
    frame: Duration,
}

impl Default for OpusVoiceEncoder {
    fn default() -> Self {
        Self {
            frame: Duration::from_millis(20),
        }
    }
}

impl OpusVoiceEncoder {
    pub fn new(frame: Duration) -> Self {
        Self { frame }
    }
}

impl VoiceEncoder for OpusVoiceEncoder {
    fn encode(&self, pcm: &PcmAudio) -> Result<EncodedVoiceNote, EncodeError> {
        let channels = match pcm.channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            other => return Err(EncodeError::UnsupportedChannels(other)),
        };
        if !matches!(pcm.sample_rate, 8000 | 12000 | 16000 | 24000 | 48000) {
            return Err(EncodeError::UnsupportedSampleRate(pcm.sample_rate));
        }
        if pcm.samples.is_empty() {
            return Err(EncodeError::Decode(
                "recording contained no samples".to_string(),
            ));
        }

        let mut encoder = opus::Encoder::new(pcm.sample_rate, channels, opus::Application::Voip)
            .map_err(|err| EncodeError::Encoder(err.to_string()))?;
        // Granule positions are always expressed at 48 kHz.
        let granule_scale = 48_000 / pcm.sample_rate as u64;
        let lookahead = encoder.get_lookahead().unwrap_or(0).max(0) as u64;
        let pre_skip = (lookahead * granule_scale).min(u16::MAX as u64) as u16;

        let samples_per_frame =
            (pcm.sample_rate as u64 * self.frame.as_millis() as u64 / 1000) as usize;
        let frame_len = samples_per_frame * pcm.channels as usize;

        let mut out = Vec::new();
        {
            let mut writer = ogg::PacketWriter::new(&mut out);
            writer
                .write_packet(
                    opus_head(pcm, pre_skip),
                    OGG_STREAM_SERIAL,
                    ogg::PacketWriteEndInfo::EndPage,
                    0,
                )
                .map_err(|err| EncodeError::Encoder(err.to_string()))?;
            writer
                .write_packet(
                    opus_tags(),
                    OGG_STREAM_SERIAL,
                    ogg::PacketWriteEndInfo::EndPage,
                    0,
                )
                .map_err(|err| EncodeError::Encoder(err.to_string()))?;

            let chunks: Vec<&[i16]> = pcm.samples.chunks(frame_len).collect();
            let mut padded = vec![0i16; frame_len];
            let mut granule = pre_skip as u64;
            for (index, chunk) in chunks.iter().enumerate() {
                let frame: &[i16] = if chunk.len() == frame_len {
                    chunk
                } else {
                    // Final short frame: zero-pad to drain the encoder.
                    padded[..chunk.len()].copy_from_slice(chunk);
                    padded[chunk.len()..].fill(0);
                    &padded
                };
                let packet = encoder
                    .encode_vec(frame, OPUS_MAX_PACKET)
                    .map_err(|err| EncodeError::Encoder(err.to_string()))?;
                granule += samples_per_frame as u64 * granule_scale;
                let end_info = if index + 1 == chunks.len() {
                    ogg::PacketWriteEndInfo::EndStream
                } else {
                    ogg::PacketWriteEndInfo::NormalPacket
                };
                writer
                    .write_packet(
                        packet,
                        OGG_STREAM_SERIAL,
                        end_info,
                        granule,
                    )
                    .map_err(|err| EncodeError::Encoder(err.to_string()))?;
            }
        }

        let frame_count = pcm.samples.len().div_ceil(frame_len) as u32;
        let duration = self.frame * frame_count;
        debug!(
            bytes = out.len(),
            frames = frame_count,
            "encoded voice note"
        );
        Ok(EncodedVoiceNote {
            bytes: out,
            mime_type: VOICE_NOTE_MIME,
            duration,
        })
    }

    fn frame_interval(&self) -> Duration {
        self.frame
    }
}

fn opus_head(pcm: &PcmAudio, pre_skip: u16) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(pcm.channels as u8);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&pcm.sample_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // channel mapping family
    head
}

fn opus_tags() -> Vec<u8> {
    let vendor = b"crm voice notes";
    let mut tags = Vec::with_capacity(16 + vendor.len());
    tags.extend_from_slice(b"OpusTags");
    tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    tags.extend_from_slice(vendor);
    tags.extend_from_slice(&0u32.to_le_bytes()); // no user comments
    tags
}

#[cfg(test)]
#[path = "tests/encoder_tests.rs"]
mod tests;

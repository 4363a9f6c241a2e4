use std::io::Cursor;
use std::time::Duration;

use super::*;

fn wav_bytes(sample_rate: u32, channels: u16, seconds: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        let total = (sample_rate as f64 * seconds) as usize * channels as usize;
        for n in 0..total {
            let t = n as f64 / sample_rate as f64;
            let sample = ((t * 440.0 * 2.0 * std::f64::consts::PI).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}

#[test]
fn decode_wav_yields_interleaved_pcm() {
    let bytes = wav_bytes(48_000, 1, 0.5);
    let pcm = decode_wav(&bytes).unwrap();
    assert_eq!(pcm.sample_rate, 48_000);
    assert_eq!(pcm.channels, 1);
    assert_eq!(pcm.samples.len(), 24_000);
    assert_eq!(pcm.duration(), Duration::from_millis(500));
}

#[test]
fn decode_wav_rejects_garbage() {
    let err = decode_wav(b"definitely not a wav file").unwrap_err();
    assert!(matches!(err, EncodeError::Decode(_)));
}

#[test]
fn decode_wav_rejects_empty_recordings() {
    let bytes = wav_bytes(48_000, 1, 0.0);
    let err = decode_wav(&bytes).unwrap_err();
    assert!(matches!(err, EncodeError::Decode(_)));
}

#[test]
fn opus_encode_produces_an_ogg_artifact() {
    let pcm = decode_wav(&wav_bytes(48_000, 1, 1.0)).unwrap();
    let encoder = OpusVoiceEncoder::default();
    let note = encoder.encode(&pcm).unwrap();

    assert_eq!(&note.bytes[..4], b"OggS");
    assert_eq!(note.mime_type, VOICE_NOTE_MIME);
    // 48000 samples at 20 ms frames is exactly 50 frames.
    assert_eq!(note.duration, Duration::from_secs(1));
}

#[test]
fn partial_final_frame_is_padded_not_dropped() {
    // 1.01 s does not divide evenly into 20 ms frames.
    let pcm = decode_wav(&wav_bytes(48_000, 1, 1.01)).unwrap();
    let encoder = OpusVoiceEncoder::default();
    let note = encoder.encode(&pcm).unwrap();

    let frame = encoder.frame_interval();
    assert!(note.duration >= pcm.duration());
    assert!(note.duration < pcm.duration() + frame);
}

#[test]
fn stereo_input_is_encoded_with_matching_channel_count() {
    let pcm = decode_wav(&wav_bytes(48_000, 2, 0.2)).unwrap();
    let note = OpusVoiceEncoder::default().encode(&pcm).unwrap();
    assert_eq!(&note.bytes[..4], b"OggS");
    assert_eq!(note.duration, Duration::from_millis(200));
}

#[test]
fn unsupported_sample_rate_is_a_distinct_error() {
    let pcm = PcmAudio {
        sample_rate: 44_100,
        channels: 1,
        samples: vec![0; 4410],
    };
    let err = OpusVoiceEncoder::default().encode(&pcm).unwrap_err();
    assert!(matches!(err, EncodeError::UnsupportedSampleRate(44_100)));
}

#[test]
fn unsupported_channel_count_is_a_distinct_error() {
    let pcm = PcmAudio {
        sample_rate: 48_000,
        channels: 6,
        samples: vec![0; 48_000 * 6 / 100],
    };
    let err = OpusVoiceEncoder::default().encode(&pcm).unwrap_err();
    assert!(matches!(err, EncodeError::UnsupportedChannels(6)));
}

//! PCM framing between normalized f32 samples and the transport's
//! base64 text encoding.
//!
//! The wire format is 16-bit signed little-endian PCM, base64-encoded,
//! tagged with a MIME-style type string (`audio/pcm;rate=16000`). Both
//! directions are pure transforms.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::VoiceError;

/// Microphone capture rate expected by the remote service.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized speech sent back by the remote service.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Encoded wire form of one captured audio frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportBlob {
    /// Base64-encoded PCM16 LE bytes.
    pub data: String,
    /// MIME-style tag describing sample format and rate.
    pub mime_type: String,
}

/// A decoded block of synthesized speech, ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u32,
    /// Arrival order, assigned by the receiver.
    pub sequence: u64,
}

impl InboundAudioChunk {
    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encode one frame of mono f32 samples into its transport form.
///
/// Samples are scaled by `round(s * 32768)` with i16 wraparound; no
/// clamping is performed, so input outside [-1, 1] wraps. Callers keep
/// device output in range.
pub fn encode_frame(samples: &[f32]) -> TransportBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s * 32768.0).round() as i32 as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    TransportBlob {
        data: BASE64.encode(&bytes),
        mime_type: format!("audio/pcm;rate={CAPTURE_SAMPLE_RATE}"),
    }
}

/// Decode a base64 PCM16 payload into normalized f32 samples.
///
/// Fails with [`VoiceError::Codec`] on invalid base64 or a byte length
/// that is not a multiple of two.
pub fn decode_chunk(
    data: &str,
    sample_rate: u32,
    channels: u32,
    sequence: u64,
) -> Result<InboundAudioChunk, VoiceError> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| VoiceError::Codec(format!("invalid base64 payload: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Codec(format!(
            "payload length {} is not a multiple of 2",
            bytes.len()
        )));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();
    Ok(InboundAudioChunk {
        samples,
        sample_rate,
        channels,
        sequence,
    })
}

/// Extract the `rate=` parameter from a PCM MIME tag, if present.
pub fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_quantization_error() {
        let original: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.8)
            .collect();
        let blob = encode_frame(&original);
        let chunk = decode_chunk(&blob.data, CAPTURE_SAMPLE_RATE, 1, 0).unwrap();
        assert_eq!(chunk.samples.len(), original.len());
        for (a, b) in original.iter().zip(&chunk.samples) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn silence_frame_round_trips_to_zeros() {
        let frame = vec![0.0f32; 4096];
        let blob = encode_frame(&frame);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        let chunk = decode_chunk(&blob.data, CAPTURE_SAMPLE_RATE, 1, 0).unwrap();
        assert_eq!(chunk.samples, frame);
    }

    #[test]
    fn odd_byte_length_is_a_codec_error() {
        let data = BASE64.encode([0u8, 1, 2]);
        let err = decode_chunk(&data, PLAYBACK_SAMPLE_RATE, 1, 0).unwrap_err();
        assert!(matches!(err, VoiceError::Codec(_)));
    }

    #[test]
    fn invalid_base64_is_a_codec_error() {
        let err = decode_chunk("not base64!!!", PLAYBACK_SAMPLE_RATE, 1, 0).unwrap_err();
        assert!(matches!(err, VoiceError::Codec(_)));
    }

    #[test]
    fn duration_uses_rate_and_channels() {
        let chunk = InboundAudioChunk {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
            channels: 1,
            sequence: 0,
        };
        assert!((chunk.duration() - 1.0).abs() < 1e-9);
        let empty = InboundAudioChunk {
            samples: Vec::new(),
            sample_rate: 24_000,
            channels: 1,
            sequence: 1,
        };
        assert_eq!(empty.duration(), 0.0);
    }

    #[test]
    fn mime_rate_parsing() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
    }
}

//! PCM sample conversions and transport encoding
//!
//! Pure functions shared by the capture and playback paths. Audio crosses
//! the wire as 16-bit little-endian PCM wrapped in base64; locally it is
//! handled as f32 samples in [-1, 1].

use base64::{engine::general_purpose::STANDARD, Engine};

/// Convert f32 samples in [-1, 1] to 16-bit PCM.
///
/// Samples are scaled by 32768 and truncated. Out-of-range input wraps the
/// way a raw 16-bit store would (e.g. 1.5 does not clamp to i16::MAX); the
/// capture path never produces such values, so this is documented rather
/// than corrected here.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| (s * 32768.0) as i32 as i16).collect()
}

/// Convert 16-bit PCM samples to f32 in [-1, 1].
///
/// Inverse of [`f32_to_i16`] up to quantization error of 1/32768.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Serialize samples as little-endian wire bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Parse little-endian wire bytes back into samples.
///
/// A trailing odd byte is dropped; malformed payloads must not panic the
/// pipeline.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode raw bytes into text-safe transport form (base64, no compression).
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode text-safe transport form back to raw bytes.
///
/// Exact inverse of [`encode_transport`] for all byte values.
pub fn decode_transport(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text)
}

/// Split channel-interleaved samples into per-channel buffers.
///
/// Returns one buffer per channel, preserving sample order within each
/// channel. `channels` of 0 yields no buffers.
pub fn deinterleave(samples: &[i16], channels: usize) -> Vec<Vec<i16>> {
    if channels == 0 {
        return Vec::new();
    }
    let mut out = vec![Vec::with_capacity(samples.len() / channels); channels];
    for (i, &s) in samples.iter().enumerate() {
        out[i % channels].push(s);
    }
    out
}

/// Interleave per-channel buffers back into a single stream.
///
/// Inverse of [`deinterleave`] when all channels have equal length.
pub fn interleave(channels: &[Vec<i16>]) -> Vec<i16> {
    let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len());
    for i in 0..frames {
        for ch in channels {
            out.push(ch[i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_basic() {
        assert_eq!(f32_to_i16(&[0.0]), vec![0]);
        assert_eq!(f32_to_i16(&[0.5]), vec![16384]);
        assert_eq!(f32_to_i16(&[-1.0]), vec![-32768]);
    }

    #[test]
    fn test_f32_to_i16_out_of_range_wraps() {
        // 1.0 * 32768 = 32768, which wraps to i16::MIN on a raw store
        assert_eq!(f32_to_i16(&[1.0]), vec![i16::MIN]);
    }

    #[test]
    fn test_round_trip_quantization_bound() {
        for &s in &[-1.0f32, -0.733, -0.5, 0.0, 0.25, 0.6189, 0.9999] {
            let back = i16_to_f32(&f32_to_i16(&[s]))[0];
            assert!(
                (back - s).abs() <= 1.0 / 32768.0,
                "sample {} round-tripped to {}",
                s,
                back
            );
        }
    }

    #[test]
    fn test_sample_count_preserved() {
        let samples: Vec<f32> = (0..4096).map(|i| (i as f32 / 4096.0) - 0.5).collect();
        assert_eq!(f32_to_i16(&samples).len(), samples.len());
    }

    #[test]
    fn test_le_bytes_round_trip() {
        let samples = vec![0x1234i16, -0x5678, 0, i16::MAX, i16::MIN];
        let bytes = i16_to_le_bytes(&samples);
        assert_eq!(bytes[0], 0x34);
        assert_eq!(bytes[1], 0x12);
        assert_eq!(le_bytes_to_i16(&bytes), samples);
    }

    #[test]
    fn test_le_bytes_trailing_odd_byte_dropped() {
        let samples = le_bytes_to_i16(&[0x34, 0x12, 0xff]);
        assert_eq!(samples, vec![0x1234]);
    }

    #[test]
    fn test_transport_round_trip_all_byte_values() {
        let all: Vec<u8> = (0..=255).collect();
        for len in [0, 1, 2, 3, 17, 256] {
            let input = &all[..len.min(all.len())];
            let encoded = encode_transport(input);
            assert_eq!(decode_transport(&encoded).unwrap(), input);
        }
    }

    #[test]
    fn test_decode_transport_rejects_garbage() {
        assert!(decode_transport("not valid base64!!!").is_err());
    }

    #[test]
    fn test_deinterleave_stereo() {
        // L0 R0 L1 R1 L2 R2
        let interleaved = vec![1i16, -1, 2, -2, 3, -3];
        let channels = deinterleave(&interleaved, 2);
        assert_eq!(channels[0], vec![1, 2, 3]);
        assert_eq!(channels[1], vec![-1, -2, -3]);
        assert_eq!(interleave(&channels), interleaved);
    }

    #[test]
    fn test_deinterleave_mono_identity() {
        let samples = vec![5i16, 6, 7];
        let channels = deinterleave(&samples, 1);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0], samples);
    }

    #[test]
    fn test_deinterleave_zero_channels() {
        assert!(deinterleave(&[1, 2, 3], 0).is_empty());
    }
}

//! PCM16 little-endian conversion and base64 framing for the wire.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Convert `[-1.0, 1.0]` floats to 16-bit little-endian PCM bytes.
/// Out-of-range samples are clamped.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Convert 16-bit little-endian PCM bytes to floats.  A trailing odd byte is
/// ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Samples → PCM16 → base64, as carried by `input_audio_buffer.append`.
pub fn encode_base64(samples: &[f32]) -> String {
    STANDARD.encode(f32_to_pcm16(samples))
}

/// base64 → PCM16 → samples, as carried by `response.audio.delta`.
pub fn decode_base64(encoded: &str) -> Result<Vec<f32>, base64::DecodeError> {
    Ok(pcm16_to_f32(&STANDARD.decode(encoded)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_values() {
        assert_eq!(f32_to_pcm16(&[1.0]), i16::MAX.to_le_bytes().to_vec());
        assert_eq!(f32_to_pcm16(&[0.0]), vec![0, 0]);
        assert_eq!(f32_to_pcm16(&[-1.0]), (-i16::MAX).to_le_bytes().to_vec());
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(f32_to_pcm16(&[3.0]), f32_to_pcm16(&[1.0]));
        assert_eq!(f32_to_pcm16(&[-3.0]), f32_to_pcm16(&[-1.0]));
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        assert_eq!(pcm16_to_f32(&[0, 0, 7]).len(), 1);
    }

    #[test]
    fn base64_carries_samples_within_quantisation() {
        let input = [0.25_f32, -0.5, 0.75];
        let decoded = decode_base64(&encode_base64(&input)).expect("valid base64");
        assert_eq!(decoded.len(), input.len());
        for (a, b) in input.iter().zip(&decoded) {
            assert!((a - b).abs() < 1.0 / 16_000.0, "{a} vs {b}");
        }
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode_base64("not base64!!").is_err());
    }
}

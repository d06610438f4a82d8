//! Minimal PCM16 WAV codec.

use crate::error::{GatewayError, Result};
use std::io::Cursor;

/// Mono 16-bit PCM audio.
///
/// `pcm` holds little-endian samples, so its length is always even and the
/// frame count is `pcm.len() / 2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub pcm: Vec<u8>,
}

impl AudioBuffer {
    /// Build a buffer from raw PCM16 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Audio`] if the sample rate is zero or the byte
    /// length is odd.
    pub fn new(sample_rate: u32, pcm: Vec<u8>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(GatewayError::Audio("sample rate must be positive".to_owned()));
        }
        if pcm.len() % 2 != 0 {
            return Err(GatewayError::Audio(format!(
                "PCM16 data must have even length, got {} bytes",
                pcm.len()
            )));
        }
        Ok(Self { sample_rate, pcm })
    }

    pub fn from_samples(sample_rate: u32, samples: &[i16]) -> Result<Self> {
        Self::new(sample_rate, samples_to_pcm16(samples))
    }

    pub fn frame_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Encode as a single-channel 16-bit WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        write_wav_pcm16(self.sample_rate, &self.pcm)
    }
}

/// Decode a mono PCM16 WAV file.
///
/// # Errors
///
/// Returns [`GatewayError::Audio`] for malformed data, a sample format other
/// than 16-bit integer, or more than one channel.
pub fn read_wav_mono_pcm16(data: &[u8]) -> Result<AudioBuffer> {
    let reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| GatewayError::Audio(format!("cannot parse WAV: {e}")))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(GatewayError::Audio(format!(
            "only PCM16 WAV is supported, got {} bits ({:?})",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels != 1 {
        return Err(GatewayError::Audio(format!(
            "expected mono WAV, got {} channels",
            spec.channels
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<i16>, _>>()
        .map_err(|e| GatewayError::Audio(format!("WAV read error: {e}")))?;
    AudioBuffer::from_samples(spec.sample_rate, &samples)
}

/// Encode PCM16 bytes as a single-channel WAV file.
///
/// # Errors
///
/// Returns [`GatewayError::Audio`] if `pcm` has odd length or encoding fails.
pub fn write_wav_pcm16(sample_rate: u32, pcm: &[u8]) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(GatewayError::Audio(format!(
            "PCM16 data must have even length, got {} bytes",
            pcm.len()
        )));
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut out = Vec::with_capacity(44 + pcm.len());
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)
            .map_err(|e| GatewayError::Audio(format!("failed to create WAV writer: {e}")))?;
        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| GatewayError::Audio(format!("failed to write WAV sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| GatewayError::Audio(format!("failed to finalize WAV: {e}")))?;
    }
    Ok(out)
}

/// Little-endian byte encoding of PCM16 samples.
pub fn samples_to_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert float samples in `[-1, 1]` to PCM16, clamping out-of-range input.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn round_trip_preserves_rate_and_samples() {
        for sample_rate in [8_000, 22_050, 24_000, 44_100] {
            let pcm = samples_to_pcm16(&[0, 1, -1, i16::MAX, i16::MIN, 1234]);
            let wav = write_wav_pcm16(sample_rate, &pcm).unwrap();
            let decoded = read_wav_mono_pcm16(&wav).unwrap();
            assert_eq!(decoded.sample_rate, sample_rate);
            assert_eq!(decoded.pcm, pcm);
        }
    }

    #[test]
    fn round_trip_of_empty_buffer() {
        let wav = write_wav_pcm16(16_000, &[]).unwrap();
        let decoded = read_wav_mono_pcm16(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert!(decoded.pcm.is_empty());
        assert_eq!(decoded.frame_count(), 0);
    }

    #[test]
    fn odd_length_pcm_is_rejected() {
        assert!(write_wav_pcm16(16_000, &[1, 2, 3]).is_err());
        assert!(AudioBuffer::new(16_000, vec![0; 5]).is_err());
    }

    #[test]
    fn stereo_wav_is_rejected() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            writer.write_sample(1i16).unwrap();
            writer.write_sample(2i16).unwrap();
            writer.finalize().unwrap();
        }
        assert!(read_wav_mono_pcm16(&bytes).is_err());
    }

    #[test]
    fn garbage_is_an_audio_error() {
        let err = read_wav_mono_pcm16(b"definitely not a wav").unwrap_err();
        assert!(matches!(err, GatewayError::Audio(_)));
    }

    #[test]
    fn f32_conversion_clamps() {
        assert_eq!(f32_to_i16(&[0.0, 1.0, -1.0, 2.0]), vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }
}

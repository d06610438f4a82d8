//! Removal of a duplicated leading segment from synthesized speech.
//!
//! Some neural TTS backends occasionally emit the first segment twice,
//! back-to-back. [`trim_repeat_prefix_pcm16`] detects a block `A` such that
//! the audio starts with `A + A` and drops the first copy. Only exact sample
//! equality counts; near-duplicates are left alone so that legitimately
//! repetitive speech is never cut.

use super::wav::{read_wav_mono_pcm16, write_wav_pcm16};
use crate::error::Result;

/// Buffers shorter than this are returned unchanged.
const MIN_SECONDS: f64 = 0.4;
/// Shortest candidate prefix.
const MIN_PREFIX_SECONDS: f64 = 0.2;
/// Longest candidate prefix (further capped at half the buffer).
const MAX_PREFIX_SECONDS: f64 = 2.5;
/// Candidate length increment.
const STEP_SECONDS: f64 = 0.02;

fn frames(sample_rate: u32, seconds: f64) -> usize {
    (f64::from(sample_rate) * seconds) as usize
}

/// Return `pcm` without its first block if the buffer starts with that block
/// repeated twice; otherwise return `pcm` unchanged.
///
/// Candidate lengths run from 0.2 s up to (excluding) `min(2.5 s, len / 2)` in
/// 20 ms steps, and the shortest match wins.
pub fn trim_repeat_prefix_pcm16(pcm: &[u8], sample_rate: u32) -> &[u8] {
    let total_frames = pcm.len() / 2;
    if pcm.is_empty() || total_frames < frames(sample_rate, MIN_SECONDS) {
        return pcm;
    }

    let step = frames(sample_rate, STEP_SECONDS).max(1);
    let start_min = frames(sample_rate, MIN_PREFIX_SECONDS);
    let start_max = frames(sample_rate, MAX_PREFIX_SECONDS).min(total_frames / 2);

    for prefix_len in (start_min..start_max).step_by(step) {
        let a1 = prefix_len * 2;
        let a2 = a1 * 2;
        if a2 > pcm.len() {
            break;
        }
        if prefix_len > 0 && pcm[..a1] == pcm[a1..a2] {
            return &pcm[a1..];
        }
    }
    pcm
}

/// Apply [`trim_repeat_prefix_pcm16`] to a WAV file.
///
/// Returns `Ok(None)` when nothing was trimmed.
///
/// # Errors
///
/// Fails if the input is not a mono PCM16 WAV file.
pub fn dedup_wav(wav: &[u8]) -> Result<Option<Vec<u8>>> {
    let audio = read_wav_mono_pcm16(wav)?;
    let trimmed = trim_repeat_prefix_pcm16(&audio.pcm, audio.sample_rate);
    if trimmed.len() == audio.pcm.len() {
        return Ok(None);
    }
    write_wav_pcm16(audio.sample_rate, trimmed).map(Some)
}

//! PCM16 WAV handling and post-synthesis clean-up.

pub mod dedup;
pub mod wav;

pub use dedup::{dedup_wav, trim_repeat_prefix_pcm16};
pub use wav::{AudioBuffer, read_wav_mono_pcm16, write_wav_pcm16};

//! Text-to-speech engines.
//!
//! Three backends sit behind [`TtsEngine`]:
//! - **macOS `say`** ([`SayTts`]): platform voices converted with `afconvert`.
//! - **Piper** ([`PiperTts`]): offline ONNX voices run with `ort`.
//! - **Voice cloning** ([`CloningTts`]): a conditional neural backend that
//!   accepts reference audio and writes its output to files.

pub mod cloning;
pub mod mlx_audio;
pub mod piper;
pub mod say;

pub use cloning::{CloningBackend, CloningRequest, CloningTts};
pub use mlx_audio::MlxAudioCli;
pub use piper::PiperTts;
pub use say::SayTts;

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::process::Stdio;

/// Backend-specific request fields, passed through untouched.
pub type ExtraParams = serde_json::Map<String, serde_json::Value>;

/// Voice name meaning "let the backend choose".
pub const DEFAULT_VOICE: &str = "default";

/// Output format used when a request names none.
pub const DEFAULT_FORMAT: &str = "wav";

/// Per-request synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsParams {
    pub voice: String,
    pub speed: f32,
    /// Speaker index for multi-speaker voices.
    pub speaker_id: Option<i64>,
}

impl Default for TtsParams {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_owned(),
            speed: 1.0,
            speaker_id: None,
        }
    }
}

impl TtsParams {
    /// Whether the caller asked for a specific voice.
    pub fn explicit_voice(&self) -> Option<&str> {
        let voice = self.voice.trim();
        (!voice.is_empty() && voice != DEFAULT_VOICE).then_some(voice)
    }
}

/// A text-to-speech engine.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Stable id this engine is registered under.
    fn model_id(&self) -> &str;

    /// Synthesize `text` into an audio file in `format`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::InvalidRequest`] for input the engine cannot act on
    /// (such as an unsupported format); [`GatewayError::Backend`] when the
    /// underlying backend fails.
    async fn synthesize(
        &self,
        text: &str,
        params: &TtsParams,
        format: &str,
        extra: &ExtraParams,
    ) -> Result<Vec<u8>>;
}

/// Lower-cased output format, defaulting to [`DEFAULT_FORMAT`].
pub fn normalize_format(format: Option<&str>) -> String {
    match format.map(str::trim) {
        Some(f) if !f.is_empty() => f.to_ascii_lowercase(),
        _ => DEFAULT_FORMAT.to_owned(),
    }
}

/// HTTP media type for an output format.
pub fn media_type(format: &str) -> &'static str {
    match format {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "aiff" => "audio/aiff",
        _ => "application/octet-stream",
    }
}

/// Run an external command to completion, discarding stdout.
///
/// # Errors
///
/// Returns [`GatewayError::Backend`] if the command cannot be started or exits
/// unsuccessfully; the message carries the tail of its stderr.
pub(crate) async fn run_command(command: &mut tokio::process::Command, name: &str) -> Result<()> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| GatewayError::backend("OSError", format!("failed to run {name}: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let tail: String = {
        let chars: Vec<char> = stderr.chars().collect();
        chars[chars.len().saturating_sub(2_000)..].iter().collect()
    };
    Err(GatewayError::backend(
        "CalledProcessError",
        if tail.is_empty() {
            format!("{name} exited with {}", output.status)
        } else {
            format!("{name} exited with {}: {tail}", output.status)
        },
    ))
}

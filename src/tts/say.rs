//! macOS platform voices via `say` and `afconvert`.

use super::{ExtraParams, TtsEngine, TtsParams, run_command};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

const SUPPORTED_FORMATS: [&str; 3] = ["wav", "mp3", "aiff"];

/// Synthesizes with the system `say` utility.
///
/// `say` renders AIFF, which is returned as-is for `aiff` and converted with
/// `afconvert` for `wav` (16-bit little-endian PCM) and `mp3`. The speed
/// parameter is accepted but has no effect.
pub struct SayTts {
    model_id: String,
    say: PathBuf,
    afconvert: PathBuf,
}

impl SayTts {
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if `say` or `afconvert` is not on `PATH`.
    pub fn new(model_id: impl Into<String>) -> Result<Self> {
        let say = which::which("say")
            .map_err(|_| GatewayError::Config("macOS 'say' command not found".to_owned()))?;
        let afconvert = which::which("afconvert")
            .map_err(|_| GatewayError::Config("macOS 'afconvert' command not found".to_owned()))?;
        Ok(Self::with_commands(model_id, say, afconvert))
    }

    /// Use explicit utility paths instead of looking them up.
    pub fn with_commands(model_id: impl Into<String>, say: PathBuf, afconvert: PathBuf) -> Self {
        Self {
            model_id: model_id.into(),
            say,
            afconvert,
        }
    }
}

#[async_trait]
impl TtsEngine for SayTts {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn synthesize(
        &self,
        text: &str,
        params: &TtsParams,
        format: &str,
        _extra: &ExtraParams,
    ) -> Result<Vec<u8>> {
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(GatewayError::InvalidRequest(format!(
                "Unsupported format: {format}. Supported: wav, mp3, aiff"
            )));
        }

        let work = tempfile::tempdir()?;
        let aiff_path = work.path().join("out.aiff");

        let mut say = tokio::process::Command::new(&self.say);
        say.arg("-o").arg(&aiff_path);
        if let Some(voice) = params.explicit_voice() {
            say.args(["-v", voice]);
        }
        say.arg("--").arg(text);
        debug!(voice = ?params.explicit_voice(), "running say");
        run_command(&mut say, "say").await?;

        if format == "aiff" {
            return Ok(tokio::fs::read(&aiff_path).await?);
        }

        let out_path = work.path().join(format!("out.{format}"));
        let mut convert = tokio::process::Command::new(&self.afconvert);
        if format == "wav" {
            convert.args(["-f", "WAVE", "-d", "LEI16"]);
        } else {
            convert.args(["-f", "mp3f"]);
        }
        convert.arg(&aiff_path).arg(&out_path);
        run_command(&mut convert, "afconvert").await?;

        Ok(tokio::fs::read(&out_path).await?)
    }
}

//! `mlx-audio-plus` command-line backend for [`CloningTts`](super::CloningTts).

use super::cloning::{CloningBackend, CloningRequest};
use super::run_command;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Default generator entry point installed by `mlx-audio-plus`.
pub const DEFAULT_COMMAND: &str = "mlx_audio.tts.generate";

/// Runs the `mlx_audio.tts.generate` CLI once per request.
#[derive(Debug, Clone)]
pub struct MlxAudioCli {
    program: PathBuf,
}

impl MlxAudioCli {
    /// Locate `command` on `PATH` (or use it directly if it is a path).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the command cannot be found.
    pub fn new(command: &str) -> Result<Self> {
        let program = which::which(command).map_err(|_| {
            GatewayError::Config(format!(
                "mlx-audio-plus is required for AUDIO_BACKEND=mlx-audio-plus \
                 ('{command}' not found; install with: uv add mlx-audio-plus)"
            ))
        })?;
        Ok(Self { program })
    }

    /// Command-line arguments for one request.
    ///
    /// Values are attached as `--flag=value` so that text starting with `-`
    /// is never parsed as an option.
    pub fn arguments(request: &CloningRequest) -> Vec<String> {
        let file_prefix = request.file_prefix.to_string_lossy();
        let valued = [
            ("model", Some(request.model.as_str())),
            ("text", request.text.as_deref()),
            ("ref_audio", request.ref_audio.as_deref()),
            ("source_audio", request.source_audio.as_deref()),
            ("ref_text", request.ref_text.as_deref()),
            ("instruct_text", request.instruct_text.as_deref()),
            ("file_prefix", Some(&*file_prefix)),
            ("audio_format", Some(request.audio_format.as_str())),
        ];
        let mut args: Vec<String> = valued
            .into_iter()
            .filter_map(|(flag, value)| value.map(|v| format!("--{flag}={v}")))
            .collect();
        if request.join_audio {
            args.push("--join_audio".to_owned());
        }
        args
    }
}

#[async_trait]
impl CloningBackend for MlxAudioCli {
    async fn generate(&self, request: &CloningRequest) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(Self::arguments(request));
        if let Some(dir) = request.file_prefix.parent() {
            command.current_dir(dir);
        }
        debug!(model = %request.model, format = %request.audio_format, "running mlx_audio");
        run_command(&mut command, "mlx_audio").await
    }
}

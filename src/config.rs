//! Gateway configuration.
//!
//! Values come from an optional TOML file, then environment variables
//! override them. The environment names match what earlier deployments
//! already set (`CHAT_MODEL_PATH`, `AUDIO_BACKEND`, ...).

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "OPENLOCAL_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Chat model.
    pub chat: ChatConfig,
    /// Speech model and its default conditioning inputs.
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Id the chat engine is registered under.
    pub model_id: String,
    /// GGUF file, or a directory holding one. Unset means echo mode.
    pub model_path: Option<PathBuf>,
    /// GGUF file name inside `model_path` when it is a directory with several.
    pub gguf_file: Option<String>,
    /// Serve the echo engine even when a model path is set.
    pub echo_mode: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model_id: "local-chat".to_owned(),
            model_path: None,
            gguf_file: None,
            echo_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub model_id: String,
    pub model_path: Option<PathBuf>,
    pub backend: AudioBackend,
    /// Used when a speech request carries no `ref_audio`.
    pub ref_audio: Option<String>,
    pub ref_text: Option<String>,
    pub instruct_text: Option<String>,
    pub source_audio: Option<String>,
    /// Generator command for the `mlx-audio-plus` backend.
    pub mlx_audio_command: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            model_id: "local-audio".to_owned(),
            model_path: None,
            backend: AudioBackend::Auto,
            ref_audio: None,
            ref_text: None,
            instruct_text: None,
            source_audio: None,
            mlx_audio_command: crate::tts::mlx_audio::DEFAULT_COMMAND.to_owned(),
        }
    }
}

/// Which TTS backend to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioBackend {
    /// Piper when a model path is set, otherwise macOS `say`.
    #[default]
    Auto,
    MacosSay,
    Piper,
    #[serde(alias = "cosyvoice")]
    MlxAudioPlus,
}

impl AudioBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::MacosSay => "macos-say",
            Self::Piper => "piper",
            Self::MlxAudioPlus => "mlx-audio-plus",
        }
    }
}

impl fmt::Display for AudioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioBackend {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "macos-say" => Ok(Self::MacosSay),
            "piper" => Ok(Self::Piper),
            "mlx-audio-plus" | "cosyvoice" => Ok(Self::MlxAudioPlus),
            _ => Err(GatewayError::Config(format!("Unknown AUDIO_BACKEND: {s}"))),
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Override fields from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] for an unparsable `PORT` or an unknown
    /// `AUDIO_BACKEND`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override fields from `lookup`, which maps a variable name to its value.
    ///
    /// Empty values for optional paths and texts count as unset.
    ///
    /// # Errors
    ///
    /// See [`apply_env`](Self::apply_env).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty("HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("invalid PORT: {port}")))?;
        }

        if let Some(id) = non_empty("CHAT_MODEL_ID").or_else(|| non_empty("MODEL_ID")) {
            self.chat.model_id = id;
        }
        if let Some(path) = non_empty("CHAT_MODEL_PATH").or_else(|| non_empty("MODEL_PATH")) {
            self.chat.model_path = Some(PathBuf::from(path));
        }
        if let Some(file) = non_empty("CHAT_GGUF_FILE") {
            self.chat.gguf_file = Some(file);
        }
        if let Some(flag) = lookup("ECHO_MODE") {
            self.chat.echo_mode = truthy(&flag);
        }

        if let Some(id) = non_empty("AUDIO_MODEL_ID") {
            self.audio.model_id = id;
        }
        if let Some(path) = non_empty("AUDIO_MODEL_PATH") {
            self.audio.model_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = lookup("AUDIO_BACKEND") {
            self.audio.backend = backend.parse()?;
        }
        let defaults = [
            ("AUDIO_REF_AUDIO", &mut self.audio.ref_audio),
            ("AUDIO_REF_TEXT", &mut self.audio.ref_text),
            ("AUDIO_INSTRUCT_TEXT", &mut self.audio.instruct_text),
            ("AUDIO_SOURCE_AUDIO", &mut self.audio.source_audio),
        ];
        for (name, field) in defaults {
            if let Some(value) = non_empty(name) {
                *field = Some(value);
            }
        }
        if let Some(command) = non_empty("MLX_AUDIO_COMMAND") {
            self.audio.mlx_audio_command = command;
        }
        Ok(())
    }

    /// File (if any) then environment.
    ///
    /// A path that does not exist yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed or an environment
    /// value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!("config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Config file named by `--config <path>` / `--config=<path>` in `args`, or
/// by the variable [`CONFIG_ENV`].
pub fn config_path_from(
    args: impl IntoIterator<Item = String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    lookup(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.chat.model_id, "local-chat");
        assert_eq!(config.audio.model_id, "local-audio");
        assert_eq!(config.audio.backend, AudioBackend::Auto);
        assert_eq!(config.audio.mlx_audio_command, "mlx_audio.tts.generate");
        assert!(!config.chat.echo_mode);
    }

    #[test]
    fn env_overrides_everything() {
        let mut config = GatewayConfig::default();
        config
            .apply_env_from(env(&[
                ("HOST", "0.0.0.0"),
                ("PORT", "9001"),
                ("CHAT_MODEL_ID", "qwen"),
                ("CHAT_MODEL_PATH", "/models/qwen"),
                ("CHAT_GGUF_FILE", "q4.gguf"),
                ("ECHO_MODE", "Yes"),
                ("AUDIO_MODEL_ID", "voice"),
                ("AUDIO_MODEL_PATH", "/models/voice.onnx"),
                ("AUDIO_BACKEND", "Piper"),
                ("AUDIO_REF_AUDIO", "/refs/me.wav"),
                ("AUDIO_REF_TEXT", "hello"),
                ("MLX_AUDIO_COMMAND", "/opt/bin/gen"),
            ]))
            .unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9001");
        assert_eq!(config.chat.model_id, "qwen");
        assert_eq!(config.chat.model_path, Some(PathBuf::from("/models/qwen")));
        assert_eq!(config.chat.gguf_file.as_deref(), Some("q4.gguf"));
        assert!(config.chat.echo_mode);
        assert_eq!(config.audio.backend, AudioBackend::Piper);
        assert_eq!(config.audio.ref_audio.as_deref(), Some("/refs/me.wav"));
        assert_eq!(config.audio.ref_text.as_deref(), Some("hello"));
        assert_eq!(config.audio.instruct_text, None);
        assert_eq!(config.audio.mlx_audio_command, "/opt/bin/gen");
    }

    #[test]
    fn legacy_chat_variables_are_honoured() {
        let mut config = GatewayConfig::default();
        config
            .apply_env_from(env(&[("MODEL_ID", "old"), ("MODEL_PATH", "/old")]))
            .unwrap();
        assert_eq!(config.chat.model_id, "old");
        assert_eq!(config.chat.model_path, Some(PathBuf::from("/old")));

        config
            .apply_env_from(env(&[("MODEL_ID", "old"), ("CHAT_MODEL_ID", "new")]))
            .unwrap();
        assert_eq!(config.chat.model_id, "new");
    }

    #[test]
    fn echo_mode_truthiness() {
        for (value, expected) in [("1", true), ("on", true), ("Y", true), ("0", false), ("nope", false)] {
            let mut config = GatewayConfig::default();
            config.apply_env_from(env(&[("ECHO_MODE", value)])).unwrap();
            assert_eq!(config.chat.echo_mode, expected, "ECHO_MODE={value}");
        }
    }

    #[test]
    fn audio_backend_parsing() {
        assert_eq!("cosyvoice".parse::<AudioBackend>().unwrap(), AudioBackend::MlxAudioPlus);
        assert_eq!(" MacOS-Say ".parse::<AudioBackend>().unwrap(), AudioBackend::MacosSay);
        assert!(matches!("espeak".parse::<AudioBackend>(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn invalid_port_is_config_error() {
        let mut config = GatewayConfig::default();
        let err = config.apply_env_from(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn toml_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openlocal.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8080\n\n[audio]\nbackend = \"cosyvoice\"\nmodel_path = \"/m\"\n",
        )
        .unwrap();
        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.backend, AudioBackend::MlxAudioPlus);
        assert_eq!(config.audio.model_path, Some(PathBuf::from("/m")));
        assert_eq!(config.chat, ChatConfig::default());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = GatewayConfig::default();
        config.audio.backend = AudioBackend::MacosSay;
        config.chat.model_path = Some(PathBuf::from("/models/chat.gguf"));
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<GatewayConfig>(&text).unwrap(), config);
    }

    #[test]
    fn config_path_from_flag_or_env() {
        let args = |v: &[&str]| v.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
        assert_eq!(
            config_path_from(args(&["bin", "--config", "/a.toml"]), env(&[])),
            Some(PathBuf::from("/a.toml"))
        );
        assert_eq!(
            config_path_from(args(&["bin", "--config=/b.toml"]), env(&[(CONFIG_ENV, "/c.toml")])),
            Some(PathBuf::from("/b.toml"))
        );
        assert_eq!(
            config_path_from(args(&["bin"]), env(&[(CONFIG_ENV, "/c.toml")])),
            Some(PathBuf::from("/c.toml"))
        );
        assert_eq!(config_path_from(args(&["bin"]), env(&[])), None);
    }
}

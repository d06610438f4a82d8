//! Startup: builds the engine registry from configuration.
//!
//! Chat engine failures are fatal. A speech engine that cannot be built is
//! logged and left out, so the gateway still serves chat.

use crate::artifact;
use crate::config::{AudioBackend, AudioConfig, ChatConfig, GatewayConfig};
use crate::error::{GatewayError, Result};
use crate::llm::mistral::MistralBackend;
use crate::llm::{ChatEngine, EchoEngine, NativeEngine};
use crate::registry::ModelRegistry;
use crate::tts::{CloningTts, MlxAudioCli, PiperTts, SayTts, TtsEngine};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Load every configured engine.
///
/// # Errors
///
/// Returns an error if the chat engine cannot be loaded or the audio backend
/// selection is invalid.
pub async fn build_registry(config: &GatewayConfig) -> Result<ModelRegistry> {
    let started = Instant::now();
    let backend = resolve_audio_backend(&config.audio)?;

    let chat = load_chat_engine(&config.chat).await?;
    let mut registry = ModelRegistry::new().with_chat(chat);

    match load_tts_engine(&config.audio, backend).await {
        Ok(tts) => {
            info!(backend = %backend, model = %config.audio.model_id, "speech engine ready");
            registry = registry.with_tts(tts);
        }
        Err(e) => warn!(backend = %backend, "speech engine unavailable, continuing without it: {e}"),
    }

    info!(
        "registry ready in {:.1}s: {:?}",
        started.elapsed().as_secs_f64(),
        registry
    );
    Ok(registry)
}

/// Concrete backend for `audio`, with `auto` resolved.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] when a backend that needs a model path has
/// none.
pub fn resolve_audio_backend(audio: &AudioConfig) -> Result<AudioBackend> {
    let has_path = audio.model_path.is_some();
    match audio.backend {
        AudioBackend::Auto if has_path => Ok(AudioBackend::Piper),
        AudioBackend::Auto => Ok(AudioBackend::MacosSay),
        backend @ (AudioBackend::Piper | AudioBackend::MlxAudioPlus) if !has_path => {
            Err(GatewayError::Config(format!(
                "AUDIO_MODEL_PATH is required for AUDIO_BACKEND={backend}"
            )))
        }
        backend => Ok(backend),
    }
}

async fn load_chat_engine(chat: &ChatConfig) -> Result<Arc<dyn ChatEngine>> {
    match &chat.model_path {
        Some(path) if !chat.echo_mode => {
            let backend = MistralBackend::load(path, chat.gguf_file.as_deref()).await?;
            info!(model = %chat.model_id, "native chat engine ready");
            Ok(Arc::new(NativeEngine::new(&chat.model_id, Arc::new(backend))))
        }
        _ => {
            info!(model = %chat.model_id, "echo chat engine ready");
            Ok(Arc::new(EchoEngine::new(&chat.model_id)))
        }
    }
}

async fn load_tts_engine(audio: &AudioConfig, backend: AudioBackend) -> Result<Arc<dyn TtsEngine>> {
    let model_id = audio.model_id.clone();
    match backend {
        AudioBackend::Auto | AudioBackend::MacosSay => Ok(Arc::new(SayTts::new(model_id)?)),
        AudioBackend::Piper => {
            let path = required_path(audio)?;
            let tts = tokio::task::spawn_blocking(move || PiperTts::load(model_id, &path))
                .await
                .map_err(|e| GatewayError::Config(format!("piper load task failed: {e}")))??;
            Ok(Arc::new(tts))
        }
        AudioBackend::MlxAudioPlus => {
            let path = required_path(audio)?;
            let cli = MlxAudioCli::new(&audio.mlx_audio_command)?;
            Ok(Arc::new(CloningTts::new(
                model_id,
                path.to_string_lossy(),
                Arc::new(cli),
            )))
        }
    }
}

fn required_path(audio: &AudioConfig) -> Result<std::path::PathBuf> {
    audio
        .model_path
        .as_deref()
        .map(artifact::expand_home)
        .ok_or_else(|| GatewayError::Config("AUDIO_MODEL_PATH is not set".to_owned()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::path::PathBuf;

    fn audio(backend: AudioBackend, path: Option<&str>) -> AudioConfig {
        AudioConfig {
            backend,
            model_path: path.map(PathBuf::from),
            ..AudioConfig::default()
        }
    }

    #[test]
    fn auto_prefers_piper_when_a_path_is_set() {
        assert_eq!(
            resolve_audio_backend(&audio(AudioBackend::Auto, Some("/v.onnx"))).unwrap(),
            AudioBackend::Piper
        );
        assert_eq!(
            resolve_audio_backend(&audio(AudioBackend::Auto, None)).unwrap(),
            AudioBackend::MacosSay
        );
        assert_eq!(
            resolve_audio_backend(&audio(AudioBackend::MacosSay, Some("/ignored"))).unwrap(),
            AudioBackend::MacosSay
        );
    }

    #[test]
    fn path_backends_require_a_path() {
        for backend in [AudioBackend::Piper, AudioBackend::MlxAudioPlus] {
            let err = resolve_audio_backend(&audio(backend, None)).unwrap_err();
            assert!(matches!(err, GatewayError::Config(_)));
            assert!(err.to_string().contains("AUDIO_MODEL_PATH"));
        }
    }

    #[tokio::test]
    async fn echo_engine_without_chat_path() {
        let mut config = GatewayConfig::default();
        config.audio = audio(AudioBackend::Piper, Some("/nonexistent/voice.onnx"));
        let registry = build_registry(&config).await.unwrap();
        let engine = registry.get_chat("local-chat").unwrap();
        let out = engine
            .generate("hi", &crate::llm::GenerationParams::default())
            .await
            .unwrap();
        assert!(out.starts_with("[echo]"));
        // The broken voice is skipped rather than failing startup.
        assert!(registry.get_tts("local-audio").is_err());
    }

    #[tokio::test]
    async fn echo_mode_wins_over_chat_path() {
        let mut config = GatewayConfig::default();
        config.chat.model_path = Some(PathBuf::from("/nonexistent/model.gguf"));
        config.chat.echo_mode = true;
        config.audio = audio(AudioBackend::MlxAudioPlus, Some("some/repo"));
        config.audio.mlx_audio_command = "definitely-not-installed-generator".to_owned();
        let registry = build_registry(&config).await.unwrap();
        assert_eq!(registry.list_model_ids(), vec!["local-chat"]);
    }

    #[tokio::test]
    async fn missing_chat_model_is_fatal() {
        let mut config = GatewayConfig::default();
        config.chat.model_path = Some(PathBuf::from("/nonexistent/model.gguf"));
        let err = build_registry(&config).await.unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[tokio::test]
    async fn invalid_backend_selection_is_fatal() {
        let mut config = GatewayConfig::default();
        config.audio = audio(AudioBackend::Piper, None);
        assert!(build_registry(&config).await.is_err());
    }
}

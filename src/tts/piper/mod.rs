//! Offline Piper voices.

pub mod phonemize;
pub mod voice;

pub use voice::{PiperVoice, VoiceChunk, VoiceConfig, VoiceSynthesizer};

use super::{ExtraParams, TtsEngine, TtsParams};
use crate::artifact;
use crate::audio::AudioBuffer;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Piper text-to-speech. Produces mono 16-bit WAV only.
pub struct PiperTts {
    model_id: String,
    voice: Arc<dyn VoiceSynthesizer>,
}

impl PiperTts {
    /// Load the voice at `model_path`: a `.onnx` file, or a directory that
    /// holds exactly one.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the model cannot be resolved or
    /// loaded.
    pub fn load(model_id: impl Into<String>, model_path: &Path) -> Result<Self> {
        let model_file = artifact::resolve_model_file(model_path, "onnx")?;
        let voice = PiperVoice::load(&model_file)?;
        Ok(Self::with_voice(model_id, Arc::new(voice)))
    }

    pub fn with_voice(model_id: impl Into<String>, voice: Arc<dyn VoiceSynthesizer>) -> Self {
        Self {
            model_id: model_id.into(),
            voice,
        }
    }
}

#[async_trait]
impl TtsEngine for PiperTts {
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
        if format != "wav" {
            return Err(GatewayError::InvalidRequest(
                "Piper currently supports only 'wav' output".to_owned(),
            ));
        }
        if !(params.speed.is_finite() && params.speed > 0.0) {
            return Err(GatewayError::InvalidRequest(format!(
                "speed must be positive, got {}",
                params.speed
            )));
        }

        let voice = Arc::clone(&self.voice);
        let text = text.to_owned();
        let (speed, speaker_id) = (params.speed, params.speaker_id);
        let chunks = tokio::task::spawn_blocking(move || voice.synthesize(&text, speed, speaker_id))
            .await
            .map_err(|e| GatewayError::backend("JoinError", e.to_string()))??;

        let Some(sample_rate) = chunks.last().map(|c| c.sample_rate) else {
            return Err(GatewayError::backend("RuntimeError", "Piper returned no audio"));
        };
        let samples: Vec<i16> = chunks.into_iter().flat_map(|c| c.samples).collect();
        debug!(samples = samples.len(), sample_rate, "Piper synthesis done");
        AudioBuffer::from_samples(sample_rate, &samples)?.to_wav()
    }
}

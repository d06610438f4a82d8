//! Piper ONNX voice: sidecar config, phoneme ids and inference.

use super::phonemize::{Phonemizer, split_sentences};
use crate::error::{GatewayError, Result};
use ort::session::Session;
use ort::value::Tensor;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const BOS: &str = "^";
const EOS: &str = "$";
const PAD: &str = "_";

/// One synthesized stretch of audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Offline voice backend: text in, PCM chunks out.
///
/// Synthesis is blocking; callers run it off the async runtime.
pub trait VoiceSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, speed: f32, speaker_id: Option<i64>) -> Result<Vec<VoiceChunk>>;
}

/// Contents of the `<model>.onnx.json` file shipped with every Piper voice.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub audio: AudioSection,
    #[serde(default)]
    pub espeak: EspeakSection,
    #[serde(default)]
    pub inference: InferenceSection,
    pub phoneme_id_map: HashMap<String, Vec<i64>>,
    #[serde(default = "default_num_speakers")]
    pub num_speakers: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSection {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EspeakSection {
    #[serde(default)]
    pub voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceSection {
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f32,
    #[serde(default = "default_length_scale")]
    pub length_scale: f32,
    #[serde(default = "default_noise_w")]
    pub noise_w: f32,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            noise_scale: default_noise_scale(),
            length_scale: default_length_scale(),
            noise_w: default_noise_w(),
        }
    }
}

fn default_num_speakers() -> u32 {
    1
}
fn default_noise_scale() -> f32 {
    0.667
}
fn default_length_scale() -> f32 {
    1.0
}
fn default_noise_w() -> f32 {
    0.8
}

impl VoiceConfig {
    /// Path of the config file next to a model.
    pub fn sidecar_path(model: &Path) -> PathBuf {
        let mut name = model.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("cannot read voice config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            GatewayError::Config(format!("invalid voice config {}: {e}", path.display()))
        })?;
        for symbol in [BOS, EOS, PAD] {
            if !config.phoneme_id_map.contains_key(symbol) {
                return Err(GatewayError::Config(format!(
                    "voice config {} has no id for '{symbol}'",
                    path.display()
                )));
            }
        }
        Ok(config)
    }

    pub fn is_british(&self) -> bool {
        self.espeak.voice.to_ascii_lowercase().starts_with("en-gb")
    }

    /// Map IPA phonemes to model input ids: `^ _ (p _)* $`.
    ///
    /// Phonemes with no id are skipped.
    pub fn phoneme_ids(&self, phonemes: &str) -> Vec<i64> {
        let mut ids = Vec::with_capacity(phonemes.len() * 2 + 3);
        ids.extend_from_slice(self.ids_of(BOS));
        ids.extend_from_slice(self.ids_of(PAD));
        let mut buf = [0u8; 4];
        for ch in phonemes.chars() {
            match self.phoneme_id_map.get(ch.encode_utf8(&mut buf) as &str) {
                Some(mapped) => {
                    ids.extend_from_slice(mapped);
                    ids.extend_from_slice(self.ids_of(PAD));
                }
                None => debug!("no phoneme id for {ch:?}, skipping"),
            }
        }
        ids.extend_from_slice(self.ids_of(EOS));
        ids
    }

    fn ids_of(&self, symbol: &str) -> &[i64] {
        self.phoneme_id_map.get(symbol).map(Vec::as_slice).unwrap_or_default()
    }

    /// Speaker index to feed the model, if it is multi-speaker.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] for an out-of-range id.
    pub fn speaker(&self, speaker_id: Option<i64>) -> Result<Option<i64>> {
        if self.num_speakers <= 1 {
            if speaker_id.is_some() {
                debug!("single-speaker voice, ignoring speaker_id");
            }
            return Ok(None);
        }
        let sid = speaker_id.unwrap_or(0);
        if sid < 0 || sid >= i64::from(self.num_speakers) {
            return Err(GatewayError::InvalidRequest(format!(
                "speaker_id {sid} out of range: voice has {} speakers",
                self.num_speakers
            )));
        }
        Ok(Some(sid))
    }

    /// `[noise_scale, length_scale / speed, noise_w]`.
    pub fn scales(&self, speed: f32) -> [f32; 3] {
        let inf = &self.inference;
        [inf.noise_scale, inf.length_scale / speed, inf.noise_w]
    }
}

/// A loaded Piper voice.
pub struct PiperVoice {
    session: Mutex<Session>,
    phonemizer: Mutex<Phonemizer>,
    config: VoiceConfig,
}

impl PiperVoice {
    /// Load a voice from its `.onnx` model and `.onnx.json` sidecar.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if either file cannot be loaded.
    pub fn load(model: &Path) -> Result<Self> {
        let config = VoiceConfig::load(&VoiceConfig::sidecar_path(model))?;

        info!("loading Piper voice: {}", model.display());
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(4))
            .and_then(|b| b.commit_from_file(model))
            .map_err(|e| GatewayError::Config(format!("failed to load Piper ONNX model: {e}")))?;

        let british = config.is_british();
        info!(
            "Piper voice ready (sample_rate={}, speakers={}, british={british})",
            config.audio.sample_rate, config.num_speakers
        );
        Ok(Self {
            session: Mutex::new(session),
            phonemizer: Mutex::new(Phonemizer::new(british)),
            config,
        })
    }

    fn phonemize(&self, sentence: &str) -> Result<String> {
        let phonemizer = self
            .phonemizer
            .lock()
            .map_err(|_| GatewayError::backend("RuntimeError", "phonemizer lock poisoned"))?;
        phonemizer.phonemize(sentence)
    }

    fn infer(&self, ids: &[i64], scales: [f32; 3], sid: Option<i64>) -> Result<Vec<f32>> {
        use ort::session::{SessionInputValue, SessionInputs};

        let tensor_err = |e: ort::Error| GatewayError::backend("OrtError", format!("failed to build input tensor: {e}"));
        let input = Tensor::from_array(([1_usize, ids.len()], ids.to_vec())).map_err(tensor_err)?;
        let lengths = Tensor::from_array(([1_usize], vec![ids.len() as i64])).map_err(tensor_err)?;
        let scales = Tensor::from_array(([3_usize], scales.to_vec())).map_err(tensor_err)?;

        let mut feed: HashMap<String, SessionInputValue> = HashMap::new();
        feed.insert("input".to_owned(), input.into());
        feed.insert("input_lengths".to_owned(), lengths.into());
        feed.insert("scales".to_owned(), scales.into());
        if let Some(sid) = sid {
            let sid = Tensor::from_array(([1_usize], vec![sid])).map_err(tensor_err)?;
            feed.insert("sid".to_owned(), sid.into());
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| GatewayError::backend("RuntimeError", "ONNX session lock poisoned"))?;
        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(|e| GatewayError::backend("OrtError", format!("ONNX inference failed: {e}")))?;
        let (_shape, data) = outputs[0_usize]
            .try_extract_tensor::<f32>()
            .map_err(|e| GatewayError::backend("OrtError", format!("failed to extract audio: {e}")))?;
        Ok(data.to_vec())
    }
}

impl VoiceSynthesizer for PiperVoice {
    fn synthesize(&self, text: &str, speed: f32, speaker_id: Option<i64>) -> Result<Vec<VoiceChunk>> {
        let sid = self.config.speaker(speaker_id)?;
        let scales = self.config.scales(speed);
        let mut chunks = Vec::new();
        for sentence in split_sentences(text) {
            let phonemes = self.phonemize(&sentence)?;
            let ids = self.config.phoneme_ids(&phonemes);
            // BOS, pad and EOS only: nothing to say.
            if ids.len() <= 3 {
                continue;
            }
            let audio = self.infer(&ids, scales, sid)?;
            chunks.push(VoiceChunk {
                samples: crate::audio::wav::f32_to_i16(&audio),
                sample_rate: self.config.audio.sample_rate,
            });
        }
        Ok(chunks)
    }
}

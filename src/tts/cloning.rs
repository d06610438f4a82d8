//! Conditional neural TTS with reference audio (voice cloning / conversion).
//!
//! The backend writes its output to files under a per-call working
//! directory; [`pick_output_file`] finds the right one afterwards.

use super::{ExtraParams, TtsEngine, TtsParams};
use crate::audio::dedup_wav;
use crate::error::{GatewayError, Result};
use crate::materialize::ScratchFiles;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Output formats the backend can write directly.
const BACKEND_FORMATS: [&str; 5] = ["wav", "mp3", "flac", "aac", "opus"];

/// File name prefix the backend writes under.
const OUTPUT_PREFIX: &str = "speech";

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct CloningRequest {
    pub model: String,
    /// Absent in voice-conversion mode.
    pub text: Option<String>,
    pub ref_audio: Option<String>,
    pub source_audio: Option<String>,
    pub ref_text: Option<String>,
    pub instruct_text: Option<String>,
    /// Output path without extension.
    pub file_prefix: PathBuf,
    pub audio_format: String,
    /// Ask the backend to join multi-segment output into one file.
    pub join_audio: bool,
}

/// A backend that renders a [`CloningRequest`] to audio files.
#[async_trait]
pub trait CloningBackend: Send + Sync {
    async fn generate(&self, request: &CloningRequest) -> Result<()>;
}

/// [`TtsEngine`] over a [`CloningBackend`].
///
/// Recognised extras: `ref_audio`, `source_audio` (paths, or byte arrays that
/// are written to scratch files), `ref_text` and `instruct_text`.
pub struct CloningTts {
    model_id: String,
    model_path: String,
    backend: Arc<dyn CloningBackend>,
}

impl CloningTts {
    pub fn new(
        model_id: impl Into<String>,
        model_path: impl Into<String>,
        backend: Arc<dyn CloningBackend>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            model_path: model_path.into(),
            backend,
        }
    }
}

/// Requested format if the backend can write it, else `wav`.
pub fn output_format(format: &str) -> &str {
    let format = format.trim();
    BACKEND_FORMATS
        .iter()
        .copied()
        .find(|f| f.eq_ignore_ascii_case(format))
        .unwrap_or("wav")
}

fn extra_text(extra: &ExtraParams, key: &str) -> Option<String> {
    match extra.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn extra_path(extra: &ExtraParams, key: &str, scratch: &mut ScratchFiles) -> Result<Option<String>> {
    match extra.get(key) {
        Some(Value::Array(items)) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect();
            let Some(bytes) = bytes else {
                return Err(GatewayError::InvalidRequest(format!(
                    "{key} must be a path or a byte array"
                )));
            };
            let path = scratch.write(&bytes, ".wav")?;
            Ok(Some(path.to_string_lossy().into_owned()))
        }
        _ => Ok(extra_text(extra, key)),
    }
}

fn sorted_matches(dir: &Path, matches: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.') && matches(n))
        })
        .collect();
    found.sort();
    found
}

/// Locate the file a backend produced.
///
/// Search order:
/// 1. `{prefix}.{format}`
/// 2. `{prefix}.wav`
/// 3. the lexicographically first `speech_*.{format}` (or `speech_*.wav`)
/// 4. the lexicographically last `*.{format}` (or `*.wav`) in `dir`
///
/// # Errors
///
/// Returns [`GatewayError::Backend`] when nothing matches.
pub fn pick_output_file(dir: &Path, prefix: &Path, format: &str) -> Result<PathBuf> {
    let with_ext = |ext: &str| {
        let mut name = prefix.as_os_str().to_os_string();
        name.push(format!(".{ext}"));
        PathBuf::from(name)
    };
    for candidate in [with_ext(format), with_ext("wav")] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let mut extensions = vec![format];
    if format != "wav" {
        extensions.push("wav");
    }

    let numbered = extensions.iter().map(|ext| {
        let suffix = format!(".{ext}");
        sorted_matches(dir, |n| n.starts_with("speech_") && n.ends_with(&suffix))
    });
    if let Some(first) = numbered.filter_map(|found| found.into_iter().next()).next() {
        return Ok(first);
    }

    let any = extensions.iter().map(|ext| {
        let suffix = format!(".{ext}");
        sorted_matches(dir, |n| n.ends_with(&suffix))
    });
    if let Some(last) = any.filter_map(|found| found.into_iter().last()).next() {
        return Ok(last);
    }

    Err(GatewayError::backend(
        "RuntimeError",
        "backend did not produce an output audio file",
    ))
}

/// Best-effort removal of a duplicated leading segment. Any failure leaves
/// the audio untouched.
fn dedup_best_effort(audio: Vec<u8>) -> Vec<u8> {
    match dedup_wav(&audio) {
        Ok(Some(trimmed)) => {
            debug!(before = audio.len(), after = trimmed.len(), "trimmed repeated prefix");
            trimmed
        }
        Ok(None) => audio,
        Err(e) => {
            warn!("skipping repeated-prefix check: {e}");
            audio
        }
    }
}

#[async_trait]
impl TtsEngine for CloningTts {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn synthesize(
        &self,
        text: &str,
        _params: &TtsParams,
        format: &str,
        extra: &ExtraParams,
    ) -> Result<Vec<u8>> {
        let audio_format = output_format(format).to_owned();

        let mut scratch = ScratchFiles::new();
        let ref_audio = extra_path(extra, "ref_audio", &mut scratch)?;
        let source_audio = extra_path(extra, "source_audio", &mut scratch)?;

        let work = tempfile::tempdir()?;
        let file_prefix = work.path().join(OUTPUT_PREFIX);
        let request = CloningRequest {
            model: self.model_path.clone(),
            text: (!text.is_empty()).then(|| text.to_owned()),
            ref_audio,
            source_audio,
            ref_text: extra_text(extra, "ref_text"),
            instruct_text: extra_text(extra, "instruct_text"),
            file_prefix: file_prefix.clone(),
            audio_format: audio_format.clone(),
            join_audio: true,
        };
        self.backend.generate(&request).await?;

        let output = pick_output_file(work.path(), &file_prefix, &audio_format)?;
        let audio = tokio::fs::read(&output).await?;
        if audio_format == "wav" {
            return Ok(dedup_best_effort(audio));
        }
        Ok(audio)
    }
}

//! `POST /v1/audio/speech`.

use super::types::SpeechRequest;
use super::{ApiError, AppState};
use crate::config::AudioConfig;
use crate::error::{GatewayError, REF_AUDIO_HINT, Result, mentions_ref_audio_required};
use crate::materialize::{ScratchFiles, materialize};
use crate::tts::{DEFAULT_VOICE, ExtraParams, TtsParams, media_type, normalize_format};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use tracing::{debug, warn};

/// Extras that may carry reference audio as a path or an encoded payload.
const AUDIO_EXTRAS: [&str; 2] = ["ref_audio", "source_audio"];

pub(super) async fn handle_speech(
    State(state): State<AppState>,
    Json(request): Json<SpeechRequest>,
) -> Response {
    match synthesize(&state, request).await {
        Ok(response) => response,
        Err(e) => speech_error(e).into_response(),
    }
}

async fn synthesize(state: &AppState, request: SpeechRequest) -> Result<Response> {
    let engine = state.registry.get_tts(&request.model)?;
    let format = normalize_format(request.format.as_deref());
    debug!(model = %request.model, format = %format, "speech request");

    let mut extra = request.extra;
    fill_defaults(&mut extra, &state.config.audio);
    let params = TtsParams {
        voice: request.voice.unwrap_or_else(|| DEFAULT_VOICE.to_owned()),
        speed: request.speed.unwrap_or(1.0),
        speaker_id: extra.remove("speaker_id").as_ref().and_then(parse_speaker_id),
    };

    // Scratch files live until the end of this function.
    let mut scratch = ScratchFiles::new();
    materialize_extras(&mut extra, &mut scratch)?;

    let audio = engine
        .synthesize(&request.input, &params, &format, &extra)
        .await
        .map_err(GatewayError::classify)?;
    drop(scratch);

    Ok(([(header::CONTENT_TYPE, media_type(&format))], audio).into_response())
}

/// Configured conditioning inputs for fields the request left out.
fn fill_defaults(extra: &mut ExtraParams, audio: &AudioConfig) {
    let defaults = [
        ("ref_audio", &audio.ref_audio),
        ("ref_text", &audio.ref_text),
        ("instruct_text", &audio.instruct_text),
        ("source_audio", &audio.source_audio),
    ];
    for (key, value) in defaults {
        let absent = extra.get(key).is_none_or(Value::is_null);
        if absent && let Some(value) = value {
            extra.insert(key.to_owned(), Value::String(value.clone()));
        }
    }
}

fn parse_speaker_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Replace string reference payloads with paths the backend can open.
fn materialize_extras(extra: &mut ExtraParams, scratch: &mut ScratchFiles) -> Result<()> {
    for key in AUDIO_EXTRAS {
        if let Some(Value::String(raw)) = extra.get(key).cloned() {
            let resolved = materialize(&raw, scratch)?;
            extra.insert(key.to_owned(), Value::String(resolved));
        }
    }
    Ok(())
}

fn speech_error(err: GatewayError) -> ApiError {
    if matches!(err, GatewayError::ModelNotFound { .. }) {
        return ApiError::from(err);
    }
    if err.is_client_error() {
        let mut message = err.to_string();
        if mentions_ref_audio_required(&message) {
            message.push_str(REF_AUDIO_HINT);
        }
        return ApiError::bad_request(message);
    }
    warn!("speech synthesis failed: {err}");
    match err {
        GatewayError::Backend { origin, message } => {
            ApiError::server(format!("TTS failed: {origin}: {message}"))
        }
        other => ApiError::server(format!("TTS failed: {}: {other}", other.origin())),
    }
}

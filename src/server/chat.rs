//! `POST /v1/chat/completions`.

use super::types::{
    AssistantMessage, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice,
    ChunkChoice, Delta, ErrorBody, ErrorResponse, Usage,
};
use super::{ApiError, AppState, unix_timestamp};
use crate::llm::GenerationParams;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use tracing::{debug, warn};
use uuid::Uuid;

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

fn data_event<T: Serialize>(value: &T) -> Option<Event> {
    serde_json::to_string(value)
        .ok()
        .map(|json| Event::default().data(json))
}

/// Streaming-chunk builder sharing one id, timestamp and model.
struct ChunkFactory {
    id: String,
    created: u64,
    model: String,
}

impl ChunkFactory {
    fn chunk(&self, delta: Delta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_owned),
            }],
        }
    }
}

fn params_from(request: &ChatCompletionRequest) -> Result<GenerationParams, ApiError> {
    let defaults = GenerationParams::default();
    GenerationParams::new(
        request.max_tokens.unwrap_or(defaults.max_tokens),
        request.temperature.unwrap_or(defaults.temperature),
        request.top_p.unwrap_or(defaults.top_p),
    )
    .map_err(ApiError::from)
}

pub(super) async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.chat.model_id.clone());
    let engine = match state.registry.get_chat(&model) {
        Ok(engine) => engine,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let params = match params_from(&request) {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };
    debug!(model = %model, stream = request.stream.unwrap_or(false), "chat completion");

    if request.stream == Some(true) {
        let fragments = engine.stream_generate_chat(&request.messages, &params);
        return stream_response(model, fragments).into_response();
    }

    match engine.generate_chat(&request.messages, &params).await {
        Ok(content) => Json(ChatCompletionResponse {
            id: completion_id(),
            object: "chat.completion".to_owned(),
            created: unix_timestamp(),
            model,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_owned(),
                    content,
                },
                finish_reason: Some("stop".to_owned()),
            }],
            usage: Usage::default(),
        })
        .into_response(),
        Err(e) => {
            warn!(model = %model, "chat generation failed: {e}");
            ApiError::server(e.to_string()).into_response()
        }
    }
}

/// SSE body: role chunk, content chunks, stop chunk, then `[DONE]` once.
///
/// A failure replaces the stop chunk with an error event. Dropping the body
/// drops `fragments`, which stops generation.
fn stream_response(
    model: String,
    mut fragments: crate::llm::TextStream,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let factory = ChunkFactory {
        id: completion_id(),
        created: unix_timestamp(),
        model,
    };

    let events = async_stream::stream! {
        let role = Delta {
            role: Some("assistant".to_owned()),
            content: None,
        };
        if let Some(event) = data_event(&factory.chunk(role, None)) {
            yield Ok(event);
        }

        let mut failed = false;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    let delta = Delta {
                        role: None,
                        content: Some(text),
                    };
                    if let Some(event) = data_event(&factory.chunk(delta, None)) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    warn!(model = %factory.model, "chat stream failed: {e}");
                    let body = ErrorResponse {
                        error: ErrorBody {
                            message: e.to_string(),
                            error_type: "server_error".to_owned(),
                        },
                    };
                    if let Some(event) = data_event(&body) {
                        yield Ok(event);
                    }
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            if let Some(event) = data_event(&factory.chunk(Delta::default(), Some("stop"))) {
                yield Ok(event);
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

//! Chat generation engines.
//!
//! Two engines are provided:
//! - **Echo**: a plumbing check that repeats its input without a model.
//! - **Native**: a local model behind a [`TextBackend`], with a one-time
//!   capability probe and streaming reconciliation of raw backend output.

pub mod echo;
pub mod mistral;
pub mod native;
pub mod postprocess;
pub mod probe;
pub mod render;

pub use echo::EchoEngine;
pub use native::{NativeEngine, TextBackend};

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lazy, finite, non-restartable sequence of text fragments.
///
/// Dropping the stream stops generation.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Generation-time keyword arguments handed to a [`TextBackend`].
pub type SamplingKwargs = BTreeMap<&'static str, f64>;

/// Per-request sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate (at least 1).
    pub max_tokens: usize,
    /// Sampling temperature (non-negative).
    pub temperature: f64,
    /// Nucleus sampling threshold in `(0, 1]`.
    pub top_p: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.95,
        }
    }
}

impl GenerationParams {
    /// Build validated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when a value is out of range.
    pub fn new(max_tokens: usize, temperature: f64, top_p: f64) -> Result<Self> {
        if max_tokens == 0 {
            return Err(GatewayError::InvalidRequest(
                "max_tokens must be at least 1".to_owned(),
            ));
        }
        if !temperature.is_finite() || temperature < 0.0 {
            return Err(GatewayError::InvalidRequest(format!(
                "temperature must be >= 0, got {temperature}"
            )));
        }
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(GatewayError::InvalidRequest(format!(
                "top_p must be in (0, 1], got {top_p}"
            )));
        }
        Ok(Self {
            max_tokens,
            temperature,
            top_p,
        })
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a conversation. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A chat-completion engine.
///
/// Implementations must keep the streaming and non-streaming paths
/// consistent: concatenating every fragment of [`stream_generate`] equals
/// [`generate`] for the same inputs, and likewise for the chat variants.
///
/// [`stream_generate`]: ChatEngine::stream_generate
/// [`generate`]: ChatEngine::generate
#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Stable id this engine is registered under.
    fn model_id(&self) -> &str;

    /// Generate the complete completion for a prompt.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Stream the completion for a prompt as raw fragments.
    fn stream_generate(&self, prompt: &str, params: &GenerationParams) -> TextStream;

    /// Render a conversation into a single prompt.
    fn render_chat(&self, messages: &[ChatMessage]) -> String {
        render::render_fallback(messages)
    }

    /// Render, generate and post-process a chat completion.
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let prompt = self.render_chat(messages);
        let raw = self.generate(&prompt, params).await?;
        Ok(postprocess::post_process(&prompt, &raw))
    }

    /// Render and stream a chat completion as post-processed increments.
    fn stream_generate_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> TextStream {
        let prompt = self.render_chat(messages);
        let raw = self.stream_generate(&prompt, params);
        postprocess::reconcile(prompt, raw)
    }
}

/// Drain a fragment stream into one string, stopping at the first failure.
pub async fn collect_stream(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn generation_params_defaults() {
        let params = GenerationParams::default();
        assert_eq!(params.max_tokens, 256);
        assert!((params.temperature - 0.7).abs() < f64::EPSILON);
        assert!((params.top_p - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn generation_params_rejects_out_of_range() {
        assert!(GenerationParams::new(0, 0.7, 0.9).is_err());
        assert!(GenerationParams::new(16, -0.1, 0.9).is_err());
        assert!(GenerationParams::new(16, 0.7, 0.0).is_err());
        assert!(GenerationParams::new(16, 0.7, 1.5).is_err());
        assert!(GenerationParams::new(16, 0.0, 1.0).is_ok());
    }

    #[test]
    fn chat_message_deserializes_missing_content() {
        let msg: ChatMessage = serde_json::from_str(r#"{"role":"tool"}"#).unwrap();
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.content.is_none());
    }

    #[test]
    fn chat_message_ignores_unknown_fields() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi","name":"bob"}"#).unwrap();
        assert_eq!(msg, ChatMessage::user("hi"));
    }

    #[test]
    fn role_rejects_unknown_names() {
        assert!(serde_json::from_str::<Role>(r#""robot""#).is_err());
    }

    #[tokio::test]
    async fn collect_stream_stops_at_first_error() {
        let stream: TextStream = Box::pin(futures_util::stream::iter(vec![
            Ok("a".to_owned()),
            Err(GatewayError::backend("RuntimeError", "boom")),
            Ok("b".to_owned()),
        ]));
        let err = collect_stream(stream).await.unwrap_err();
        assert_eq!(err.origin(), "RuntimeError");
    }
}

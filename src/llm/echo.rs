//! Model-free engine used to verify plumbing.

use super::{ChatEngine, ChatMessage, GenerationParams, Role, TextStream};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;

/// Fragment size used when streaming, in characters.
const CHUNK_CHARS: usize = 32;

/// Returns its input instead of running a model.
///
/// Raw generation echoes the whole prompt; chat generation echoes only the
/// most recent user message.
#[derive(Debug, Clone)]
pub struct EchoEngine {
    model_id: String,
}

impl EchoEngine {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

fn echo_prompt(prompt: &str) -> String {
    format!("[echo]\n{prompt}")
}

fn echo_chat(messages: &[ChatMessage]) -> String {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .and_then(|m| m.content.as_deref())
        .unwrap_or("");
    format!("[echo-chat] {last_user}")
}

fn chunked(text: &str) -> TextStream {
    let chars: Vec<char> = text.chars().collect();
    let pieces: Vec<Result<String>> = chars
        .chunks(CHUNK_CHARS)
        .map(|chunk| Ok::<_, GatewayError>(chunk.iter().collect()))
        .collect();
    Box::pin(futures_util::stream::iter(pieces))
}

#[async_trait]
impl ChatEngine for EchoEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        Ok(echo_prompt(prompt))
    }

    fn stream_generate(&self, prompt: &str, _params: &GenerationParams) -> TextStream {
        chunked(&echo_prompt(prompt))
    }

    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<String> {
        Ok(echo_chat(messages))
    }

    fn stream_generate_chat(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> TextStream {
        chunked(&echo_chat(messages))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::llm::collect_stream;

    #[tokio::test]
    async fn generate_prefixes_the_prompt() {
        let engine = EchoEngine::new("local-echo");
        let out = engine
            .generate("hello", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(out, "[echo]\nhello");
    }

    #[tokio::test]
    async fn chat_echoes_last_user_message_only() {
        let engine = EchoEngine::new("local-echo");
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ];
        let out = engine
            .generate_chat(&messages, &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(out, "[echo-chat] second");
    }

    #[tokio::test]
    async fn chat_without_user_message_echoes_empty() {
        let engine = EchoEngine::new("local-echo");
        let out = engine
            .generate_chat(&[ChatMessage::system("sys")], &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(out, "[echo-chat] ");
    }

    #[tokio::test]
    async fn streams_in_32_char_pieces_matching_generate() {
        let engine = EchoEngine::new("local-echo");
        let params = GenerationParams::default();
        let prompt = "ü".repeat(70);
        let mut stream = engine.stream_generate(&prompt, &params);
        let mut pieces = Vec::new();
        while let Some(piece) = futures_util::StreamExt::next(&mut stream).await {
            pieces.push(piece.unwrap());
        }
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].chars().count(), 32);
        assert_eq!(pieces.concat(), engine.generate(&prompt, &params).await.unwrap());
    }

    #[tokio::test]
    async fn streamed_chat_matches_non_streamed_chat() {
        let engine = EchoEngine::new("local-echo");
        let params = GenerationParams::default();
        let messages = vec![ChatMessage::user(
            "a message long enough to need more than one streamed fragment",
        )];
        let streamed = collect_stream(engine.stream_generate_chat(&messages, &params))
            .await
            .unwrap();
        let whole = engine.generate_chat(&messages, &params).await.unwrap();
        assert_eq!(streamed, whole);
    }
}

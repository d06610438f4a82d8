//! Conversation → prompt rendering.

use super::{ChatMessage, TextBackend};
use tracing::debug;

/// Trailing cue asking the model to produce the next assistant turn.
pub const GENERATION_CUE: &str = "assistant:";

/// Deterministic renderer: one `"{role}: {content}\n"` line per message that
/// has content, then [`GENERATION_CUE`].
pub fn render_fallback(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let Some(content) = message.content.as_deref() else {
            continue;
        };
        prompt.push_str(message.role.as_str());
        prompt.push_str(": ");
        prompt.push_str(content);
        prompt.push('\n');
    }
    prompt.push_str(GENERATION_CUE);
    prompt
}

/// Render with the backend's native chat template, falling back silently to
/// [`render_fallback`] when the backend has none or the template fails.
pub fn render_chat(backend: &dyn TextBackend, messages: &[ChatMessage]) -> String {
    match backend.apply_chat_template(messages, true) {
        Some(Ok(prompt)) => prompt,
        Some(Err(e)) => {
            debug!("chat template failed, using plain rendering: {e}");
            render_fallback(messages)
        }
        None => render_fallback(messages),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::{GatewayError, Result};
    use crate::llm::{Role, SamplingKwargs, TextStream};

    struct TemplateBackend(Option<Result<String>>);

    impl TextBackend for TemplateBackend {
        fn stream(&self, _: &str, _: usize, _: &SamplingKwargs) -> Result<TextStream> {
            Err(GatewayError::backend("Unused", "not called"))
        }

        fn apply_chat_template(
            &self,
            _messages: &[ChatMessage],
            add_generation_prompt: bool,
        ) -> Option<Result<String>> {
            assert!(add_generation_prompt);
            match &self.0 {
                Some(Ok(p)) => Some(Ok(p.clone())),
                Some(Err(_)) => Some(Err(GatewayError::backend("TemplateError", "bad jinja"))),
                None => None,
            }
        }
    }

    #[test]
    fn fallback_renders_in_order_with_cue() {
        let messages = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("how are you?"),
        ];
        assert_eq!(
            render_fallback(&messages),
            "system: Be brief.\nuser: hi\nassistant: hello\nuser: how are you?\nassistant:"
        );
    }

    #[test]
    fn fallback_skips_messages_without_content() {
        let messages = vec![
            ChatMessage {
                role: Role::Tool,
                content: None,
            },
            ChatMessage::user("hi"),
        ];
        assert_eq!(render_fallback(&messages), "user: hi\nassistant:");
    }

    #[test]
    fn fallback_of_empty_conversation_is_just_the_cue() {
        assert_eq!(render_fallback(&[]), "assistant:");
    }

    #[test]
    fn template_is_preferred_when_available() {
        let backend = TemplateBackend(Some(Ok("<|user|>hi<|assistant|>".to_owned())));
        assert_eq!(
            render_chat(&backend, &[ChatMessage::user("hi")]),
            "<|user|>hi<|assistant|>"
        );
    }

    #[test]
    fn template_failure_falls_back_silently() {
        let backend = TemplateBackend(Some(Err(GatewayError::backend("x", "y"))));
        assert_eq!(
            render_chat(&backend, &[ChatMessage::user("hi")]),
            "user: hi\nassistant:"
        );
    }

    #[test]
    fn missing_template_uses_fallback() {
        let backend = TemplateBackend(None);
        assert_eq!(
            render_chat(&backend, &[ChatMessage::user("hi")]),
            "user: hi\nassistant:"
        );
    }
}

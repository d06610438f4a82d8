//! [`TextBackend`] over a local GGUF model loaded with `mistralrs`.

use super::{ChatMessage, Role, SamplingKwargs, TextBackend, TextStream};
use crate::artifact;
use crate::error::{GatewayError, Result};
use futures_util::StreamExt;
use mistralrs::{GgufModelBuilder, Model, RequestBuilder, Response, TextMessageRole, TextMessages};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum time to wait for the first fragment. Warm-up on CPU can be slow.
const FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(120);

/// Streams completions from a GGUF model.
///
/// Conversations go to `mistralrs` as role-tagged messages and are templated
/// there exactly once. A bare prompt (capability checks, plain completions)
/// is sent as a single user turn.
pub struct MistralBackend {
    model: Arc<Model>,
}

impl MistralBackend {
    /// Load a GGUF model from a file, or from a directory holding exactly one
    /// `.gguf` file unless `gguf_file` names one.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the artifact cannot be located or
    /// the model fails to load.
    pub async fn load(model_path: &Path, gguf_file: Option<&str>) -> Result<Self> {
        let file = match gguf_file {
            Some(name) => artifact::expand_home(model_path).join(name),
            None => artifact::resolve_model_file(model_path, "gguf")?,
        };
        if !file.is_file() {
            return Err(GatewayError::Config(format!(
                "chat model file not found: {}",
                file.display()
            )));
        }
        let dir = file.parent().unwrap_or_else(|| Path::new("."));
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!("loading local chat model: {} / {name}", dir.display());
        let model = GgufModelBuilder::new(dir.to_string_lossy(), vec![name])
            .with_logging()
            .build()
            .await
            .map_err(|e| GatewayError::Config(format!("model build failed: {e}")))?;
        info!("local chat model loaded");

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

/// Role-tagged turns for `mistralrs`. Messages without content are skipped;
/// tool results are passed on as user turns.
fn conversation_turns(messages: &[ChatMessage]) -> Vec<(TextMessageRole, &str)> {
    messages
        .iter()
        .filter_map(|msg| {
            let content = msg.content.as_deref()?;
            let role = match msg.role {
                Role::System => TextMessageRole::System,
                Role::Assistant => TextMessageRole::Assistant,
                Role::User | Role::Tool => TextMessageRole::User,
            };
            Some((role, content))
        })
        .collect()
}

fn build_request(
    turns: Vec<(TextMessageRole, &str)>,
    max_tokens: usize,
    kwargs: &SamplingKwargs,
) -> Result<RequestBuilder> {
    let mut messages = TextMessages::new().enable_thinking(false);
    for (role, content) in turns {
        messages = messages.add_message(role, content);
    }
    let mut request = RequestBuilder::from(messages).set_sampler_max_len(max_tokens);
    for (&key, &value) in kwargs {
        request = match key {
            "temperature" | "temp" => request.set_sampler_temperature(value),
            "top_p" => request.set_sampler_topp(value),
            other => return Err(GatewayError::UnexpectedArgument(other.to_owned())),
        };
    }
    Ok(request)
}

impl MistralBackend {
    fn spawn_stream(&self, request: RequestBuilder) -> TextStream {
        let model = Arc::clone(&self.model);
        let (tx, mut rx) = mpsc::channel::<Result<String>>(64);

        // The model and the stream it borrows live inside the task.
        tokio::spawn(async move {
            let mut stream = match model.stream_chat_request(request).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx
                        .send(Err(GatewayError::backend("MistralError", e.to_string())))
                        .await;
                    return;
                }
            };

            let mut first = true;
            loop {
                let next = if first {
                    match tokio::time::timeout(FIRST_TOKEN_TIMEOUT, stream.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            warn!(
                                "no output after {}s, giving up",
                                FIRST_TOKEN_TIMEOUT.as_secs()
                            );
                            let _ = tx
                                .send(Err(GatewayError::backend(
                                    "TimeoutError",
                                    "model did not produce output in time",
                                )))
                                .await;
                            return;
                        }
                    }
                } else {
                    stream.next().await
                };
                let Some(response) = next else { break };

                let failure = match response {
                    Response::Chunk(chunk) => {
                        if let Some(content) = chunk
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.clone())
                            .filter(|c| !c.is_empty())
                        {
                            first = false;
                            if tx.send(Ok(content)).await.is_err() {
                                debug!("stream consumer dropped, stopping generation");
                                return;
                            }
                        }
                        continue;
                    }
                    // Only a non-streamed completion carries its text here.
                    Response::Done(completion) => {
                        if first
                            && let Some(content) = completion
                            .choices
                            .first()
                            .and_then(|c| c.message.content.clone())
                            .filter(|c| !c.is_empty())
                        {
                            let _ = tx.send(Ok(content)).await;
                        }
                        break;
                    }
                    Response::ModelError(msg, _) => GatewayError::backend("ModelError", msg),
                    Response::InternalError(e) => GatewayError::backend("InternalError", e.to_string()),
                    Response::ValidationError(e) => {
                        GatewayError::backend("ValidationError", e.to_string())
                    }
                    _ => continue,
                };
                let _ = tx.send(Err(failure)).await;
                break;
            }
        });

        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        stream.boxed()
    }
}

impl TextBackend for MistralBackend {
    fn stream(&self, prompt: &str, max_tokens: usize, kwargs: &SamplingKwargs) -> Result<TextStream> {
        let request = build_request(vec![(TextMessageRole::User, prompt)], max_tokens, kwargs)?;
        Ok(self.spawn_stream(request))
    }

    fn stream_chat(
        &self,
        messages: &[ChatMessage],
        max_tokens: usize,
        kwargs: &SamplingKwargs,
    ) -> Option<Result<TextStream>> {
        let request = build_request(conversation_turns(messages), max_tokens, kwargs);
        Some(request.map(|request| self.spawn_stream(request)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn build_request_accepts_known_sampling_keys() {
        let kwargs: SamplingKwargs = [("temperature", 0.2), ("temp", 0.2), ("top_p", 0.9)]
            .into_iter()
            .collect();
        assert!(build_request(vec![(TextMessageRole::User, "hi")], 8, &kwargs).is_ok());
    }

    #[test]
    fn conversation_keeps_each_role() {
        let messages = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hi"),
            ChatMessage::assistant("Hello."),
            ChatMessage {
                role: Role::Tool,
                content: None,
            },
            ChatMessage::new(Role::Tool, "42"),
            ChatMessage::user("thanks"),
        ];
        let turns = conversation_turns(&messages);
        assert_eq!(turns.len(), 5);
        assert!(matches!(turns[0], (TextMessageRole::System, "Be brief.")));
        assert!(matches!(turns[1], (TextMessageRole::User, "hi")));
        assert!(matches!(turns[2], (TextMessageRole::Assistant, "Hello.")));
        assert!(matches!(turns[3], (TextMessageRole::User, "42")));
        assert!(matches!(turns[4], (TextMessageRole::User, "thanks")));
        // Plain role names, not a pre-rendered transcript.
        assert!(turns.iter().all(|(_, content)| !content.contains("assistant:")));
    }

    #[test]
    fn build_request_rejects_unknown_key_by_name() {
        let kwargs: SamplingKwargs = [("seed", 1.0)].into_iter().collect();
        match build_request(vec![(TextMessageRole::User, "hi")], 8, &kwargs) {
            Err(GatewayError::UnexpectedArgument(key)) => assert_eq!(key, "seed"),
            other => panic!("expected UnexpectedArgument, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn load_reports_missing_artifact_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = match MistralBackend::load(dir.path(), None).await {
            Err(e) => e,
            Ok(_) => panic!("empty directory must not load"),
        };
        assert!(matches!(err, GatewayError::Config(_)));
    }
}

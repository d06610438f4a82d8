//! Engine backed by a local text-generation model.

use super::probe::{Capabilities, CapabilityCache};
use super::{
    ChatEngine, ChatMessage, GenerationParams, SamplingKwargs, TextStream, postprocess, render,
};
use crate::error::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;

/// A loaded text-generation model.
///
/// Backends may reject sampling keys they do not understand. They should do
/// so with [`GatewayError::UnexpectedArgument`](crate::error::GatewayError)
/// naming the key, either from [`stream`](TextBackend::stream) directly or as
/// the first item of the returned stream.
pub trait TextBackend: Send + Sync {
    /// Start generating from `prompt`. Fragments may be deltas or cumulative
    /// text; dropping the stream must stop generation.
    fn stream(&self, prompt: &str, max_tokens: usize, kwargs: &SamplingKwargs)
    -> Result<TextStream>;

    /// Apply the model's native chat template, if it has one.
    fn apply_chat_template(
        &self,
        _messages: &[ChatMessage],
        _add_generation_prompt: bool,
    ) -> Option<Result<String>> {
        None
    }

    /// Generate the next assistant turn from a structured conversation.
    ///
    /// Backends that template conversations themselves return `Some`; the
    /// output is then expected not to echo any prompt. `None` means the
    /// engine renders a prompt and calls [`stream`](TextBackend::stream).
    fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _max_tokens: usize,
        _kwargs: &SamplingKwargs,
    ) -> Option<Result<TextStream>> {
        None
    }
}

/// Chat engine over a [`TextBackend`].
///
/// Sampling keys are vetted by a capability probe that runs on first use and
/// is cached for the engine's lifetime.
pub struct NativeEngine {
    model_id: String,
    backend: Arc<dyn TextBackend>,
    capabilities: Arc<CapabilityCache>,
}

impl NativeEngine {
    pub fn new(model_id: impl Into<String>, backend: Arc<dyn TextBackend>) -> Self {
        Self {
            model_id: model_id.into(),
            backend,
            capabilities: Arc::new(CapabilityCache::new()),
        }
    }

    /// Probe result, once the first generation has run.
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.get()
    }
}

#[async_trait]
impl ChatEngine for NativeEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        super::collect_stream(self.stream_generate(prompt, params)).await
    }

    fn stream_generate(&self, prompt: &str, params: &GenerationParams) -> TextStream {
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.capabilities);
        let prompt = prompt.to_owned();
        let params = *params;

        let stream = async_stream::stream! {
            let caps = cache.get_or_probe(backend.as_ref()).await;
            let kwargs = caps.sampling_kwargs(&params);
            let mut raw = match backend.stream(&prompt, params.max_tokens, &kwargs) {
                Ok(raw) => raw,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            while let Some(fragment) = raw.next().await {
                let failed = fragment.is_err();
                yield fragment;
                if failed {
                    return;
                }
            }
        };
        Box::pin(stream)
    }

    fn render_chat(&self, messages: &[ChatMessage]) -> String {
        render::render_chat(self.backend.as_ref(), messages)
    }

    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        super::collect_stream(self.stream_generate_chat(messages, params)).await
    }

    fn stream_generate_chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> TextStream {
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.capabilities);
        let messages = messages.to_vec();
        let params = *params;

        let stream = async_stream::stream! {
            let caps = cache.get_or_probe(backend.as_ref()).await;
            let kwargs = caps.sampling_kwargs(&params);
            // Without an echoed prompt only the turn-marker cut applies.
            let (prompt, started) =
                match backend.stream_chat(&messages, params.max_tokens, &kwargs) {
                    Some(started) => (String::new(), started),
                    None => {
                        let prompt = render::render_chat(backend.as_ref(), &messages);
                        let started = backend.stream(&prompt, params.max_tokens, &kwargs);
                        (prompt, started)
                    }
                };
            let raw = match started {
                Ok(raw) => raw,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let mut cleaned = postprocess::reconcile(prompt, raw);
            while let Some(item) = cleaned.next().await {
                yield item;
            }
        };
        Box::pin(stream)
    }
}

//! Routing of model ids to engines.

use crate::error::{GatewayError, ModelKind, Result};
use crate::llm::ChatEngine;
use crate::tts::TtsEngine;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Chat and TTS engines keyed by model id.
///
/// The two namespaces are independent: a chat engine and a TTS engine may
/// share an id. Built once at startup and read-only afterwards.
#[derive(Default)]
pub struct ModelRegistry {
    chat: HashMap<String, Arc<dyn ChatEngine>>,
    tts: HashMap<String, Arc<dyn TtsEngine>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chat engine under its own model id.
    #[must_use]
    pub fn with_chat(mut self, engine: Arc<dyn ChatEngine>) -> Self {
        self.chat.insert(engine.model_id().to_owned(), engine);
        self
    }

    /// Register a TTS engine under its own model id.
    #[must_use]
    pub fn with_tts(mut self, engine: Arc<dyn TtsEngine>) -> Self {
        self.tts.insert(engine.model_id().to_owned(), engine);
        self
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::ModelNotFound`] for an unknown id.
    pub fn get_chat(&self, model_id: &str) -> Result<Arc<dyn ChatEngine>> {
        self.chat
            .get(model_id)
            .cloned()
            .ok_or_else(|| GatewayError::ModelNotFound {
                kind: ModelKind::Chat,
                id: model_id.to_owned(),
            })
    }

    /// # Errors
    ///
    /// Returns [`GatewayError::ModelNotFound`] for an unknown id.
    pub fn get_tts(&self, model_id: &str) -> Result<Arc<dyn TtsEngine>> {
        self.tts
            .get(model_id)
            .cloned()
            .ok_or_else(|| GatewayError::ModelNotFound {
                kind: ModelKind::Tts,
                id: model_id.to_owned(),
            })
    }

    /// Every registered id across both namespaces, sorted and deduplicated.
    pub fn list_model_ids(&self) -> Vec<String> {
        self.chat
            .keys()
            .chain(self.tts.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn chat_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.chat.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn tts_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("chat", &self.chat_ids())
            .field("tts", &self.tts_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::llm::EchoEngine;
    use crate::tts::{ExtraParams, TtsParams};
    use async_trait::async_trait;

    struct SilentTts(&'static str);

    #[async_trait]
    impl TtsEngine for SilentTts {
        fn model_id(&self) -> &str {
            self.0
        }

        async fn synthesize(&self, _: &str, _: &TtsParams, _: &str, _: &ExtraParams) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_chat(Arc::new(EchoEngine::new("zeta")))
            .with_chat(Arc::new(EchoEngine::new("shared")))
            .with_tts(Arc::new(SilentTts("shared")))
            .with_tts(Arc::new(SilentTts("alpha")))
    }

    #[test]
    fn lookups_hit_their_own_namespace() {
        let reg = registry();
        assert_eq!(reg.get_chat("zeta").unwrap().model_id(), "zeta");
        assert_eq!(reg.get_tts("alpha").unwrap().model_id(), "alpha");
        assert!(reg.get_chat("shared").is_ok());
        assert!(reg.get_tts("shared").is_ok());
    }

    #[test]
    fn misses_are_not_found_per_namespace() {
        let reg = registry();
        match reg.get_chat("alpha") {
            Err(GatewayError::ModelNotFound { kind, id }) => {
                assert_eq!(kind, ModelKind::Chat);
                assert_eq!(id, "alpha");
            }
            _ => panic!("expected chat not-found"),
        }
        match reg.get_tts("zeta") {
            Err(GatewayError::ModelNotFound { kind, .. }) => assert_eq!(kind, ModelKind::Tts),
            _ => panic!("expected tts not-found"),
        }
    }

    #[test]
    fn listing_is_sorted_and_deduplicated() {
        assert_eq!(registry().list_model_ids(), vec!["alpha", "shared", "zeta"]);
        assert!(ModelRegistry::new().list_model_ids().is_empty());
    }

    #[test]
    fn debug_lists_ids() {
        let text = format!("{:?}", registry());
        assert!(text.contains("\"alpha\""));
        assert!(text.contains("\"zeta\""));
    }
}

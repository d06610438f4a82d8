//! Error types for the gateway.

use std::fmt;

/// Registry namespace a model id was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Chat-completion engines.
    Chat,
    /// Text-to-speech engines.
    Tts,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => f.write_str("chat"),
            Self::Tts => f.write_str("tts"),
        }
    }
}

/// Top-level error type for engines, the registry and the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Engine construction failed (missing artifact, ambiguous selection,
    /// missing external utility, bad configuration value).
    #[error("config error: {0}")]
    Config(String),

    /// The requested model id is not registered.
    #[error("Unknown {kind} model: {id}")]
    ModelNotFound {
        /// Namespace the lookup went to.
        kind: ModelKind,
        /// The id that was requested.
        id: String,
    },

    /// The caller supplied input the engine cannot act on. The message is
    /// surfaced verbatim.
    #[error("{0}")]
    InvalidRequest(String),

    /// A backend refused a generation keyword argument.
    #[error("unexpected keyword argument '{0}'")]
    UnexpectedArgument(String),

    /// A backend failed while generating or synthesizing.
    #[error("{origin}: {message}")]
    Backend {
        /// Class or name of the originating failure.
        origin: String,
        /// Failure message as reported by the backend.
        message: String,
    },

    /// WAV decoding or encoding error.
    #[error("audio error: {0}")]
    Audio(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Shorthand for [`GatewayError::Backend`].
    pub fn backend(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Whether the failure was caused by the caller's input rather than the
    /// service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::UnexpectedArgument(_))
    }

    /// Class name of the failure, kept for diagnostics.
    pub fn origin(&self) -> &str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::ModelNotFound { .. } => "ModelNotFound",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::UnexpectedArgument(_) => "UnexpectedArgument",
            Self::Backend { origin, .. } => origin,
            Self::Audio(_) => "AudioError",
            Self::Io(_) => "IoError",
        }
    }

    /// Reclassify a free-text backend failure that is really a missing input.
    ///
    /// The message is kept unchanged; only the category moves.
    pub fn classify(self) -> Self {
        match self {
            Self::Backend { message, .. } if mentions_ref_audio_required(&message) => {
                Self::InvalidRequest(message)
            }
            other => other,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GatewayError>;

// ---------------------------------------------------------------------------
// Free-text compatibility shim
//
// Some backends only report failures as human-readable text. The helpers
// below recover structured meaning from those messages. Backends that can
// name the problem directly return `UnexpectedArgument` or `InvalidRequest`
// and never reach this code.
// ---------------------------------------------------------------------------

/// Appended to client-facing messages about missing reference audio.
pub const REF_AUDIO_HINT: &str = " (hint: this TTS model needs ref_audio for voice/speaker \
conditioning; pass a local path such as ref_audio=\"/path/to.wav\" or a base64 string.)";

/// Find which candidate key an "unexpected keyword argument" message names.
pub fn unexpected_argument_key<'a, I>(message: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    if !message.contains("unexpected keyword argument") {
        return None;
    }
    candidates
        .into_iter()
        .find(|key| message.contains(&format!("'{key}'")) || message.contains(&format!("\"{key}\"")))
}

/// Whether a message says that reference audio is required.
pub fn mentions_ref_audio_required(message: &str) -> bool {
    message.contains("ref_audio") && message.contains("required")
}

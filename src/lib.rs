//! openlocal: an OpenAI-compatible gateway for local chat and speech models.
//!
//! # Architecture
//!
//! - **Chat**: engines behind [`llm::ChatEngine`]; a model-free echo engine
//!   and a native engine over GGUF models via `mistralrs`
//! - **Speech**: engines behind [`tts::TtsEngine`]; macOS `say`, Piper ONNX
//!   voices and a voice-cloning CLI backend
//! - **Registry**: model id to engine routing, built once at startup
//! - **Server**: `axum` routes for `/v1/models`, `/v1/chat/completions` and
//!   `/v1/audio/speech`

// Fail early with a clear message when the metal feature is enabled but the
// Metal Toolchain is not installed.
#[cfg(missing_metal_toolchain)]
compile_error!(
    "The `metal` feature requires Apple's Metal Toolchain. Install it with:\n\n    \
     xcodebuild -downloadComponent MetalToolchain"
);

pub mod artifact;
pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod materialize;
pub mod registry;
pub mod server;
pub mod startup;
pub mod tts;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use registry::ModelRegistry;
pub use server::{AppState, GatewayServer};

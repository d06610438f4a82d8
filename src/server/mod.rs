//! OpenAI-compatible HTTP server.
//!
//! ## Endpoints
//!
//! - `GET /` - gateway status
//! - `GET /v1/models` - every registered model id
//! - `POST /v1/chat/completions` - chat completions (streaming and non-streaming)
//! - `POST /v1/audio/speech` - text to speech

pub mod chat;
pub mod speech;
pub mod types;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::registry::ModelRegistry;
use crate::startup::resolve_audio_backend;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;
use types::{ErrorBody, ErrorResponse, ModelListResponse, ModelObject, StatusResponse};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub config: Arc<GatewayConfig>,
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_status))
        .route("/v1/models", get(handle_models))
        .route("/v1/chat/completions", post(chat::handle_chat_completions))
        .route("/v1/audio/speech", post(speech::handle_speech))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GatewayServer
// ---------------------------------------------------------------------------

/// HTTP server running in a background tokio task.
pub struct GatewayServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl GatewayServer {
    /// Bind to `bind_addr` (port `0` picks a free port) and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot bind.
    pub async fn start(state: AppState, bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| GatewayError::Config(format!("server bind failed on {bind_addr}: {e}")))?;
        let addr = listener.local_addr()?;

        info!("gateway listening on http://{addr}/v1");

        let app = router(state);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("gateway server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// An error response in the OpenAI shape.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: ErrorBody {
                    message: message.into(),
                    error_type: error_type.to_owned(),
                },
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found_error", message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "server_error", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.body.error.message
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::ModelNotFound { .. } => Self::not_found(err.to_string()),
            e if e.is_client_error() => Self::bad_request(e.to_string()),
            e => Self::server(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Helpers and small handlers
// ---------------------------------------------------------------------------

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `GET /`
async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let config = &state.config;
    let audio_backend = resolve_audio_backend(&config.audio).unwrap_or(config.audio.backend);
    let display = |p: &Option<std::path::PathBuf>| p.as_ref().map(|p| p.display().to_string());
    Json(StatusResponse {
        status: "ok".to_owned(),
        chat_model_id: config.chat.model_id.clone(),
        chat_model_path: display(&config.chat.model_path),
        audio_backend: audio_backend.to_string(),
        audio_model_id: config.audio.model_id.clone(),
        audio_model_path: display(&config.audio.model_path),
        echo_mode: config.chat.echo_mode,
        models: state.registry.list_model_ids(),
    })
}

/// `GET /v1/models`
async fn handle_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        object: "list".to_owned(),
        data: state
            .registry
            .list_model_ids()
            .into_iter()
            .map(|id| ModelObject {
                id,
                object: "model".to_owned(),
                owned_by: "local".to_owned(),
            })
            .collect(),
    })
}

//! HTTP API server for the voice tutor
//!
//! Serves the turn and synthesis boundaries a remote session talks to.

pub mod health;
pub mod turn;
pub mod voice;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::agent::GeminiClient;
use crate::voice::SpeechSynthesizer;

/// Shared state for API handlers
#[derive(Default)]
pub struct ApiState {
    /// Backend for `/api/turn`
    pub gemini: Option<GeminiClient>,
    /// Backend for `/api/tts`
    pub tts: Option<SpeechSynthesizer>,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server without backends
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            state: Arc::new(ApiState::default()),
            port,
        }
    }

    /// Create a server over prepared state
    #[must_use]
    pub fn with_state(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(turn::router(self.state.clone()))
            .merge(voice::router(self.state.clone()))
            .merge(health::router());

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.gemini.is_none() {
            tracing::warn!("no Gemini API key configured, /api/turn will be unavailable");
        }
        if self.state.tts.is_none() {
            tracing::warn!("no Google Cloud API key configured, /api/tts will be unavailable");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

/// API errors, rendered as `{ "error": message }`
#[derive(Debug)]
pub enum ApiError {
    NotConfigured(&'static str),
    BadRequest(&'static str),
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, error) = match self {
            Self::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
            Self::Upstream(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

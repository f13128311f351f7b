//! Speech synthesis endpoint
//!
//! `POST /api/tts` with `{ text, voiceId, style }` returns MP3 audio.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};

use super::{ApiError, ApiState};
use crate::voice::SynthesisRequest;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/tts", post(synthesize))
        .with_state(state)
}

/// Synthesize text to speech
///
/// Returns audio in MP3 format
async fn synthesize(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesisRequest>,
) -> Result<Response, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text is required"));
    }

    let tts = state
        .tts
        .as_ref()
        .ok_or(ApiError::NotConfigured("Google Cloud API key not configured"))?;

    let audio = tts
        .synthesize(&request.text, &request.voice_id, request.style)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, voice = %request.voice_id, "synthesis failed");
            ApiError::Upstream(e.to_string())
        })?;

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
}

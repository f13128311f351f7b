//! Turn endpoint
//!
//! `POST /api/turn` with `{ message, conversationHistory, systemPrompt }`
//! returns `{ response }` with the sanitized tutor reply.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};

use super::{ApiError, ApiState};
use crate::agent::{TurnRequest, TurnResponse};

/// Build turn router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/turn", post(turn))
        .with_state(state)
}

/// Generate the next tutor reply
async fn turn(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message is required"));
    }

    let gemini = state
        .gemini
        .as_ref()
        .ok_or(ApiError::NotConfigured("Gemini API key not configured"))?;

    let reply = gemini
        .complete(
            &request.system_prompt,
            &request.conversation_history,
            &request.message,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "turn generation failed");
            ApiError::Upstream(e.to_string())
        })?;

    Ok(Json(TurnResponse {
        response: Some(reply),
        error: None,
    }))
}

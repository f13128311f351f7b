//! HTTP turn generator client
//!
//! Talks to a turn endpoint (such as the one served by `tutor serve`) using
//! `{ message, conversationHistory, systemPrompt }` → `{ response }`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationError, TurnGenerator, sanitize_reply};
use crate::session::{Role, SessionConfig, TranscriptEntry, prompt};

/// History entry on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&TranscriptEntry> for WireMessage {
    fn from(entry: &TranscriptEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.content.clone(),
        }
    }
}

/// Turn endpoint request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<WireMessage>,
    #[serde(default)]
    pub system_prompt: String,
}

/// Turn endpoint response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Turn generator backed by a remote turn endpoint
pub struct HttpTurnGenerator {
    client: reqwest::Client,
    endpoint: String,
    history_window: Option<usize>,
}

impl HttpTurnGenerator {
    /// Create a generator posting to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            history_window: None,
        })
    }

    /// Only send the most recent `entries` history entries
    #[must_use]
    pub const fn with_history_window(mut self, entries: usize) -> Self {
        self.history_window = Some(entries);
        self
    }

    fn windowed<'a>(&self, history: &'a [TranscriptEntry]) -> &'a [TranscriptEntry] {
        match self.history_window {
            Some(n) if history.len() > n => &history[history.len() - n..],
            _ => history,
        }
    }

    /// Build the request body for a turn
    #[must_use]
    pub fn build_request(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        config: &SessionConfig,
    ) -> TurnRequest {
        TurnRequest {
            message: utterance.to_string(),
            conversation_history: self.windowed(history).iter().map(WireMessage::from).collect(),
            system_prompt: prompt::system_prompt(config),
        }
    }
}

#[async_trait]
impl TurnGenerator for HttpTurnGenerator {
    async fn generate_reply(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        config: &SessionConfig,
    ) -> Result<String, GenerationError> {
        let request = self.build_request(history, utterance, config);
        tracing::debug!(
            endpoint = %self.endpoint,
            history = request.conversation_history.len(),
            "requesting turn"
        );

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        let body: TurnResponse = response.json().await.unwrap_or_default();

        if !status.is_success() {
            let message = body.error.unwrap_or_else(|| status.to_string());
            tracing::warn!(status = %status, error = %message, "turn endpoint failed");
            return Err(GenerationError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let reply = sanitize_reply(body.response.as_deref().unwrap_or_default());
        if reply.is_empty() {
            return Err(GenerationError::EmptyReply);
        }
        Ok(reply)
    }
}

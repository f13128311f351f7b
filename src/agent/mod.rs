//! Turn generation
//!
//! A [`TurnGenerator`] produces the next assistant utterance from the
//! conversation so far. The orchestrator always passes the full history;
//! windowing is left to the implementation.

mod gemini;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiClient, GeminiSettings};
pub use http::{HttpTurnGenerator, TurnRequest, TurnResponse, WireMessage};

use crate::session::{SessionConfig, TranscriptEntry, prompt};

/// Turn generator failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Backend answered with a failure status
    #[error("service error {status}: {message}")]
    Service { status: u16, message: String },

    /// Request never completed (connect, timeout, decode)
    #[error("transport error: {0}")]
    Transport(String),

    /// Backend answered with nothing speakable
    #[error("empty reply")]
    EmptyReply,
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Produces the next assistant utterance
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    /// Generate a reply to `utterance` given the prior `history`
    ///
    /// `history` excludes `utterance` itself.
    async fn generate_reply(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        config: &SessionConfig,
    ) -> Result<String, GenerationError>;
}

#[async_trait]
impl<T: TurnGenerator + ?Sized> TurnGenerator for Arc<T> {
    async fn generate_reply(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        config: &SessionConfig,
    ) -> Result<String, GenerationError> {
        (**self).generate_reply(history, utterance, config).await
    }
}

/// Strip markdown punctuation and collapse whitespace so text can be spoken
#[must_use]
pub fn sanitize_reply(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '#' | '_' | '`'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Answers the opening request with a fixed greeting, delegating every other turn
pub struct ScriptedOpening<G> {
    inner: G,
}

impl<G> ScriptedOpening<G> {
    /// Wrap a generator
    #[must_use]
    pub const fn new(inner: G) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<G: TurnGenerator> TurnGenerator for ScriptedOpening<G> {
    async fn generate_reply(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        config: &SessionConfig,
    ) -> Result<String, GenerationError> {
        if history.is_empty() && utterance == prompt::opening_request(config) {
            tracing::debug!(topic = %config.topic, "using scripted greeting");
            return Ok(prompt::scripted_greeting(config));
        }
        self.inner.generate_reply(history, utterance, config).await
    }
}

//! Tutoring session state and turn orchestration
//!
//! The [`Orchestrator`] owns the call lifecycle and sequences turns between
//! the capture source, the turn generator, and the playback sink.

mod events;
mod orchestrator;
pub mod prompt;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use events::{EventBus, EventKind, SessionEvent, SessionFault, Subscription};
pub use orchestrator::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_PLAYBACK_WATCHDOG, Orchestrator, OrchestratorBuilder,
};

/// Top-level session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// No session has been started
    #[default]
    Inactive,
    /// Waiting for the opening utterance
    Connecting,
    /// Turns are being exchanged
    Active,
    /// Session was hung up
    Finished,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Sub-state of an active call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for the user to speak
    Listening,
    /// A turn generator call is outstanding
    Processing,
    /// The assistant utterance is playing
    Speaking,
}

/// Who produced a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One recorded utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Create a user entry stamped now
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant entry stamped now
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-session tutoring parameters, fixed for the session's lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Subject area (e.g. "Math")
    pub subject: String,
    /// Topic within the subject (e.g. "Fractions")
    pub topic: String,
    /// Conversation style (e.g. "casual")
    pub style: String,
    /// Voice selector passed to the playback sink
    pub voice_id: String,
}

impl SessionConfig {
    /// Create a session configuration
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        topic: impl Into<String>,
        style: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            topic: topic.into(),
            style: style.into(),
            voice_id: voice_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let entry = TranscriptEntry::user("hi");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn session_config_uses_camel_case() {
        let config = SessionConfig::new("Math", "Fractions", "casual", "john");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["voiceId"], "john");
    }

    #[test]
    fn call_status_display() {
        assert_eq!(CallStatus::Connecting.to_string(), "connecting");
        assert_eq!(CallStatus::default(), CallStatus::Inactive);
    }
}

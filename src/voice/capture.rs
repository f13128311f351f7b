//! Speech capture contract
//!
//! A capture source turns continuous speech into transcript events. `start`
//! and `stop` are requests: the source may no-op them, and it never restarts
//! itself. Whether to re-arm after an unexpected stop is the orchestrator's
//! decision.

use thiserror::Error;
use tokio::sync::broadcast;

/// Capture failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// No capture engine on this host
    #[error("speech capture unavailable")]
    Unsupported,

    /// The user or platform refused microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// The engine failed mid-session
    #[error("capture engine error: {0}")]
    Engine(String),
}

impl CaptureError {
    /// Whether the fault permanently removes the ability to capture
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Unsupported | Self::PermissionDenied)
    }
}

/// Listening state of a capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Listening,
}

/// Event emitted by a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Engine began listening
    Started,
    /// Partial text for the utterance in progress (replaces earlier partials)
    Interim(String),
    /// One completed, non-empty utterance
    Final(String),
    /// Engine stopped, requested or not
    Ended,
    /// Engine reported a fault
    Fault(CaptureError),
}

/// Continuous speech-to-text source
pub trait CaptureSource: Send + Sync {
    /// Whether capture is possible at all on this host
    fn is_supported(&self) -> bool;

    /// Current listening state
    fn state(&self) -> CaptureState;

    /// Request listening; no-op if already listening or unsupported
    fn start(&self);

    /// Request stop; idempotent
    fn stop(&self);

    /// Clear interim and final buffers without touching listening state
    fn reset(&self);

    /// Subscribe to capture events
    fn subscribe(&self) -> broadcast::Receiver<CaptureEvent>;

    /// Convenience for `state() == Listening`
    fn is_listening(&self) -> bool {
        self.state() == CaptureState::Listening
    }
}

/// One recognizer hypothesis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypothesis {
    pub text: String,
    pub is_final: bool,
}

impl Hypothesis {
    /// A partial hypothesis
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    /// A settled hypothesis
    #[must_use]
    pub fn settled(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Interim and final transcript buffers for one capture source
///
/// Interim text is overwritten on every batch. Final text is handed out
/// exactly once per utterance, then the buffer resets.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    interim: String,
    final_text: String,
}

impl TranscriptBuffer {
    /// Create empty buffers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current interim text
    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Fold a recognizer batch into the buffers and return the events it produces
    pub fn ingest(&mut self, batch: &[Hypothesis]) -> Vec<CaptureEvent> {
        let mut interim = String::new();
        for hypothesis in batch {
            if hypothesis.is_final {
                self.final_text.push_str(&hypothesis.text);
            } else {
                interim.push_str(&hypothesis.text);
            }
        }

        let mut events = Vec::new();
        if interim != self.interim {
            self.interim = interim;
            if !self.interim.trim().is_empty() {
                events.push(CaptureEvent::Interim(self.interim.clone()));
            }
        }

        if batch.iter().any(|h| h.is_final) {
            let utterance = std::mem::take(&mut self.final_text);
            let utterance = utterance.trim();
            if !utterance.is_empty() {
                self.interim.clear();
                events.push(CaptureEvent::Final(utterance.to_string()));
            }
        }

        events
    }

    /// Clear both buffers
    pub fn reset(&mut self) {
        self.interim.clear();
        self.final_text.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_replaces_previous_value() {
        let mut buffer = TranscriptBuffer::new();

        assert_eq!(
            buffer.ingest(&[Hypothesis::interim("what")]),
            vec![CaptureEvent::Interim("what".to_string())]
        );
        assert_eq!(
            buffer.ingest(&[Hypothesis::interim("what is")]),
            vec![CaptureEvent::Interim("what is".to_string())]
        );
        assert_eq!(buffer.interim(), "what is");

        // unchanged interim emits nothing
        assert!(buffer.ingest(&[Hypothesis::interim("what is")]).is_empty());
    }

    #[test]
    fn final_is_emitted_once_and_joined() {
        let mut buffer = TranscriptBuffer::new();
        let events = buffer.ingest(&[
            Hypothesis::settled("what is "),
            Hypothesis::settled("a fraction "),
        ]);

        assert_eq!(
            events,
            vec![CaptureEvent::Final("what is a fraction".to_string())]
        );
        assert_eq!(buffer.interim(), "");
        assert!(buffer.ingest(&[]).is_empty());
    }

    #[test]
    fn empty_final_is_suppressed() {
        let mut buffer = TranscriptBuffer::new();
        assert!(buffer.ingest(&[Hypothesis::settled("   ")]).is_empty());
    }

    #[test]
    fn reset_clears_buffers() {
        let mut buffer = TranscriptBuffer::new();
        buffer.ingest(&[Hypothesis::interim("half")]);
        buffer.reset();
        assert_eq!(buffer.interim(), "");
    }

    #[test]
    fn terminal_faults() {
        assert!(CaptureError::PermissionDenied.is_terminal());
        assert!(CaptureError::Unsupported.is_terminal());
        assert!(!CaptureError::Engine("silence".into()).is_terminal());
    }
}

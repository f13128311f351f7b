//! Session event stream
//!
//! A typed publish/subscribe channel over a fixed set of event kinds.
//! Each subscriber holds its own receiver; dropping it unsubscribes without
//! affecting anyone else.

use thiserror::Error;
use tokio::sync::broadcast;

use super::TranscriptEntry;
use crate::agent::GenerationError;
use crate::voice::{CaptureError, PlaybackError};

/// Fault surfaced on the `error` channel, tagged by the collaborator that failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFault {
    #[error("capture fault: {0}")]
    Capture(#[from] CaptureError),

    #[error("generation fault: {0}")]
    Generation(#[from] GenerationError),

    #[error("playback fault: {0}")]
    Playback(#[from] PlaybackError),
}

/// Event emitted by the orchestrator to its host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session reached `Active`
    CallStart,
    /// Session was stopped
    CallEnd,
    /// A transcript entry was appended
    Message(TranscriptEntry),
    /// Assistant playback began
    SpeechStart,
    /// Assistant playback finished, failed, or was cancelled
    SpeechEnd,
    /// A fault occurred
    Error(SessionFault),
}

/// Discriminant of [`SessionEvent`], used for filtered subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CallStart,
    CallEnd,
    Message,
    SpeechStart,
    SpeechEnd,
    Error,
}

impl EventKind {
    /// Wire name used by hosts and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CallStart => "call-start",
            Self::CallEnd => "call-end",
            Self::Message => "message",
            Self::SpeechStart => "speech-start",
            Self::SpeechEnd => "speech-end",
            Self::Error => "error",
        }
    }
}

impl SessionEvent {
    /// Kind of this event
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::CallStart => EventKind::CallStart,
            Self::CallEnd => EventKind::CallEnd,
            Self::Message(_) => EventKind::Message,
            Self::SpeechStart => EventKind::SpeechStart,
            Self::SpeechEnd => EventKind::SpeechEnd,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Broadcast hub for session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus that buffers up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event (no-op when nobody is subscribed)
    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!(event = event.kind().as_str(), "session event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event kind
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to a subset of event kinds
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.to_vec()),
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A single subscriber's view of the event stream
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<SessionEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl Subscription {
    fn wants(&self, event: &SessionEvent) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&event.kind()))
    }

    /// Wait for the next matching event
    ///
    /// Returns `None` once the orchestrator has been dropped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event if one is already queued
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every matching event that is already queued
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {
        drop(self);
    }
}

//! Speech playback contract
//!
//! A playback sink speaks one utterance at a time. [`GuardedSink`] wraps any
//! sink with the guarantees the orchestrator relies on: a new utterance
//! cancels the previous one, and a watchdog force-resolves an utterance that
//! never finishes. The slot can be reserved ahead of playback so a cancel
//! issued before the audio starts still takes effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

/// Playback failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// Text could not be turned into audio
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Audio could not be played
    #[error("audio device error: {0}")]
    Device(String),

    /// Utterance neither finished nor failed in time
    #[error("playback watchdog expired")]
    WatchdogExpired,
}

/// Speaking state of a playback sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Speaking,
}

/// Speaking-rate preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakingStyle {
    #[default]
    Neutral,
    Fast,
    Slow,
}

impl SpeakingStyle {
    /// Speaking-rate multiplier
    #[must_use]
    pub const fn rate(self) -> f64 {
        match self {
            Self::Neutral => 1.0,
            Self::Fast => 1.2,
            Self::Slow => 0.8,
        }
    }

    /// Parse a style name, treating unknown names as neutral
    #[must_use]
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "fast" => Self::Fast,
            "slow" => Self::Slow,
            _ => Self::Neutral,
        }
    }
}

/// Text-to-speech output
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Speak `text` with the voice picked by `voice`
    ///
    /// Resolves when playback completes or is cancelled; rejects on fault.
    async fn speak(&self, text: &str, voice: &str) -> Result<(), PlaybackError>;

    /// Stop any in-flight utterance immediately; safe when idle
    fn cancel(&self);
}

/// Default playback watchdog
pub const PLAYBACK_WATCHDOG: Duration = Duration::from_secs(15);

/// Reserved right to play one utterance on a [`GuardedSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechTicket(u64);

/// Sink wrapper enforcing last-writer-wins and the playback watchdog
pub struct GuardedSink {
    inner: Arc<dyn PlaybackSink>,
    watchdog: Duration,
    /// Ticket currently owning the sink, 0 when idle
    active: AtomicU64,
    next_id: AtomicU64,
    revoked: Notify,
}

impl GuardedSink {
    /// Wrap `inner` with a watchdog
    #[must_use]
    pub fn new(inner: Arc<dyn PlaybackSink>, watchdog: Duration) -> Self {
        Self {
            inner,
            watchdog,
            active: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            revoked: Notify::new(),
        }
    }

    /// Current playback state
    ///
    /// A reserved utterance counts as speaking even before its audio starts.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        if self.active.load(Ordering::SeqCst) == 0 {
            PlaybackState::Idle
        } else {
            PlaybackState::Speaking
        }
    }

    /// Take the speaking slot, cancelling whatever held it
    pub fn reserve(&self) -> SpeechTicket {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if self.active.swap(id, Ordering::SeqCst) != 0 {
            tracing::debug!("cancelling previous utterance");
            self.revoked.notify_waiters();
            self.inner.cancel();
        }
        SpeechTicket(id)
    }

    /// Play `text` under a reserved ticket
    ///
    /// Resolves with `Ok` without playing if the ticket was revoked by a
    /// cancel or a newer reservation first. A revoke during playback resolves
    /// with `Ok` once the inner sink stops.
    ///
    /// # Errors
    ///
    /// Returns the inner sink's fault, or `WatchdogExpired`
    pub async fn speak_reserved(
        &self,
        ticket: SpeechTicket,
        text: &str,
        voice: &str,
    ) -> Result<(), PlaybackError> {
        let revoked = self.revoked.notified();
        tokio::pin!(revoked);
        revoked.as_mut().enable();

        if self.active.load(Ordering::SeqCst) != ticket.0 {
            tracing::debug!("utterance revoked before playback");
            return Ok(());
        }

        let speech = tokio::time::timeout(self.watchdog, self.inner.speak(text, voice));
        tokio::pin!(speech);

        // speech is polled first so a revoke that lands before the audio
        // starts still reaches the inner sink after it began
        let outcome = tokio::select! {
            biased;
            outcome = &mut speech => outcome,
            () = &mut revoked => {
                tracing::debug!("utterance revoked during playback");
                if self.active.load(Ordering::SeqCst) == 0 {
                    self.inner.cancel();
                }
                let _ = speech.await;
                return Ok(());
            }
        };

        let _ = self
            .active
            .compare_exchange(ticket.0, 0, Ordering::SeqCst, Ordering::SeqCst);

        outcome.unwrap_or_else(|_| {
            tracing::warn!(
                watchdog_secs = self.watchdog.as_secs(),
                "playback watchdog expired"
            );
            self.inner.cancel();
            Err(PlaybackError::WatchdogExpired)
        })
    }
}

#[async_trait]
impl PlaybackSink for GuardedSink {
    async fn speak(&self, text: &str, voice: &str) -> Result<(), PlaybackError> {
        let ticket = self.reserve();
        self.speak_reserved(ticket, text, voice).await
    }

    fn cancel(&self) {
        self.active.store(0, Ordering::SeqCst);
        self.revoked.notify_waiters();
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Sink that only finishes when cancelled
    #[derive(Default)]
    struct Stuck {
        speaks: AtomicUsize,
        cancels: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl PlaybackSink for Stuck {
        async fn speak(&self, _text: &str, _voice: &str) -> Result<(), PlaybackError> {
            self.speaks.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(())
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.release.notify_waiters();
        }
    }

    #[test]
    fn style_rates() {
        assert!((SpeakingStyle::Slow.rate() - 0.8).abs() < f64::EPSILON);
        assert!((SpeakingStyle::Fast.rate() - 1.2).abs() < f64::EPSILON);
        assert!((SpeakingStyle::Neutral.rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(SpeakingStyle::parse_lenient("FAST"), SpeakingStyle::Fast);
        assert_eq!(SpeakingStyle::parse_lenient("casual"), SpeakingStyle::Neutral);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_force_resolves_stuck_utterance() {
        let stuck = Arc::new(Stuck::default());
        let sink = GuardedSink::new(stuck.clone(), PLAYBACK_WATCHDOG);

        let result = sink.speak("hello", "john").await;

        assert_eq!(result, Err(PlaybackError::WatchdogExpired));
        assert_eq!(sink.state(), PlaybackState::Idle);
        assert_eq!(stuck.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_utterance_cancels_previous() {
        let stuck = Arc::new(Stuck::default());
        let sink = Arc::new(GuardedSink::new(stuck.clone(), PLAYBACK_WATCHDOG));

        let first = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.speak("one", "john").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(sink.state(), PlaybackState::Speaking);

        let second = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.speak("two", "john").await })
        };
        tokio::task::yield_now().await;

        assert_eq!(first.await.unwrap(), Ok(()));
        assert!(stuck.cancels.load(Ordering::SeqCst) >= 1);
        assert_eq!(sink.state(), PlaybackState::Speaking);

        sink.cancel();
        assert_eq!(second.await.unwrap(), Ok(()));
        assert_eq!(sink.state(), PlaybackState::Idle);
    }

    #[test]
    fn cancel_when_idle_is_safe() {
        let stuck = Arc::new(Stuck::default());
        let sink = GuardedSink::new(stuck, PLAYBACK_WATCHDOG);
        sink.cancel();
        assert_eq!(sink.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn cancelled_reservation_is_never_played() {
        let stuck = Arc::new(Stuck::default());
        let sink = GuardedSink::new(stuck.clone(), PLAYBACK_WATCHDOG);

        let ticket = sink.reserve();
        assert_eq!(sink.state(), PlaybackState::Speaking);

        sink.cancel();
        assert_eq!(sink.state(), PlaybackState::Idle);

        assert_eq!(sink.speak_reserved(ticket, "hello", "john").await, Ok(()));
        assert_eq!(stuck.speaks.load(Ordering::SeqCst), 0);
        assert_eq!(sink.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn superseded_reservation_is_never_played() {
        let stuck = Arc::new(Stuck::default());
        let sink = GuardedSink::new(stuck.clone(), PLAYBACK_WATCHDOG);

        let first = sink.reserve();
        let second = sink.reserve();

        assert_eq!(sink.speak_reserved(first, "one", "john").await, Ok(()));
        assert_eq!(stuck.speaks.load(Ordering::SeqCst), 0);
        assert_eq!(sink.state(), PlaybackState::Speaking);

        sink.cancel();
        assert_eq!(sink.speak_reserved(second, "two", "john").await, Ok(()));
        assert_eq!(sink.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn cancel_during_playback_resolves_with_ok() {
        let stuck = Arc::new(Stuck::default());
        let sink = Arc::new(GuardedSink::new(stuck.clone(), PLAYBACK_WATCHDOG));

        let ticket = sink.reserve();
        let speaking = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.speak_reserved(ticket, "hello", "john").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(stuck.speaks.load(Ordering::SeqCst), 1);

        sink.cancel();

        assert_eq!(speaking.await.unwrap(), Ok(()));
        assert_eq!(sink.state(), PlaybackState::Idle);
    }
}

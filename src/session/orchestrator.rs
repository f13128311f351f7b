//! Turn orchestration
//!
//! All state lives behind one mutex and every transition, including the
//! capture start/stop requests and event emission, happens inside that
//! critical section. Only the turn generator and playback calls run outside
//! it; their results are applied only if the session that issued them is
//! still live.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::events::{EventBus, EventKind, SessionEvent, SessionFault, Subscription};
use super::{CallStatus, Phase, SessionConfig, TranscriptEntry, prompt};
use crate::agent::TurnGenerator;
use crate::voice::{
    CaptureError, CaptureEvent, CaptureSource, CaptureState, GuardedSink, PLAYBACK_WATCHDOG,
    PlaybackError, PlaybackSink, PlaybackState, SpeechTicket,
};
use crate::{Error, Result};

/// Default playback watchdog
pub const DEFAULT_PLAYBACK_WATCHDOG: Duration = PLAYBACK_WATCHDOG;

/// Default per-subscriber event buffer
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct SessionState {
    status: CallStatus,
    muted: bool,
    transcript: Vec<TranscriptEntry>,
    config: Option<SessionConfig>,
    /// Bumped on every start and stop; stale async results compare against it
    epoch: u64,
    turn_in_flight: bool,
    /// Id of the utterance currently owning the speaking slot
    speaking: Option<u64>,
    next_utterance: u64,
    /// Terminal capture fault, cleared when the host unmutes
    capture_lost: Option<CaptureError>,
}

/// An utterance that has claimed the speaking slot
struct Utterance {
    id: u64,
    ticket: SpeechTicket,
    text: String,
    voice: String,
}

struct Inner {
    capture: Arc<dyn CaptureSource>,
    playback: GuardedSink,
    generator: Arc<dyn TurnGenerator>,
    events: EventBus,
    state: Mutex<SessionState>,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    capture: Arc<dyn CaptureSource>,
    playback: Arc<dyn PlaybackSink>,
    generator: Arc<dyn TurnGenerator>,
    playback_watchdog: Duration,
    event_capacity: usize,
}

impl OrchestratorBuilder {
    /// Force-resolve utterances that run longer than `watchdog`
    #[must_use]
    pub const fn playback_watchdog(mut self, watchdog: Duration) -> Self {
        self.playback_watchdog = watchdog;
        self
    }

    /// Buffer up to `capacity` events per subscriber
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the orchestrator
    #[must_use]
    pub fn build(self) -> Orchestrator {
        Orchestrator {
            inner: Arc::new(Inner {
                capture: self.capture,
                playback: GuardedSink::new(self.playback, self.playback_watchdog),
                generator: self.generator,
                events: EventBus::new(self.event_capacity),
                state: Mutex::new(SessionState::default()),
            }),
        }
    }
}

/// Voice session orchestrator
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Start building an orchestrator over its three collaborators
    #[must_use]
    pub fn builder(
        capture: Arc<dyn CaptureSource>,
        playback: Arc<dyn PlaybackSink>,
        generator: Arc<dyn TurnGenerator>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            capture,
            playback,
            generator,
            playback_watchdog: DEFAULT_PLAYBACK_WATCHDOG,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Orchestrator with default settings
    #[must_use]
    pub fn new(
        capture: Arc<dyn CaptureSource>,
        playback: Arc<dyn PlaybackSink>,
        generator: Arc<dyn TurnGenerator>,
    ) -> Self {
        Self::builder(capture, playback, generator).build()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        self.inner.events.emit(event);
    }

    /// Current call status
    #[must_use]
    pub fn status(&self) -> CallStatus {
        self.lock().status
    }

    /// Turn phase, present only while the call is active
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        let state = self.lock();
        if state.status != CallStatus::Active {
            return None;
        }
        Some(if state.speaking.is_some() {
            Phase::Speaking
        } else if state.turn_in_flight {
            Phase::Processing
        } else {
            Phase::Listening
        })
    }

    /// Whether the host muted the microphone
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.lock().muted
    }

    /// Snapshot of the transcript, oldest first
    #[must_use]
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock().transcript.clone()
    }

    /// Configuration of the live session
    #[must_use]
    pub fn config(&self) -> Option<SessionConfig> {
        self.lock().config.clone()
    }

    /// Whether speech capture can be used
    ///
    /// False when the host has no capture engine or a terminal capture fault
    /// (such as refused permission) occurred since the last unmute.
    #[must_use]
    pub fn capture_available(&self) -> bool {
        self.inner.capture.is_supported() && self.lock().capture_lost.is_none()
    }

    /// Listening state of the capture source
    #[must_use]
    pub fn capture_state(&self) -> CaptureState {
        self.inner.capture.state()
    }

    /// Speaking state of the playback sink
    #[must_use]
    pub fn playback_state(&self) -> PlaybackState {
        self.inner.playback.state()
    }

    /// Subscribe to every session event
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.inner.events.subscribe()
    }

    /// Subscribe to selected session event kinds
    #[must_use]
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.inner.events.subscribe_to(kinds)
    }

    /// Subscribe to raw capture events (interim text for display)
    #[must_use]
    pub fn capture_events(&self) -> broadcast::Receiver<CaptureEvent> {
        self.inner.capture.subscribe()
    }

    /// Start a session
    ///
    /// Requests the opening utterance, then plays it. Resolves once the
    /// opening utterance has finished playing.
    ///
    /// # Errors
    ///
    /// Returns error if capture is unsupported (before connecting), if a
    /// session is already running, if the opening request fails (the session
    /// falls back to inactive), or if the session was stopped while connecting
    pub async fn start(&self, config: SessionConfig) -> Result<()> {
        if !self.inner.capture.is_supported() {
            tracing::warn!("refusing to start: speech capture unsupported");
            return Err(Error::CaptureUnsupported);
        }

        let (epoch, opening) = {
            let mut state = self.lock();
            if !matches!(state.status, CallStatus::Inactive | CallStatus::Finished) {
                return Err(Error::InvalidState(format!(
                    "cannot start a session while {}",
                    state.status
                )));
            }

            state.status = CallStatus::Connecting;
            state.epoch += 1;
            state.transcript.clear();
            state.turn_in_flight = false;
            state.speaking = None;
            state.config = Some(config.clone());
            (state.epoch, prompt::opening_request(&config))
        };

        tracing::info!(
            subject = %config.subject,
            topic = %config.topic,
            style = %config.style,
            "session connecting"
        );

        let outcome = self
            .inner
            .generator
            .generate_reply(&[], &opening, &config)
            .await;

        let utterance = {
            let mut state = self.lock();
            if state.epoch != epoch || state.status != CallStatus::Connecting {
                tracing::debug!("discarding opening reply for a stopped session");
                return Err(Error::InvalidState(
                    "session stopped while connecting".to_string(),
                ));
            }

            match outcome {
                Err(fault) => {
                    state.status = CallStatus::Inactive;
                    state.config = None;
                    tracing::warn!(error = %fault, "opening request failed");
                    self.emit(SessionEvent::Error(SessionFault::Generation(fault.clone())));
                    return Err(fault.into());
                }
                Ok(reply) => {
                    state.status = CallStatus::Active;
                    tracing::info!("session active");
                    self.emit(SessionEvent::CallStart);

                    let entry = TranscriptEntry::assistant(reply.clone());
                    state.transcript.push(entry.clone());
                    self.emit(SessionEvent::Message(entry));

                    let utterance = self.claim_speech(&mut state, reply, &config.voice_id);
                    if utterance.is_none() {
                        self.rearm(&state);
                    }
                    utterance
                }
            }
        };

        if let Some(utterance) = utterance {
            self.play(utterance).await;
        }
        Ok(())
    }

    /// Hang up
    ///
    /// No-op when no session is running or it already finished.
    pub fn stop(&self) {
        let mut state = self.lock();
        if matches!(state.status, CallStatus::Inactive | CallStatus::Finished) {
            return;
        }

        state.epoch += 1;
        state.status = CallStatus::Finished;
        state.transcript.clear();
        state.config = None;
        state.turn_in_flight = false;

        if state.speaking.take().is_some() {
            self.emit(SessionEvent::SpeechEnd);
        }
        self.inner.playback.cancel();
        self.inner.capture.stop();
        self.inner.capture.reset();

        tracing::info!("session finished");
        self.emit(SessionEvent::CallEnd);
    }

    /// Hand a completed user utterance to the session
    ///
    /// Dropped silently when the text is blank, the call is not active, or a
    /// turn is already being generated. Resolves once the reply has been
    /// spoken, or the turn failed.
    pub async fn submit_user_utterance(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let (epoch, history, config) = {
            let mut state = self.lock();
            if state.status != CallStatus::Active {
                tracing::debug!(status = %state.status, "dropping utterance: call not active");
                return;
            }
            if state.turn_in_flight {
                tracing::debug!("dropping utterance: turn already in flight");
                return;
            }
            let Some(config) = state.config.clone() else {
                return;
            };

            state.turn_in_flight = true;
            let history = state.transcript.clone();
            let entry = TranscriptEntry::user(text);
            state.transcript.push(entry.clone());
            self.emit(SessionEvent::Message(entry));
            self.inner.capture.stop();

            (state.epoch, history, config)
        };

        tracing::debug!(history = history.len(), "generating reply");
        let outcome = self
            .inner
            .generator
            .generate_reply(&history, text, &config)
            .await;

        let utterance = {
            let mut state = self.lock();
            if state.epoch != epoch || state.status != CallStatus::Active {
                tracing::debug!("discarding reply for a stopped session");
                return;
            }
            state.turn_in_flight = false;

            match outcome {
                Err(fault) => {
                    tracing::warn!(error = %fault, "turn generation failed");
                    self.emit(SessionEvent::Error(SessionFault::Generation(fault)));
                    self.rearm(&state);
                    None
                }
                Ok(reply) => {
                    let entry = TranscriptEntry::assistant(reply.clone());
                    state.transcript.push(entry.clone());
                    self.emit(SessionEvent::Message(entry));

                    let utterance = self.claim_speech(&mut state, reply, &config.voice_id);
                    if utterance.is_none() {
                        self.rearm(&state);
                    }
                    utterance
                }
            }
        };

        if let Some(utterance) = utterance {
            self.play(utterance).await;
        }
    }

    /// Mute or unmute the microphone
    ///
    /// Muting cancels playback and stops capture immediately. Unmuting
    /// re-arms capture when the session is waiting for the user.
    pub fn set_muted(&self, muted: bool) {
        let mut state = self.lock();
        state.muted = muted;
        tracing::debug!(muted, "mute changed");

        if muted {
            if state.speaking.take().is_some() {
                self.emit(SessionEvent::SpeechEnd);
            }
            self.inner.playback.cancel();
            self.inner.capture.stop();
        } else {
            state.capture_lost = None;
            self.rearm(&state);
        }
    }

    /// Apply one capture event
    ///
    /// Final utterances are submitted on a spawned task, so this must be
    /// called from within a tokio runtime.
    pub fn handle_capture_event(&self, event: CaptureEvent) {
        match event {
            CaptureEvent::Started => tracing::debug!("capture started"),
            CaptureEvent::Interim(text) => tracing::trace!(interim = %text, "interim transcript"),
            CaptureEvent::Final(text) => {
                self.inner.capture.reset();
                let this = self.clone();
                tokio::spawn(async move { this.submit_user_utterance(&text).await });
            }
            CaptureEvent::Ended => {
                tracing::debug!("capture ended");
                self.rearm(&self.lock());
            }
            CaptureEvent::Fault(fault) if fault.is_terminal() => {
                tracing::warn!(error = %fault, "capture lost, muting");
                let mut state = self.lock();
                state.muted = true;
                state.capture_lost = Some(fault.clone());
                self.inner.capture.stop();
                self.emit(SessionEvent::Error(SessionFault::Capture(fault)));
            }
            CaptureEvent::Fault(fault) => {
                tracing::warn!(error = %fault, "capture fault");
                let state = self.lock();
                self.emit(SessionEvent::Error(SessionFault::Capture(fault)));
                self.rearm(&state);
            }
        }
    }

    /// Route capture events into the session on a background task
    ///
    /// The task ends when the capture source closes its event channel or the
    /// orchestrator is dropped.
    #[must_use]
    pub fn spawn_capture_pump(&self) -> JoinHandle<()> {
        let mut rx = self.inner.capture.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "capture pump lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };
                Self { inner }.handle_capture_event(event);
            }
            tracing::debug!("capture pump stopped");
        })
    }

    /// Claim the speaking slot for `text`
    ///
    /// Returns `None` while muted. Capture is stopped before `speech-start`
    /// is emitted so listening and speaking never overlap. The sink slot is
    /// reserved here, under the session lock, so a stop or mute that follows
    /// revokes the utterance even if its audio has not started.
    fn claim_speech(
        &self,
        state: &mut SessionState,
        text: String,
        voice: &str,
    ) -> Option<Utterance> {
        if state.muted {
            tracing::debug!("muted, reply not spoken");
            return None;
        }

        if state.speaking.take().is_some() {
            self.emit(SessionEvent::SpeechEnd);
        }
        state.next_utterance += 1;
        let id = state.next_utterance;
        state.speaking = Some(id);
        let ticket = self.inner.playback.reserve();

        self.inner.capture.stop();
        self.emit(SessionEvent::SpeechStart);

        Some(Utterance {
            id,
            ticket,
            text,
            voice: voice.to_string(),
        })
    }

    async fn play(&self, utterance: Utterance) {
        let outcome = self
            .inner
            .playback
            .speak_reserved(utterance.ticket, &utterance.text, &utterance.voice)
            .await;
        self.finish_speech(utterance.id, outcome);
    }

    /// Close the speaking slot for utterance `id`
    ///
    /// A no-op when the slot was already released by mute, stop, or a newer
    /// utterance.
    fn finish_speech(&self, id: u64, outcome: std::result::Result<(), PlaybackError>) {
        let mut state = self.lock();
        if state.speaking != Some(id) {
            tracing::trace!(id, "speech already ended");
            return;
        }

        state.speaking = None;
        self.emit(SessionEvent::SpeechEnd);
        if let Err(fault) = outcome {
            tracing::warn!(error = %fault, "playback fault");
            self.emit(SessionEvent::Error(SessionFault::Playback(fault)));
        }
        self.rearm(&state);
    }

    /// Start capture if, and only if, the session is waiting for the user
    fn rearm(&self, state: &SessionState) {
        let ready = state.status == CallStatus::Active
            && !state.muted
            && state.speaking.is_none()
            && !state.turn_in_flight
            && self.inner.playback.state() == PlaybackState::Idle;

        if ready {
            tracing::trace!("arming capture");
            self.inner.capture.start();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::agent::GenerationError;

    #[derive(Default)]
    struct Mic {
        supported: bool,
        listening: AtomicBool,
        starts: AtomicUsize,
        tx: Option<broadcast::Sender<CaptureEvent>>,
    }

    impl Mic {
        fn supported() -> Self {
            let (tx, _) = broadcast::channel(8);
            Self {
                supported: true,
                tx: Some(tx),
                ..Self::default()
            }
        }
    }

    impl CaptureSource for Mic {
        fn is_supported(&self) -> bool {
            self.supported
        }

        fn state(&self) -> CaptureState {
            if self.listening.load(Ordering::SeqCst) {
                CaptureState::Listening
            } else {
                CaptureState::Idle
            }
        }

        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.listening.store(true, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }

        fn reset(&self) {}

        fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
            match &self.tx {
                Some(tx) => tx.subscribe(),
                None => broadcast::channel(1).1,
            }
        }
    }

    struct Instant;

    #[async_trait]
    impl PlaybackSink for Instant {
        async fn speak(&self, _text: &str, _voice: &str) -> std::result::Result<(), PlaybackError> {
            Ok(())
        }

        fn cancel(&self) {}
    }

    /// Sink counting the utterances that actually reached it
    #[derive(Default)]
    struct Counting {
        speaks: AtomicUsize,
    }

    #[async_trait]
    impl PlaybackSink for Counting {
        async fn speak(&self, _text: &str, _voice: &str) -> std::result::Result<(), PlaybackError> {
            self.speaks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cancel(&self) {}
    }

    struct Echo;

    #[async_trait]
    impl TurnGenerator for Echo {
        async fn generate_reply(
            &self,
            _history: &[TranscriptEntry],
            utterance: &str,
            _config: &SessionConfig,
        ) -> std::result::Result<String, GenerationError> {
            Ok(format!("you said {utterance}"))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new("Math", "Fractions", "casual", "john")
    }

    #[tokio::test]
    async fn unsupported_capture_refuses_before_connecting() {
        let orchestrator =
            Orchestrator::new(Arc::new(Mic::default()), Arc::new(Instant), Arc::new(Echo));
        let mut events = orchestrator.subscribe();

        let result = orchestrator.start(config()).await;

        assert!(matches!(result, Err(Error::CaptureUnsupported)));
        assert_eq!(orchestrator.status(), CallStatus::Inactive);
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let orchestrator =
            Orchestrator::new(Arc::new(Mic::supported()), Arc::new(Instant), Arc::new(Echo));
        orchestrator.start(config()).await.unwrap();

        let second = orchestrator.start(config()).await;
        assert!(matches!(second, Err(Error::InvalidState(_))));
        assert_eq!(orchestrator.status(), CallStatus::Active);
    }

    #[tokio::test]
    async fn phase_follows_call() {
        let mic = Arc::new(Mic::supported());
        let orchestrator = Orchestrator::new(mic.clone(), Arc::new(Instant), Arc::new(Echo));
        assert_eq!(orchestrator.phase(), None);

        orchestrator.start(config()).await.unwrap();
        assert_eq!(orchestrator.phase(), Some(Phase::Listening));
        assert_eq!(orchestrator.capture_state(), CaptureState::Listening);

        orchestrator.stop();
        assert_eq!(orchestrator.phase(), None);
        assert_eq!(orchestrator.capture_state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn finished_session_can_restart() {
        let orchestrator =
            Orchestrator::new(Arc::new(Mic::supported()), Arc::new(Instant), Arc::new(Echo));
        orchestrator.start(config()).await.unwrap();
        orchestrator.submit_user_utterance("hello").await;
        orchestrator.stop();

        orchestrator.start(config()).await.unwrap();
        assert_eq!(orchestrator.status(), CallStatus::Active);
        assert_eq!(orchestrator.transcript().len(), 1);
    }

    #[tokio::test]
    async fn terminal_capture_fault_mutes_without_ending_call() {
        let mic = Arc::new(Mic::supported());
        let orchestrator = Orchestrator::new(mic.clone(), Arc::new(Instant), Arc::new(Echo));
        orchestrator.start(config()).await.unwrap();
        let mut errors = orchestrator.subscribe_to(&[EventKind::Error]);

        orchestrator.handle_capture_event(CaptureEvent::Fault(CaptureError::PermissionDenied));

        assert!(orchestrator.is_muted());
        assert!(!orchestrator.capture_available());
        assert_eq!(orchestrator.status(), CallStatus::Active);
        assert_eq!(orchestrator.capture_state(), CaptureState::Idle);
        assert_eq!(
            errors.drain(),
            vec![SessionEvent::Error(SessionFault::Capture(
                CaptureError::PermissionDenied
            ))]
        );

        orchestrator.set_muted(false);
        assert!(orchestrator.capture_available());
        assert_eq!(orchestrator.capture_state(), CaptureState::Listening);
    }

    #[tokio::test]
    async fn unexpected_capture_end_rearms() {
        let mic = Arc::new(Mic::supported());
        let orchestrator = Orchestrator::new(mic.clone(), Arc::new(Instant), Arc::new(Echo));
        orchestrator.start(config()).await.unwrap();

        // engine timed out on silence
        mic.stop();
        let starts = mic.starts.load(Ordering::SeqCst);
        orchestrator.handle_capture_event(CaptureEvent::Ended);

        assert_eq!(mic.starts.load(Ordering::SeqCst), starts + 1);
        assert_eq!(orchestrator.capture_state(), CaptureState::Listening);
    }

    #[tokio::test]
    async fn stop_before_audio_starts_revokes_utterance() {
        let sink = Arc::new(Counting::default());
        let orchestrator =
            Orchestrator::new(Arc::new(Mic::supported()), sink.clone(), Arc::new(Echo));
        orchestrator.start(config()).await.unwrap();
        let spoken = sink.speaks.load(Ordering::SeqCst);

        let utterance = {
            let mut state = orchestrator.lock();
            orchestrator.claim_speech(&mut state, "a late reply".to_string(), "john")
        }
        .unwrap();
        assert_eq!(orchestrator.playback_state(), PlaybackState::Speaking);

        orchestrator.stop();
        assert_eq!(orchestrator.playback_state(), PlaybackState::Idle);

        orchestrator.play(utterance).await;
        assert_eq!(sink.speaks.load(Ordering::SeqCst), spoken);
        assert_eq!(orchestrator.playback_state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn mute_before_audio_starts_lets_unmute_rearm() {
        let sink = Arc::new(Counting::default());
        let mic = Arc::new(Mic::supported());
        let orchestrator = Orchestrator::new(mic.clone(), sink.clone(), Arc::new(Echo));
        orchestrator.start(config()).await.unwrap();
        let spoken = sink.speaks.load(Ordering::SeqCst);

        let utterance = {
            let mut state = orchestrator.lock();
            orchestrator.claim_speech(&mut state, "a late reply".to_string(), "john")
        }
        .unwrap();
        assert_eq!(orchestrator.capture_state(), CaptureState::Idle);

        orchestrator.set_muted(true);
        orchestrator.set_muted(false);
        assert_eq!(orchestrator.capture_state(), CaptureState::Listening);

        orchestrator.play(utterance).await;
        assert_eq!(sink.speaks.load(Ordering::SeqCst), spoken);
        assert_eq!(orchestrator.phase(), Some(Phase::Listening));
        assert_eq!(orchestrator.capture_state(), CaptureState::Listening);
    }
}

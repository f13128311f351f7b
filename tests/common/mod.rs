//! Shared test utilities: fake collaborators and an overlap probe

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};
use voice_tutor::agent::{GenerationError, TurnGenerator};
use voice_tutor::voice::{CaptureEvent, CaptureSource, CaptureState, PlaybackError, PlaybackSink};
use voice_tutor::{DbPool, SessionConfig, TranscriptEntry, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// The session used throughout the tests
#[must_use]
pub fn fractions() -> SessionConfig {
    SessionConfig::new("Math", "Fractions", "casual", "john")
}

/// Yield to the scheduler until `cond` holds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Counts moments where capture was listening while playback was speaking
#[derive(Default)]
pub struct Probe {
    listening: AtomicBool,
    speaking: AtomicBool,
    violations: AtomicUsize,
}

impl Probe {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
        if listening && self.speaking.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
        if speaking && self.listening.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Capture source driven by the test
pub struct FakeCapture {
    supported: bool,
    listening: AtomicBool,
    starts: AtomicUsize,
    resets: AtomicUsize,
    tx: broadcast::Sender<CaptureEvent>,
    probe: Option<Arc<Probe>>,
}

impl FakeCapture {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(true, None))
    }

    #[must_use]
    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self::build(false, None))
    }

    #[must_use]
    pub fn probed(probe: Arc<Probe>) -> Arc<Self> {
        Arc::new(Self::build(true, Some(probe)))
    }

    fn build(supported: bool, probe: Option<Arc<Probe>>) -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            supported,
            listening: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            tx,
            probe,
        }
    }

    /// Push an event as if the engine produced it
    pub fn emit(&self, event: CaptureEvent) {
        if event == CaptureEvent::Ended {
            self.set_listening(false);
        }
        let _ = self.tx.send(event);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            probe.set_listening(listening);
        }
    }
}

impl CaptureSource for FakeCapture {
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
        if !self.supported {
            return;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.set_listening(true);
    }

    fn stop(&self) {
        self.set_listening(false);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.tx.subscribe()
    }
}

/// How a [`FakePlayback`] resolves each utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Finish after one scheduler turn
    Auto,
    /// Finish when the test calls `release` or the sink is cancelled
    Manual,
    /// Never finish, even when cancelled
    Hang,
    /// Fail with a device error
    Fail,
}

/// Playback sink recording what it was asked to say
pub struct FakePlayback {
    mode: PlaybackMode,
    release: Notify,
    speaking: AtomicBool,
    cancels: AtomicUsize,
    spoken: Mutex<Vec<(String, String)>>,
    probe: Option<Arc<Probe>>,
}

impl FakePlayback {
    #[must_use]
    pub fn new(mode: PlaybackMode) -> Arc<Self> {
        Arc::new(Self::build(mode, None))
    }

    #[must_use]
    pub fn probed(mode: PlaybackMode, probe: Arc<Probe>) -> Arc<Self> {
        Arc::new(Self::build(mode, Some(probe)))
    }

    fn build(mode: PlaybackMode, probe: Option<Arc<Probe>>) -> Self {
        Self {
            mode,
            release: Notify::new(),
            speaking: AtomicBool::new(false),
            cancels: AtomicUsize::new(0),
            spoken: Mutex::new(Vec::new()),
            probe,
        }
    }

    /// Finish the utterance in progress (manual mode)
    pub fn release(&self) {
        self.release.notify_waiters();
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Texts spoken so far
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    /// Voice selectors passed so far
    pub fn voices(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(_, voice)| voice.clone())
            .collect()
    }

    fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            probe.set_speaking(speaking);
        }
    }
}

#[async_trait]
impl PlaybackSink for FakePlayback {
    async fn speak(&self, text: &str, voice: &str) -> Result<(), PlaybackError> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));

        let released = self.release.notified();
        tokio::pin!(released);
        released.as_mut().enable();
        self.set_speaking(true);

        let outcome = match self.mode {
            PlaybackMode::Auto => {
                tokio::task::yield_now().await;
                Ok(())
            }
            PlaybackMode::Manual => {
                released.await;
                Ok(())
            }
            PlaybackMode::Hang => std::future::pending().await,
            PlaybackMode::Fail => Err(PlaybackError::Device("no output device".to_string())),
        };

        self.set_speaking(false);
        outcome
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if self.mode != PlaybackMode::Hang {
            self.release.notify_waiters();
        }
    }
}

/// One call seen by a [`FakeGenerator`]
#[derive(Debug, Clone)]
pub struct GeneratorCall {
    pub history: Vec<TranscriptEntry>,
    pub utterance: String,
}

/// Turn generator answering from a script, echoing once the script runs out
#[derive(Default)]
pub struct FakeGenerator {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    gated: bool,
    gate: Notify,
    calls: Mutex<Vec<GeneratorCall>>,
}

impl FakeGenerator {
    /// Echo every utterance back
    #[must_use]
    pub fn echo() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer with `replies` in order, then echo
    #[must_use]
    pub fn scripted(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    /// Hold every reply until `open` is called
    #[must_use]
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gated: true,
            ..Self::default()
        })
    }

    /// Let held replies through
    pub fn open(&self) {
        self.gate.notify_waiters();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<GeneratorCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TurnGenerator for FakeGenerator {
    async fn generate_reply(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        _config: &SessionConfig,
    ) -> Result<String, GenerationError> {
        let opened = self.gate.notified();
        tokio::pin!(opened);
        opened.as_mut().enable();

        self.calls.lock().unwrap().push(GeneratorCall {
            history: history.to_vec(),
            utterance: utterance.to_string(),
        });

        if self.gated {
            opened.await;
        }

        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(format!("You said {utterance}.")))
    }
}

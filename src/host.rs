//! Host binding
//!
//! Glue between a user-facing surface and the orchestrator: relays intent
//! (start, mute, hang up), keeps a render-ready view of the session, and
//! records finished calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::db::SessionRecorder;
use crate::session::{
    CallStatus, Orchestrator, Phase, SessionConfig, SessionEvent, TranscriptEntry,
};
use crate::voice::{CaptureEvent, CaptureState};
use crate::{Error, Result};

/// Who a session is recorded against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub companion_id: String,
    pub user_id: String,
}

/// Render-ready snapshot of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostView {
    pub status: CallStatus,
    pub speaking: bool,
    pub muted: bool,
    pub listening: bool,
    pub capture_available: bool,
    /// Partial transcript of the utterance in progress
    pub interim: String,
    /// Transcript, newest first
    pub messages: Vec<TranscriptEntry>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Tracked {
    interim: String,
    messages: Vec<TranscriptEntry>,
    last_error: Option<String>,
}

impl Tracked {
    fn apply_session(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Message(entry) => {
                self.interim.clear();
                self.messages.insert(0, entry.clone());
            }
            SessionEvent::CallEnd => {
                self.interim.clear();
                self.messages.clear();
            }
            SessionEvent::Error(fault) => self.last_error = Some(fault.to_string()),
            SessionEvent::CallStart | SessionEvent::SpeechStart | SessionEvent::SpeechEnd => {}
        }
    }

    fn apply_capture(&mut self, event: &CaptureEvent) {
        match event {
            CaptureEvent::Interim(text) => self.interim.clone_from(text),
            CaptureEvent::Final(_) | CaptureEvent::Ended => self.interim.clear(),
            CaptureEvent::Started | CaptureEvent::Fault(_) => {}
        }
    }
}

fn lock(tracked: &Mutex<Tracked>) -> MutexGuard<'_, Tracked> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Binds one orchestrator to a host surface
pub struct HostBinding {
    orchestrator: Orchestrator,
    tracked: Arc<Mutex<Tracked>>,
    tasks: Vec<JoinHandle<()>>,
}

impl HostBinding {
    /// Attach to `orchestrator`
    ///
    /// Spawns the capture pump and the view and recording watchers, so this
    /// must be called from within a tokio runtime. When a recorder is given,
    /// every `call-end` appends one record for `identity`.
    #[must_use]
    pub fn attach(
        orchestrator: Orchestrator,
        identity: HostIdentity,
        recorder: Option<Arc<dyn SessionRecorder>>,
    ) -> Self {
        let tracked = Arc::new(Mutex::new(Tracked::default()));
        let mut tasks = vec![orchestrator.spawn_capture_pump()];

        let mut events = orchestrator.subscribe();
        let session_view = Arc::clone(&tracked);
        tasks.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                lock(&session_view).apply_session(&event);
                if let (SessionEvent::CallEnd, Some(recorder)) = (&event, &recorder) {
                    record_session(Arc::clone(recorder), identity.clone());
                }
            }
        }));

        let mut capture = orchestrator.capture_events();
        let capture_view = Arc::clone(&tracked);
        tasks.push(tokio::spawn(async move {
            loop {
                match capture.recv().await {
                    Ok(event) => lock(&capture_view).apply_capture(&event),
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        Self {
            orchestrator,
            tracked,
            tasks,
        }
    }

    /// The bound orchestrator
    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Start a call
    ///
    /// # Errors
    ///
    /// Returns error if capture is unavailable or the session cannot start
    pub async fn start(&self, config: SessionConfig) -> Result<()> {
        if !self.orchestrator.capture_available() {
            return Err(Error::CaptureUnsupported);
        }
        {
            let mut tracked = lock(&self.tracked);
            tracked.messages.clear();
            tracked.last_error = None;
        }
        self.orchestrator.start(config).await
    }

    /// Mute or unmute the microphone
    pub fn set_muted(&self, muted: bool) {
        self.orchestrator.set_muted(muted);
    }

    /// Flip the mute flag, returning the new value
    pub fn toggle_mic(&self) -> bool {
        let muted = !self.orchestrator.is_muted();
        self.orchestrator.set_muted(muted);
        muted
    }

    /// Hang up
    pub fn disconnect(&self) {
        self.orchestrator.stop();
    }

    /// Current view of the session
    #[must_use]
    pub fn view(&self) -> HostView {
        let tracked = lock(&self.tracked);
        HostView {
            status: self.orchestrator.status(),
            speaking: self.orchestrator.phase() == Some(Phase::Speaking),
            muted: self.orchestrator.is_muted(),
            listening: self.orchestrator.capture_state() == CaptureState::Listening,
            capture_available: self.orchestrator.capture_available(),
            interim: tracked.interim.clone(),
            messages: tracked.messages.clone(),
            last_error: tracked.last_error.clone(),
        }
    }
}

impl Drop for HostBinding {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Append a history record without blocking the event loop
fn record_session(recorder: Arc<dyn SessionRecorder>, identity: HostIdentity) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = recorder.record(&identity.companion_id, &identity.user_id) {
            tracing::warn!(
                error = %e,
                companion_id = %identity.companion_id,
                "failed to record session"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionFault;
    use crate::voice::PlaybackError;

    #[test]
    fn messages_are_newest_first() {
        let mut tracked = Tracked::default();
        tracked.apply_session(&SessionEvent::Message(TranscriptEntry::assistant("hello")));
        tracked.apply_session(&SessionEvent::Message(TranscriptEntry::user("hi")));

        assert_eq!(tracked.messages[0].content, "hi");
        assert_eq!(tracked.messages[1].content, "hello");
    }

    #[test]
    fn interim_replaced_then_cleared() {
        let mut tracked = Tracked::default();
        tracked.apply_capture(&CaptureEvent::Interim("what".into()));
        tracked.apply_capture(&CaptureEvent::Interim("what is".into()));
        assert_eq!(tracked.interim, "what is");

        tracked.apply_session(&SessionEvent::Message(TranscriptEntry::user("what is it")));
        assert!(tracked.interim.is_empty());
    }

    #[test]
    fn call_end_clears_view_and_errors_stick() {
        let mut tracked = Tracked::default();
        tracked.apply_session(&SessionEvent::Message(TranscriptEntry::assistant("hello")));
        tracked.apply_session(&SessionEvent::Error(SessionFault::Playback(
            PlaybackError::WatchdogExpired,
        )));
        tracked.apply_session(&SessionEvent::CallEnd);

        assert!(tracked.messages.is_empty());
        assert_eq!(
            tracked.last_error.as_deref(),
            Some("playback fault: playback watchdog expired")
        );
    }
}

//! Voice Tutor - voice-driven AI tutoring sessions
//!
//! This library provides the core of a spoken tutoring call:
//! - Turn orchestration between microphone, tutor model and speaker
//! - Speech capture (cpal + hosted STT) and playback (hosted TTS + cpal)
//! - Turn generators (Gemini direct, or an HTTP `/api/turn` endpoint)
//! - A small HTTP API exposing turn generation and speech synthesis
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Host                            │
//! │      CLI session  │  HostBinding (view, history)     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Orchestrator                        │
//! │   call lifecycle  │  turns  │  events  │  watchdog   │
//! └──────┬─────────────────┬──────────────────┬─────────┘
//!        │                 │                  │
//! ┌──────▼──────┐  ┌───────▼───────┐  ┌───────▼───────┐
//! │  Capture    │  │ TurnGenerator │  │   Playback    │
//! │  mic + STT  │  │ Gemini / HTTP │  │  TTS + audio  │
//! └─────────────┘  └───────────────┘  └───────────────┘
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod host;
pub mod session;
pub mod voice;

pub use agent::{GenerationError, ScriptedOpening, TurnGenerator, sanitize_reply};
pub use config::Config;
pub use db::{DbConn, DbPool, SessionHistoryRepo, SessionRecorder};
pub use error::{Error, Result};
pub use host::{HostBinding, HostIdentity, HostView};
pub use session::{
    CallStatus, EventKind, Orchestrator, OrchestratorBuilder, Phase, Role, SessionConfig,
    SessionEvent, SessionFault, Subscription, TranscriptEntry,
};
pub use voice::{CaptureSource, PlaybackSink};

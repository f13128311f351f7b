//! Voice processing module
//!
//! Capture and playback contracts the session orchestrator drives, plus the
//! microphone and speaker implementations behind them.

mod capture;
mod catalog;
mod mic;
mod playback;
mod speaker;
mod stt;
mod tts;

pub use capture::{
    CaptureError, CaptureEvent, CaptureSource, CaptureState, Hypothesis, TranscriptBuffer,
};
pub use catalog::{GOOGLE_WAVENET, Gender, OPENAI, VoiceInfo, select_voice};
pub use mic::{
    AudioInput, DefaultInput, InputFeed, MicCapture, SAMPLE_RATE, SegmenterSettings,
    UtteranceSegmenter, samples_to_wav,
};
pub use playback::{
    GuardedSink, PLAYBACK_WATCHDOG, PlaybackError, PlaybackSink, PlaybackState, SpeakingStyle,
    SpeechTicket,
};
pub use speaker::{DecodedAudio, SpeakerSink, decode_mp3};
pub use stt::{SpeechToText, SttProvider, Transcriber};
pub use tts::{DEFAULT_VOICE_ID, SpeechSynthesizer, SynthesisRequest, ssml_gender};

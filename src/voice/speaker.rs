//! Speaker playback sink
//!
//! Synthesizes each utterance, decodes the MP3 and plays it on the default
//! output device. Starting an utterance cancels the one before it.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::catalog::select_voice;
use super::playback::{PlaybackError, PlaybackSink, SpeakingStyle};
use super::tts::SpeechSynthesizer;
use crate::{Error, Result};

/// Decoded PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Playback sink speaking through the default output device
pub struct SpeakerSink {
    synthesizer: Arc<SpeechSynthesizer>,
    style: SpeakingStyle,
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl SpeakerSink {
    /// Create a sink over `synthesizer`
    #[must_use]
    pub fn new(synthesizer: SpeechSynthesizer) -> Self {
        Self {
            synthesizer: Arc::new(synthesizer),
            style: SpeakingStyle::default(),
            current: Mutex::new(None),
        }
    }

    /// Speaking-rate preset for every utterance
    #[must_use]
    pub const fn with_style(mut self, style: SpeakingStyle) -> Self {
        self.style = style;
        self
    }

    /// Register a new utterance, cancelling the previous one
    fn begin(&self) -> Arc<AtomicBool> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.replace(Arc::clone(&cancelled)) {
            previous.store(true, Ordering::SeqCst);
        }
        cancelled
    }

    fn finish(&self, cancelled: &Arc<AtomicBool>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, cancelled)) {
            *current = None;
        }
    }

    async fn run(
        &self,
        text: &str,
        voice: &str,
        cancelled: &Arc<AtomicBool>,
    ) -> std::result::Result<(), PlaybackError> {
        let voice_id = select_voice(self.synthesizer.catalog(), voice).map_or(voice, |v| v.id);
        tracing::debug!(voice = voice_id, chars = text.len(), "speaking");

        let audio = self
            .synthesizer
            .synthesize(text, voice_id, self.style)
            .await
            .map_err(|e| PlaybackError::Synthesis(e.to_string()))?;

        if cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }

        let decoded = decode_mp3(&audio).map_err(|e| PlaybackError::Synthesis(e.to_string()))?;
        let cancelled = Arc::clone(cancelled);

        tokio::task::spawn_blocking(move || play_blocking(&decoded, &cancelled))
            .await
            .map_err(|e| PlaybackError::Device(e.to_string()))?
            .map_err(|e| PlaybackError::Device(e.to_string()))
    }
}

#[async_trait]
impl PlaybackSink for SpeakerSink {
    async fn speak(&self, text: &str, voice: &str) -> std::result::Result<(), PlaybackError> {
        let cancelled = self.begin();
        let outcome = self.run(text, voice, &cancelled).await;
        self.finish(&cancelled);
        outcome
    }

    fn cancel(&self) {
        let current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancelled) = current {
            cancelled.store(true, Ordering::SeqCst);
            tracing::debug!("playback cancelled");
        }
    }
}

/// Play decoded audio, returning early once `cancelled` is set
fn play_blocking(audio: &DecodedAudio, cancelled: &Arc<AtomicBool>) -> Result<()> {
    if audio.samples.is_empty() || audio.sample_rate == 0 {
        return Ok(());
    }

    let rate = SampleRate(audio.sample_rate);
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(|c| c.channels())
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?
        .with_sample_rate(rate)
        .config();
    let channels = usize::from(config.channels);

    let samples = Arc::new(audio.samples.clone());
    let finished = Arc::new(AtomicBool::new(false));
    let mut position = 0usize;

    let stream = {
        let samples = Arc::clone(&samples);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::SeqCst);
                            0.0
                        });
                        frame.fill(sample);
                        position = (position + 1).min(samples.len());
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(audio.sample_rate);
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::SeqCst) && !cancelled.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(stream);
    tracing::debug!(
        samples = samples.len(),
        cancelled = cancelled.load(Ordering::SeqCst),
        "playback complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> SpeakerSink {
        SpeakerSink::new(SpeechSynthesizer::endpoint("http://127.0.0.1:9/api/tts").unwrap())
    }

    #[test]
    fn decode_empty_input() {
        let decoded = decode_mp3(&[]).unwrap();
        assert!(decoded.samples.is_empty());
        assert_eq!(decoded.sample_rate, 0);
    }

    #[test]
    fn new_utterance_cancels_previous() {
        let sink = sink();
        let first = sink.begin();
        let second = sink.begin();

        assert!(first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));

        // finishing a stale utterance leaves the current one registered
        sink.finish(&first);
        sink.cancel();
        assert!(second.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_when_idle_is_safe() {
        let sink = sink();
        sink.cancel();
        sink.cancel();
    }

    #[tokio::test]
    async fn synthesis_failure_rejects() {
        let result = sink().speak("hello", "john").await;
        assert!(matches!(result, Err(PlaybackError::Synthesis(_))));
    }
}

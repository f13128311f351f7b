//! Microphone capture source
//!
//! Segments microphone audio into utterances by energy, transcribes each
//! utterance, and publishes the text as final capture events. The input
//! stream lives on a dedicated thread since a cpal stream cannot cross
//! threads.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::capture::{
    CaptureError, CaptureEvent, CaptureSource, CaptureState, Hypothesis, TranscriptBuffer,
};
use super::stt::{SpeechToText, Transcriber};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Minimum duration of speech to keep a segment (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// How often the capture thread drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Utterance segmentation thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterSettings {
    /// Minimum RMS energy to consider speech
    pub energy_threshold: f32,
    /// Trailing silence that ends an utterance
    pub silence: Duration,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            silence: Duration::from_millis(800),
        }
    }
}

/// Splits a sample stream into speech segments
#[derive(Debug)]
pub struct UtteranceSegmenter {
    energy_threshold: f32,
    silence_samples: usize,
    speech: Vec<f32>,
    silence: usize,
    in_speech: bool,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::with_settings(SegmenterSettings::default())
    }
}

impl UtteranceSegmenter {
    /// Create an idle segmenter with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an idle segmenter
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn with_settings(settings: SegmenterSettings) -> Self {
        Self {
            energy_threshold: settings.energy_threshold,
            silence_samples: (settings.silence.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize,
            speech: Vec::new(),
            silence: 0,
            in_speech: false,
        }
    }

    /// Feed samples; returns a completed segment once speech is followed by silence
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        if samples.is_empty() {
            return None;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > self.energy_threshold;

        if !self.in_speech {
            if is_speech {
                tracing::trace!(energy, "speech detected");
                self.in_speech = true;
                self.silence = 0;
                self.speech.clear();
                self.speech.extend_from_slice(samples);
            }
            return None;
        }

        self.speech.extend_from_slice(samples);
        if is_speech {
            self.silence = 0;
        } else {
            self.silence += samples.len();
        }

        if self.silence <= self.silence_samples {
            return None;
        }

        let voiced = self.speech.len().saturating_sub(self.silence);
        let segment = std::mem::take(&mut self.speech);
        self.reset();

        if voiced > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = segment.len(), "speech segment complete");
            Some(segment)
        } else {
            tracing::trace!("segment too short, dropped");
            None
        }
    }

    /// Return to idle, discarding buffered speech
    pub fn reset(&mut self) {
        self.speech.clear();
        self.silence = 0;
        self.in_speech = false;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Where an audio input delivers samples and stream faults
#[derive(Clone, Default)]
pub struct InputFeed {
    samples: Arc<Mutex<Vec<f32>>>,
    fault: Arc<Mutex<Option<String>>>,
}

impl InputFeed {
    /// Append captured samples
    pub fn push(&self, data: &[f32]) {
        if let Ok(mut buf) = self.samples.lock() {
            buf.extend_from_slice(data);
        }
    }

    /// Report that the stream failed; the first report wins
    pub fn fail(&self, message: impl Into<String>) {
        if let Ok(mut fault) = self.fault.lock() {
            fault.get_or_insert_with(|| message.into());
        }
    }

    fn drain(&self) -> Vec<f32> {
        self.samples
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|mut fault| fault.take())
    }
}

/// Audio source opened on the capture thread
pub trait AudioInput: Send + Sync {
    /// Start streaming into `feed`
    ///
    /// The returned guard keeps the stream alive; dropping it ends capture.
    ///
    /// # Errors
    ///
    /// Returns the capture fault when the input cannot be opened
    fn open(&self, feed: InputFeed) -> std::result::Result<Box<dyn Any>, CaptureError>;
}

/// The host's default input device
pub struct DefaultInput;

impl AudioInput for DefaultInput {
    fn open(&self, feed: InputFeed) -> std::result::Result<Box<dyn Any>, CaptureError> {
        let stream = open_input(feed)?;
        Ok(Box::new(stream))
    }
}

#[derive(Default)]
struct Shared {
    listening: bool,
    /// Bumped on every start and stop; a worker from an older run is stale
    generation: u64,
    /// Bumped on every start, stop and reset; transcripts from older epochs are dropped
    epoch: u64,
    stop: Option<Arc<AtomicBool>>,
    buffer: TranscriptBuffer,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Capture source backed by an audio input and a transcriber
pub struct MicCapture {
    input: Arc<dyn AudioInput>,
    stt: Arc<dyn Transcriber>,
    runtime: Handle,
    events: broadcast::Sender<CaptureEvent>,
    shared: Arc<Mutex<Shared>>,
    settings: SegmenterSettings,
    supported: bool,
}

impl MicCapture {
    /// Create a capture source on the default input device
    ///
    /// Transcription runs on `runtime`. Capture is unsupported when the host
    /// has no input device.
    #[must_use]
    pub fn new(stt: SpeechToText, runtime: Handle) -> Self {
        let supported = cpal::default_host().default_input_device().is_some();
        if !supported {
            tracing::warn!("no input device available, speech capture disabled");
        }

        Self::build(Arc::new(DefaultInput), Arc::new(stt), runtime, supported)
    }

    /// Create a capture source over any input and transcriber
    #[must_use]
    pub fn with_input(
        input: Arc<dyn AudioInput>,
        stt: Arc<dyn Transcriber>,
        runtime: Handle,
    ) -> Self {
        Self::build(input, stt, runtime, true)
    }

    fn build(
        input: Arc<dyn AudioInput>,
        stt: Arc<dyn Transcriber>,
        runtime: Handle,
        supported: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            input,
            stt,
            runtime,
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
            settings: SegmenterSettings::default(),
            supported,
        }
    }

    /// Override segmentation thresholds
    #[must_use]
    pub fn with_settings(mut self, settings: SegmenterSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl CaptureSource for MicCapture {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn state(&self) -> CaptureState {
        if lock(&self.shared).listening {
            CaptureState::Listening
        } else {
            CaptureState::Idle
        }
    }

    fn start(&self) {
        if !self.supported {
            return;
        }

        let mut shared = lock(&self.shared);
        if shared.listening {
            return;
        }

        shared.generation += 1;
        shared.epoch += 1;
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            settings: self.settings,
            generation: shared.generation,
            stop: Arc::clone(&stop),
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            input: Arc::clone(&self.input),
            stt: Arc::clone(&self.stt),
            runtime: self.runtime.clone(),
        };

        match std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || worker.run())
        {
            Ok(_) => {
                shared.listening = true;
                shared.stop = Some(stop);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn capture thread");
                let _ = self
                    .events
                    .send(CaptureEvent::Fault(CaptureError::Engine(e.to_string())));
            }
        }
    }

    fn stop(&self) {
        let mut shared = lock(&self.shared);
        if let Some(stop) = shared.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        shared.epoch += 1;
        if shared.listening {
            shared.listening = false;
            shared.generation += 1;
            tracing::debug!("capture stop requested");
        }
    }

    fn reset(&self) {
        let mut shared = lock(&self.shared);
        shared.epoch += 1;
        shared.buffer.reset();
    }

    fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        if let Some(stop) = lock(&self.shared).stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

/// One listening run on the capture thread
struct Worker {
    settings: SegmenterSettings,
    generation: u64,
    stop: Arc<AtomicBool>,
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<CaptureEvent>,
    input: Arc<dyn AudioInput>,
    stt: Arc<dyn Transcriber>,
    runtime: Handle,
}

impl Worker {
    fn run(self) {
        let feed = InputFeed::default();
        let stream = match self.input.open(feed.clone()) {
            Ok(stream) => stream,
            Err(fault) => {
                tracing::error!(error = %fault, "failed to open input stream");
                self.finish(Some(fault));
                return;
            }
        };

        tracing::debug!("audio capture started");
        let _ = self.events.send(CaptureEvent::Started);

        let mut segmenter = UtteranceSegmenter::with_settings(self.settings);
        let mut fault = None;
        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);
            if let Some(message) = feed.take_fault() {
                tracing::error!(error = %message, "audio capture stream failed");
                fault = Some(CaptureError::Engine(message));
                break;
            }
            if let Some(segment) = segmenter.process(&feed.drain()) {
                self.transcribe(&segment);
            }
        }

        drop(stream);
        tracing::debug!("audio capture stopped");
        self.finish(fault);
    }

    fn transcribe(&self, segment: &[f32]) {
        let wav = match samples_to_wav(segment, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                return;
            }
        };

        let epoch = lock(&self.shared).epoch;
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let stt = Arc::clone(&self.stt);

        self.runtime.spawn(async move {
            let outcome = stt.transcribe(&wav).await;

            let produced = {
                let mut shared = lock(&shared);
                if shared.epoch != epoch {
                    tracing::debug!("discarding transcript from stopped or reset capture");
                    return;
                }
                match outcome {
                    Ok(text) => shared.buffer.ingest(&[Hypothesis::settled(text)]),
                    Err(e) => vec![CaptureEvent::Fault(CaptureError::Engine(e.to_string()))],
                }
            };

            for event in produced {
                let _ = events.send(event);
            }
        });
    }

    fn finish(&self, fault: Option<CaptureError>) {
        let current = {
            let mut shared = lock(&self.shared);
            let current = shared.generation == self.generation;
            if current {
                shared.listening = false;
                shared.stop = None;
            }
            current
        };

        if let Some(fault) = fault.filter(|_| current) {
            let _ = self.events.send(CaptureEvent::Fault(fault));
        }
        let _ = self.events.send(CaptureEvent::Ended);
    }
}

/// Open the default input device and stream samples into `feed`
///
/// Failing to open the device is terminal: a missing device or format is
/// unsupported, anything else is treated as refused access. Errors on the
/// running stream are reported through the feed.
fn open_input(feed: InputFeed) -> std::result::Result<Stream, CaptureError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(CaptureError::Unsupported)?;

    let config = device
        .supported_input_configs()
        .map_err(|_| CaptureError::PermissionDenied)?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or(CaptureError::Unsupported)?
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let faults = feed.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| feed.push(data),
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                faults.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable
            | cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::Unsupported,
            _ => CaptureError::PermissionDenied,
        })?;

    stream
        .play()
        .map_err(|e| CaptureError::Engine(e.to_string()))?;

    Ok(stream)
}

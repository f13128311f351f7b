//! Text-to-speech synthesis
//!
//! Three backends: a synthesis endpoint speaking the
//! `{ text, voiceId, style }` protocol (such as `tutor serve`), Google Cloud
//! Text-to-Speech, and `OpenAI` speech. All return MP3 bytes.

use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::catalog::{self, VoiceInfo};
use super::playback::SpeakingStyle;
use crate::{Error, Result};

/// Voice used when a request names none
pub const DEFAULT_VOICE_ID: &str = "en-US-Wavenet-D";

fn default_voice_id() -> String {
    DEFAULT_VOICE_ID.to_string()
}

/// Synthesis endpoint request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default)]
    pub style: SpeakingStyle,
}

/// SSML gender Google expects for a Wavenet voice id
#[must_use]
pub fn ssml_gender(voice_id: &str) -> &'static str {
    const FEMALE_SUFFIXES: [&str; 6] = [
        "Wavenet-A",
        "Wavenet-C",
        "Wavenet-E",
        "Wavenet-F",
        "Wavenet-G",
        "Wavenet-H",
    ];

    if voice_id.contains("female") || FEMALE_SUFFIXES.iter().any(|s| voice_id.contains(s)) {
        "FEMALE"
    } else {
        "MALE"
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleRequest<'a> {
    input: GoogleInput<'a>,
    voice: GoogleVoice<'a>,
    audio_config: GoogleAudioConfig,
}

#[derive(Serialize)]
struct GoogleInput<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleVoice<'a> {
    language_code: &'static str,
    name: &'a str,
    ssml_gender: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f64,
    pitch: f64,
    volume_gain_db: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleResponse {
    #[serde(default)]
    audio_content: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f64,
}

/// Synthesis backend
#[derive(Debug, Clone)]
enum TtsBackend {
    Endpoint { url: String },
    Google { api_key: String },
    OpenAi { api_key: String, model: String },
}

/// Synthesizes speech from text
pub struct SpeechSynthesizer {
    client: reqwest::Client,
    backend: TtsBackend,
}

impl SpeechSynthesizer {
    fn with_backend(backend: TtsBackend) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, backend })
    }

    /// Synthesize through a `{ text, voiceId, style }` endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty or the HTTP client cannot be built
    pub fn endpoint(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::Config("TTS endpoint URL required".to_string()));
        }
        Self::with_backend(TtsBackend::Endpoint { url })
    }

    /// Synthesize with Google Cloud Text-to-Speech
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn google(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "Google Cloud API key required for TTS".to_string(),
            ));
        }
        Self::with_backend(TtsBackend::Google { api_key })
    }

    /// Synthesize with `OpenAI` speech
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn openai(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }
        Self::with_backend(TtsBackend::OpenAi { api_key, model })
    }

    /// Voices this backend understands
    #[must_use]
    pub const fn catalog(&self) -> &'static [VoiceInfo] {
        match self.backend {
            TtsBackend::Endpoint { .. } | TtsBackend::Google { .. } => catalog::GOOGLE_WAVENET,
            TtsBackend::OpenAi { .. } => catalog::OPENAI,
        }
    }

    /// Synthesize `text` with a backend voice id
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        style: SpeakingStyle,
    ) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(Error::Tts("empty text".to_string()));
        }

        let response = match &self.backend {
            TtsBackend::Endpoint { url } => {
                self.client
                    .post(url)
                    .json(&SynthesisRequest {
                        text: text.to_string(),
                        voice_id: voice_id.to_string(),
                        style,
                    })
                    .send()
                    .await?
            }
            TtsBackend::Google { api_key } => {
                self.client
                    .post("https://texttospeech.googleapis.com/v1/text:synthesize")
                    .query(&[("key", api_key)])
                    .json(&GoogleRequest {
                        input: GoogleInput { text },
                        voice: GoogleVoice {
                            language_code: "en-US",
                            name: voice_id,
                            ssml_gender: ssml_gender(voice_id),
                        },
                        audio_config: GoogleAudioConfig {
                            audio_encoding: "MP3",
                            speaking_rate: style.rate(),
                            pitch: 0.0,
                            volume_gain_db: 0.0,
                        },
                    })
                    .send()
                    .await?
            }
            TtsBackend::OpenAi { api_key, model } => {
                self.client
                    .post("https://api.openai.com/v1/audio/speech")
                    .bearer_auth(api_key)
                    .json(&OpenAiRequest {
                        model,
                        input: text,
                        voice: voice_id,
                        speed: style.rate(),
                    })
                    .send()
                    .await?
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = match self.backend {
            TtsBackend::Google { .. } => {
                let body: GoogleResponse = response.json().await?;
                base64::engine::general_purpose::STANDARD
                    .decode(body.audio_content)
                    .map_err(|e| Error::Tts(format!("invalid audio content: {e}")))?
            }
            _ => response.bytes().await?.to_vec(),
        };

        if audio.is_empty() {
            return Err(Error::Tts("no audio content received".to_string()));
        }

        tracing::debug!(bytes = audio.len(), voice = voice_id, "synthesized speech");
        Ok(audio)
    }
}

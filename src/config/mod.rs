//! Configuration management for the voice tutor
//!
//! Precedence: environment variables, then the TOML file, then defaults.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::GeminiSettings;
use crate::voice::{SegmenterSettings, SpeakingStyle, SttProvider};
use crate::{Error, Result};

use file::TutorConfigFile;

/// Voice tutor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Turn generation configuration
    pub turn: TurnConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// HTTP API server configuration
    pub server: ServerConfig,
}

/// Which turn generator a live session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnProvider {
    /// Call Gemini directly
    #[default]
    Gemini,
    /// Call a `/api/turn` endpoint
    Http,
}

impl TurnProvider {
    fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "http" => Ok(Self::Http),
            other => Err(Error::Config(format!("unknown turn provider: {other}"))),
        }
    }
}

/// Turn generation configuration
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub provider: TurnProvider,

    /// Turn endpoint for the http provider
    pub endpoint: String,

    /// Gemini request settings
    pub gemini: GeminiSettings,

    /// Keep only the last N transcript entries in http requests
    pub history_window: Option<usize>,

    /// Answer the opening request with a fixed greeting
    pub scripted_greeting: bool,
}

/// Which synthesis backend the speaker uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// `{ text, voiceId, style }` endpoint
    #[default]
    Http,
    /// `OpenAI` speech
    OpenAi,
}

impl TtsProvider {
    fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub tts_provider: TtsProvider,

    /// Synthesis endpoint for the http provider
    pub tts_endpoint: String,

    /// TTS model for the openai provider
    pub tts_model: String,

    pub speaking_style: SpeakingStyle,

    pub stt_provider: SttProvider,

    pub stt_model: String,

    pub playback_watchdog: Duration,

    pub segmenter: SegmenterSettings,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub gemini: Option<String>,
    pub google_tts: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
}

/// Default HTTP API port
pub const DEFAULT_PORT: u16 = 3000;

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// # Errors
    ///
    /// Returns error if a provider or style name is invalid
    pub fn load() -> Result<Self> {
        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())?;

        // Ensure data dir exists
        std::fs::create_dir_all(&config.data_dir).ok();

        Ok(config)
    }

    /// Build configuration from a parsed config file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is invalid
    pub fn from_sources(
        fc: TutorConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let parse_env = |key: &str| env(key).and_then(|v| v.trim().parse::<f64>().ok());

        // Turn generation (env > toml > default)
        let gemini_defaults = GeminiSettings::default();
        let turn = TurnConfig {
            provider: env("TUTOR_TURN_PROVIDER")
                .or(fc.turn.provider)
                .map_or(Ok(TurnProvider::default()), |name| TurnProvider::parse(&name))?,
            endpoint: env("TUTOR_TURN_ENDPOINT")
                .or(fc.turn.endpoint)
                .unwrap_or_else(|| format!("http://localhost:{DEFAULT_PORT}/api/turn")),
            gemini: GeminiSettings {
                model: env("TUTOR_MODEL")
                    .or(fc.turn.model)
                    .unwrap_or(gemini_defaults.model),
                max_output_tokens: fc
                    .turn
                    .max_output_tokens
                    .unwrap_or(gemini_defaults.max_output_tokens),
                temperature: fc
                    .turn
                    .temperature
                    .unwrap_or(gemini_defaults.temperature),
                timeout: fc
                    .turn
                    .timeout_secs
                    .map_or(gemini_defaults.timeout, Duration::from_secs),
            },
            history_window: fc.turn.history_window,
            scripted_greeting: env("TUTOR_SCRIPTED_GREETING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.turn.scripted_greeting)
                .unwrap_or(true),
        };

        // Voice (env > toml > default)
        let stt_provider = env("TUTOR_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map_or(Ok(SttProvider::default()), |name| SttProvider::parse(&name))?;
        let segmenter_defaults = SegmenterSettings::default();
        #[allow(clippy::cast_possible_truncation)]
        let voice = VoiceConfig {
            tts_provider: env("TUTOR_TTS_PROVIDER")
                .or(fc.voice.tts_provider)
                .map_or(Ok(TtsProvider::default()), |name| TtsProvider::parse(&name))?,
            tts_endpoint: env("TUTOR_TTS_ENDPOINT")
                .or(fc.voice.tts_endpoint)
                .unwrap_or_else(|| format!("http://localhost:{DEFAULT_PORT}/api/tts")),
            tts_model: env("TUTOR_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            speaking_style: env("TUTOR_SPEAKING_STYLE")
                .or(fc.voice.speaking_style)
                .map(|s| SpeakingStyle::parse_lenient(&s))
                .unwrap_or_default(),
            stt_provider,
            stt_model: env("TUTOR_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| stt_provider.default_model().to_string()),
            playback_watchdog: fc
                .voice
                .playback_watchdog_secs
                .filter(|s| *s > 0)
                .map_or(crate::voice::PLAYBACK_WATCHDOG, Duration::from_secs),
            segmenter: SegmenterSettings {
                energy_threshold: parse_env("TUTOR_ENERGY_THRESHOLD")
                    .map(|v| v as f32)
                    .or(fc.voice.energy_threshold)
                    .unwrap_or(segmenter_defaults.energy_threshold),
                silence: fc
                    .voice
                    .silence_secs
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .map_or(segmenter_defaults.silence, Duration::from_secs_f32),
            },
        };

        let api_keys = ApiKeys {
            gemini: env("GEMINI_API_KEY").or(fc.api_keys.gemini),
            google_tts: env("GOOGLE_CLOUD_API_KEY").or(fc.api_keys.google_tts),
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
        };

        let server = ServerConfig {
            port: env("TUTOR_PORT")
                .or_else(|| env("PORT"))
                .and_then(|p| p.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        // Determine data directory (~/.local/share/voice-tutor on Linux)
        let data_dir = env("TUTOR_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("voice-tutor"))
            });

        Ok(Self {
            data_dir,
            turn,
            voice,
            api_keys,
            server,
        })
    }

    /// Path of the session history database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("tutor.db")
    }

    /// API key for the configured speech-to-text provider
    #[must_use]
    pub fn stt_api_key(&self) -> Option<&str> {
        match self.voice.stt_provider {
            SttProvider::Whisper => self.api_keys.openai.as_deref(),
            SttProvider::Deepgram => self.api_keys.deepgram.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(TutorConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.turn.provider, TurnProvider::Gemini);
        assert_eq!(config.turn.gemini.model, "gemini-2.5-flash-lite");
        assert_eq!(config.turn.gemini.max_output_tokens, 150);
        assert!(config.turn.scripted_greeting);
        assert_eq!(config.voice.tts_provider, TtsProvider::Http);
        assert_eq!(config.voice.speaking_style, SpeakingStyle::Neutral);
        assert_eq!(config.voice.playback_watchdog, Duration::from_secs(15));
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.api_keys.gemini.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config(
            r#"
            [turn]
            provider = "gemini"

            [server]
            port = 8080

            [api_keys]
            gemini = "from-file"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[("TUTOR_TURN_PROVIDER", "http"), ("GEMINI_API_KEY", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.turn.provider, TurnProvider::Http);
        assert_eq!(config.api_keys.gemini.as_deref(), Some("from-env"));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn zero_durations_fall_back_to_defaults() {
        let fc = file::parse_config(
            r#"
            [voice]
            playback_watchdog_secs = 0
            silence_secs = 0.0
            "#,
        )
        .unwrap();

        let config = Config::from_sources(fc, env_from(&[])).unwrap();

        assert_eq!(config.voice.playback_watchdog, Duration::from_secs(15));
        assert_eq!(
            config.voice.segmenter.silence,
            SegmenterSettings::default().silence
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = Config::from_sources(
            TutorConfigFile::default(),
            env_from(&[("TUTOR_TTS_PROVIDER", "espeak")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn stt_key_follows_provider() {
        let config = Config::from_sources(
            TutorConfigFile::default(),
            env_from(&[
                ("TUTOR_STT_PROVIDER", "deepgram"),
                ("DEEPGRAM_API_KEY", "dg"),
                ("OPENAI_API_KEY", "oa"),
            ]),
        )
        .unwrap();

        assert_eq!(config.stt_api_key(), Some("dg"));
        assert_eq!(config.voice.stt_model, "nova-2");
    }
}

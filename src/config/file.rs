//! TOML configuration file loading
//!
//! Supports `~/.config/voice-tutor/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TutorConfigFile {
    /// Data directory override (database)
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Turn generation configuration
    #[serde(default)]
    pub turn: TurnFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Turn generation configuration
#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    /// "gemini" or "http"
    pub provider: Option<String>,

    /// Turn endpoint URL for the http provider
    pub endpoint: Option<String>,

    /// Gemini model identifier (e.g. "gemini-2.5-flash-lite")
    pub model: Option<String>,

    pub max_output_tokens: Option<u32>,

    pub temperature: Option<f32>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Keep only the last N transcript entries in requests
    pub history_window: Option<usize>,

    /// Answer the opening request locally with a fixed greeting
    pub scripted_greeting: Option<bool>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "http" or "openai"
    pub tts_provider: Option<String>,

    /// Synthesis endpoint URL for the http provider
    pub tts_endpoint: Option<String>,

    /// TTS model for the openai provider (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// "neutral", "fast" or "slow"
    pub speaking_style: Option<String>,

    /// "whisper" or "deepgram"
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    pub playback_watchdog_secs: Option<u64>,

    /// RMS energy above which audio counts as speech
    pub energy_threshold: Option<f32>,

    /// Trailing silence that ends an utterance
    pub silence_secs: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub google_tts: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TutorConfigFile {
    let Some(path) = config_file_path() else {
        return TutorConfigFile::default();
    };

    if !path.exists() {
        return TutorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TutorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TutorConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config(content: &str) -> crate::Result<TutorConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/voice-tutor/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-tutor").join("config.toml"))
}

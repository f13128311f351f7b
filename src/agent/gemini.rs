//! Gemini `generateContent` backend

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationError, TurnGenerator, WireMessage, sanitize_reply};
use crate::session::{Role, SessionConfig, TranscriptEntry, prompt};
use crate::{Error, Result};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Generation parameters for Gemini
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    /// Model identifier
    pub model: String,
    /// Cap on reply length
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-lite".to_string(),
            max_output_tokens: 150,
            temperature: 0.7,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: [SafetySetting; 2],
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

const fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

/// Client for the Gemini chat API
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    settings: GeminiSettings,
}

impl GeminiClient {
    /// Create a Gemini client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, settings: GeminiSettings) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    /// Run one chat completion and return the sanitized reply
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or Gemini returns no text
    pub async fn complete(
        &self,
        system_prompt: &str,
        history: &[WireMessage],
        message: &str,
    ) -> std::result::Result<String, GenerationError> {
        let mut contents: Vec<Content<'_>> = history
            .iter()
            .map(|m| Content {
                role: Some(gemini_role(m.role)),
                parts: [Part { text: &m.content }],
            })
            .collect();
        contents.push(Content {
            role: Some("user"),
            parts: [Part { text: message }],
        });

        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: system_prompt,
                }],
            },
            contents,
            generation_config: GenerationConfig {
                max_output_tokens: self.settings.max_output_tokens,
                temperature: self.settings.temperature,
            },
            safety_settings: [
                SafetySetting {
                    category: "HARM_CATEGORY_HARASSMENT",
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                },
                SafetySetting {
                    category: "HARM_CATEGORY_HATE_SPEECH",
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                },
            ],
        };

        let url = format!("{API_BASE}/{}:generateContent", self.settings.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Gemini request failed");
                GenerationError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Gemini API error");
            return Err(GenerationError::Service {
                status: status.as_u16(),
                message: body,
            });
        }

        let result: GenerateResponse = response.json().await?;
        let text: String = result
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        let reply = sanitize_reply(&text);
        if reply.is_empty() {
            return Err(GenerationError::EmptyReply);
        }

        tracing::debug!(reply_len = reply.len(), "Gemini responded");
        Ok(reply)
    }
}

#[async_trait]
impl TurnGenerator for GeminiClient {
    async fn generate_reply(
        &self,
        history: &[TranscriptEntry],
        utterance: &str,
        config: &SessionConfig,
    ) -> std::result::Result<String, GenerationError> {
        let history: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
        self.complete(&prompt::system_prompt(config), &history, utterance)
            .await
    }
}

//! Vision API client for scene description
//!
//! One client, three backends. Each backend gets the image inline as base64
//! together with the prompt and returns plain text.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::collab::VisionAnalyzer;
use crate::intent::BackendId;
use crate::{Error, Result};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Request timeout; a stale description is useless to a walking user
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Max tokens for a description
const MAX_TOKENS: u32 = 400;

/// API keys per backend
#[derive(Debug, Clone, Default)]
pub struct VisionKeys {
    /// Google AI Studio key
    pub gemini: Option<SecretString>,
    /// `OpenAI` key
    pub openai: Option<SecretString>,
    /// Anthropic key
    pub anthropic: Option<SecretString>,
}

/// Model identifiers per backend
#[derive(Debug, Clone)]
pub struct VisionModels {
    /// Gemini model
    pub gemini: String,
    /// `OpenAI` model
    pub openai: String,
    /// Claude model
    pub claude: String,
}

impl Default for VisionModels {
    fn default() -> Self {
        Self {
            gemini: "gemini-2.0-flash".to_string(),
            openai: "gpt-4o-mini".to_string(),
            claude: "claude-sonnet-4-20250514".to_string(),
        }
    }
}

/// Vision client dispatching to the selected backend
pub struct VisionClient {
    client: reqwest::Client,
    keys: VisionKeys,
    models: VisionModels,
}

// --- Anthropic ---

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ClaudeMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
    role: &'a str,
    content: Vec<ClaudeBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ClaudeBlock<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image")]
    Image { source: ClaudeImage<'a> },
}

#[derive(Debug, Serialize)]
struct ClaudeImage<'a> {
    #[serde(rename = "type")]
    source_type: &'a str,
    media_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponseBlock {
    text: Option<String>,
}

// --- OpenAI ---

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: Vec<OpenAiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAiPart<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

// --- Gemini ---

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    Inline { inline_data: GeminiInlineData<'a> },
}

#[derive(Debug, Serialize)]
struct GeminiInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl VisionClient {
    /// Create a vision client
    ///
    /// # Errors
    ///
    /// Returns error if no backend has an API key or the HTTP client fails
    pub fn new(keys: VisionKeys, models: VisionModels) -> Result<Self> {
        if keys.gemini.is_none() && keys.openai.is_none() && keys.anthropic.is_none() {
            return Err(Error::Config(
                "at least one of GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY is required"
                    .to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            keys,
            models,
        })
    }

    /// Backends with an API key configured
    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendId> {
        BackendId::ALL
            .into_iter()
            .filter(|b| self.key_for(*b).is_some())
            .collect()
    }

    fn key_for(&self, backend: BackendId) -> Option<&str> {
        let key = match backend {
            BackendId::Gemini => self.keys.gemini.as_ref(),
            BackendId::OpenAi => self.keys.openai.as_ref(),
            BackendId::Claude => self.keys.anthropic.as_ref(),
        };
        key.map(ExposeSecret::expose_secret).filter(|k| !k.is_empty())
    }

    async fn describe_claude(&self, key: &str, image: &[u8], prompt: &str) -> Result<String> {
        let request = ClaudeRequest {
            model: &self.models.claude,
            max_tokens: MAX_TOKENS,
            messages: vec![ClaudeMessage {
                role: "user",
                content: vec![
                    ClaudeBlock::Image {
                        source: ClaudeImage {
                            source_type: "base64",
                            media_type: sniff_mime_type(image),
                            data: encode(image),
                        },
                    },
                    ClaudeBlock::Text { text: prompt },
                ],
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("claude request failed: {e}")))?;

        let result: ClaudeResponse = parse(response, BackendId::Claude).await?;
        Ok(result
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn describe_openai(&self, key: &str, image: &[u8], prompt: &str) -> Result<String> {
        let url = format!("data:{};base64,{}", sniff_mime_type(image), encode(image));
        let request = OpenAiRequest {
            model: &self.models.openai,
            max_tokens: MAX_TOKENS,
            messages: vec![OpenAiMessage {
                role: "user",
                content: vec![
                    OpenAiPart::Text { text: prompt },
                    OpenAiPart::ImageUrl {
                        image_url: OpenAiImageUrl { url },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {key}"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("openai request failed: {e}")))?;

        let result: OpenAiResponse = parse(response, BackendId::OpenAi).await?;
        Ok(result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn describe_gemini(&self, key: &str, image: &[u8], prompt: &str) -> Result<String> {
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.models.gemini);
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text { text: prompt },
                    GeminiPart::Inline {
                        inline_data: GeminiInlineData {
                            mime_type: sniff_mime_type(image),
                            data: encode(image),
                        },
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("gemini request failed: {e}")))?;

        let result: GeminiResponse = parse(response, BackendId::Gemini).await?;
        Ok(result
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<String>())
    }
}

#[async_trait]
impl VisionAnalyzer for VisionClient {
    async fn analyze(&self, image: &[u8], prompt: &str, backend: BackendId) -> Result<String> {
        let key = self
            .key_for(backend)
            .ok_or_else(|| Error::Backend(format!("no API key configured for {backend}")))?;

        tracing::debug!(%backend, image_bytes = image.len(), "requesting scene description");

        let description = match backend {
            BackendId::Gemini => self.describe_gemini(key, image, prompt).await?,
            BackendId::OpenAi => self.describe_openai(key, image, prompt).await?,
            BackendId::Claude => self.describe_claude(key, image, prompt).await?,
        };

        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(Error::Backend(format!("empty response from {backend}")));
        }

        tracing::debug!(%backend, description = %description, "scene described");
        Ok(description)
    }
}

/// Check status and decode a backend response
async fn parse<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    backend: BackendId,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%backend, status = %status, body = %body, "vision API error");
        return Err(Error::Backend(format!("{backend} API error {status}: {body}")));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Backend(format!("{backend} parse error: {e}")))
}

fn encode(image: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(image)
}

/// Guess the MIME type from magic bytes; JPEG when unknown
#[must_use]
pub fn sniff_mime_type(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.starts_with(b"GIF8") {
        "image/gif"
    } else if image.len() >= 12 && &image[0..4] == b"RIFF" && &image[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

use serde::Serialize;

use super::TurnModel;
use crate::config::GeminiConfig;
use crate::error::RelayError;

/// Location of the reply text inside a `generateContent` response.
const REPLY_TEXT_POINTER: &str = "/candidates/0/content/parts/0/text";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// Single-shot client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    /// Returns `None` when no API key is configured.
    pub fn from_config(cfg: &GeminiConfig, client: reqwest::Client) -> Option<Self> {
        if cfg.api_key.is_empty() {
            return None;
        }
        Some(Self {
            client,
            model: cfg.model.clone(),
            url: format!("{}/models/{}:generateContent", cfg.api_url, cfg.model),
            api_key: cfg.api_key.clone(),
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
        })
    }

    fn render_body<'a>(&self, prompt: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        }
    }
}

/// Pulls the first candidate's first text part out of a raw response body.
/// Bodies that are not JSON, or lack the path, yield an empty string.
pub fn extract_reply_text(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|val| {
            val.pointer(REPLY_TEXT_POINTER)
                .and_then(|t| t.as_str())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl TurnModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, RelayError> {
        let resp = self
            .client
            .post(&self.url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.render_body(prompt))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            tracing::warn!(model = %self.model, status = status.as_u16(), "gemini returned non-success status");
        }
        Ok(extract_reply_text(&body))
    }
}

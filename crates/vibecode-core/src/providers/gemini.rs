//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborator::{CodeGenerator, CorrectionRequest, GeneratedProject, GenerationRequest};

use super::prompt::{self, Persona};
use super::response::parse_project;
use super::ProviderError;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Gemini connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    /// Base URL, without the `/v1beta/...` path.
    pub endpoint: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Per-request timeout.
    pub timeout_ms: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: 0.7,
            max_output_tokens: 8192,
            timeout_ms: 60_000,
        }
    }

    /// Read `GEMINI_API_KEY` (required), `GEMINI_MODEL` and `GEMINI_ENDPOINT`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingCredentials("GEMINI_API_KEY not set".into()))?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Ok(endpoint) = std::env::var("GEMINI_ENDPOINT") {
            config.endpoint = endpoint;
        }
        Ok(config)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// [`CodeGenerator`] backed by the Gemini REST API.
pub struct GeminiClient {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("vibecode/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(GeminiConfig::from_env()?)
    }

    /// Send one prompt and return the concatenated candidate text.
    async fn complete(&self, persona: Persona, prompt: &str) -> Result<String, ProviderError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: persona.system_prompt(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        debug!(
            model = %self.config.model,
            persona = %persona,
            prompt_len = prompt.len(),
            "gemini request"
        );
        let response = self
            .http_client
            .post(self.config.url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unusable(format!("malformed response body: {e}")))?;
        extract_text(parsed)
    }

    fn map_transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                ms: self.config.timeout_ms,
            }
        } else {
            err.into()
        }
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, ProviderError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(ProviderError::Unusable("no candidates returned".into()));
    };
    if let Some(reason) = candidate.finish_reason.as_deref() {
        if matches!(reason, "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT") {
            return Err(ProviderError::Unusable(format!("generation blocked: {reason}")));
        }
    }
    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::Unusable("empty candidate text".into()));
    }
    Ok(text)
}

#[async_trait]
impl CodeGenerator for GeminiClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedProject, ProviderError> {
        let text = self
            .complete(request.persona, &prompt::generation_prompt(request))
            .await?;
        parse_project(&text, None)
    }

    async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<GeneratedProject, ProviderError> {
        let text = self
            .complete(request.persona, &prompt::correction_prompt(request))
            .await?;
        let single = match request.artifact.files.as_slice() {
            [only] => Some(only.path.as_str()),
            _ => None,
        };
        parse_project(&text, single)
    }
}

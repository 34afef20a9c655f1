//! Language model provider integrations used for SQL generation.
//!
//! All providers sit behind the [`LanguageModel`] trait: a prompt goes in,
//! generated text comes out. Requests are sent once; a failed generation is
//! reported to the caller rather than retried.
//!
//! # Supported Providers
//!
//! | Provider | Endpoint | Authentication |
//! |----------|----------|----------------|
//! | Gemini | `generativelanguage.googleapis.com` | x-goog-api-key header |
//! | OpenAI | `api.openai.com` | Bearer token |
//! | Anthropic | `api.anthropic.com` | x-api-key header |
//! | Ollama | Local (configurable) | None |
//!
//! # Example
//!
//! ```
//! use sql_query_assistant::llm::{LlmClient, LlmProvider};
//!
//! let provider = LlmProvider::Ollama {
//!     base_url: "http://localhost:11434".into(),
//!     model:    "llama3.2".into()
//! };
//!
//! let client = LlmClient::new(provider);
//! assert_eq!(client.provider().name(), "ollama");
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QueryError, describe_http_error};

/// Text generation capability consumed by the translator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for `prompt`
    async fn generate(&self, prompt: &str) -> Result<String, QueryError>;
}

/// Stand-in used when no provider credentials are configured.
///
/// Every call fails with [`QueryError::NotConfigured`], so the service keeps
/// running and only the query endpoints degrade.
#[derive(Debug, Clone)]
pub struct UnconfiguredModel {
    credential: String
}

impl UnconfiguredModel {
    /// `credential` names the missing setting in the error detail
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into()
        }
    }
}

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    async fn generate(&self, _prompt: &str) -> Result<String, QueryError> {
        Err(QueryError::NotConfigured(self.credential.clone()))
    }
}

/// LLM provider configuration with authentication credentials.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Google Gemini API
    Gemini {
        /// API key
        api_key: String,
        /// Model identifier (e.g., "gemini-pro-latest")
        model:   String
    },
    /// OpenAI API (GPT-4, GPT-3.5, etc.)
    OpenAI {
        /// API key (sk-...)
        api_key: String,
        /// Model identifier (e.g., "gpt-4", "gpt-3.5-turbo")
        model:   String
    },
    /// Anthropic API (Claude models)
    Anthropic {
        /// API key
        api_key: String,
        /// Model identifier (e.g., "claude-sonnet-4-20250514")
        model:   String
    },
    /// Local Ollama instance
    Ollama {
        /// Base URL (e.g., "http://localhost:11434")
        base_url: String,
        /// Model name (e.g., "llama3.2", "codellama")
        model:    String
    }
}

impl LlmProvider {
    /// Short provider name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini {
                ..
            } => "gemini",
            Self::OpenAI {
                ..
            } => "openai",
            Self::Anthropic {
                ..
            } => "anthropic",
            Self::Ollama {
                ..
            } => "ollama"
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Gemini {
                model, ..
            }
            | Self::OpenAI {
                model, ..
            }
            | Self::Anthropic {
                model, ..
            }
            | Self::Ollama {
                model, ..
            } => model
        }
    }
}

/// HTTP client for LLM API communication.
///
/// Handles provider-specific request formatting and response parsing.
pub struct LlmClient {
    provider: LlmProvider,
    client:   reqwest::Client,
    api_base: Option<String>
}

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const OPENAI_API_BASE: &str = "https://api.openai.com";
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent
}

#[derive(Serialize)]
struct OpenAIRequest {
    model:    String,
    messages: Vec<OpenAIRequestMessage>
}

#[derive(Serialize)]
struct OpenAIRequestMessage {
    role:    String,
    content: String
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: String
}

#[derive(Serialize)]
struct AnthropicRequest {
    model:      String,
    max_tokens: u32,
    messages:   Vec<AnthropicMessage>
}

#[derive(Serialize)]
struct AnthropicMessage {
    role:    String,
    content: String
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: String
}

#[derive(Serialize)]
struct OllamaRequest {
    model:  String,
    prompt: String,
    stream: bool
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String
}

impl LlmClient {
    /// Create new LLM client
    pub fn new(provider: LlmProvider) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            provider,
            client,
            api_base: None
        }
    }

    /// Send hosted-provider requests to `base` (a proxy or compatible
    /// gateway) instead of the vendor endpoint. Ollama keeps its own URL.
    pub fn with_api_base(mut self, base: Option<String>) -> Self {
        self.api_base = base.filter(|b| !b.trim().is_empty());
        self
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    fn endpoint(&self, default_base: &str, path: &str) -> String {
        let base = self.api_base.as_deref().unwrap_or(default_base);
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    async fn call_provider(&self, prompt: &str) -> Result<String, QueryError> {
        match &self.provider {
            LlmProvider::Gemini {
                api_key,
                model
            } => self.call_gemini(api_key, model, prompt).await,
            LlmProvider::OpenAI {
                api_key,
                model
            } => self.call_openai(api_key, model, prompt).await,
            LlmProvider::Anthropic {
                api_key,
                model
            } => self.call_anthropic(api_key, model, prompt).await,
            LlmProvider::Ollama {
                base_url,
                model
            } => self.call_ollama(base_url, model, prompt).await
        }
    }

    async fn call_gemini(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, QueryError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string()
                }]
            }]
        };
        let url = self.endpoint(
            GEMINI_API_BASE,
            &format!("/v1beta/models/{}:generateContent", model)
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success("Gemini", response).await?;
        let result: GeminiResponse = response.json().await.map_err(transport_error)?;
        result
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect::<String>())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| QueryError::Translation("Empty response from Gemini".into()))
    }

    async fn call_openai(&self, api_key: &str, model: &str, prompt: &str) -> Result<String, QueryError> {
        let request = OpenAIRequest {
            model:    model.to_string(),
            messages: vec![OpenAIRequestMessage {
                role:    String::from("user"),
                content: prompt.to_string()
            }]
        };
        let response = self
            .client
            .post(self.endpoint(OPENAI_API_BASE, "/v1/chat/completions"))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success("OpenAI", response).await?;
        let result: OpenAIResponse = response.json().await.map_err(transport_error)?;
        result
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| QueryError::Translation("Empty response from OpenAI".into()))
    }

    async fn call_anthropic(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str
    ) -> Result<String, QueryError> {
        let request = AnthropicRequest {
            model:      model.to_string(),
            max_tokens: 1024,
            messages:   vec![AnthropicMessage {
                role:    String::from("user"),
                content: prompt.to_string()
            }]
        };
        let response = self
            .client
            .post(self.endpoint(ANTHROPIC_API_BASE, "/v1/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success("Anthropic", response).await?;
        let result: AnthropicResponse = response.json().await.map_err(transport_error)?;
        result
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| QueryError::Translation("Empty response from Anthropic".into()))
    }

    async fn call_ollama(&self, base_url: &str, model: &str, prompt: &str) -> Result<String, QueryError> {
        let request = OllamaRequest {
            model:  model.to_string(),
            prompt: prompt.to_string(),
            stream: false
        };
        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success("Ollama", response).await?;
        let result: OllamaResponse = response.json().await.map_err(transport_error)?;
        Ok(result.response)
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, QueryError> {
        debug!(
            provider = self.provider.name(),
            model = self.provider.model(),
            "requesting completion"
        );
        self.call_provider(prompt).await
    }
}

async fn ensure_success(
    provider: &str,
    response: reqwest::Response
) -> Result<reqwest::Response, QueryError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(QueryError::Translation(format!(
        "{} API error {}: {}",
        provider, status, text
    )))
}

fn transport_error(err: reqwest::Error) -> QueryError {
    QueryError::Translation(describe_http_error(&err))
}

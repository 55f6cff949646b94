//! Provider Client - HTTP client for the supported AI backends
//!
//! - Mistral and OpenAI: chat completions, bearer auth
//! - Anthropic: messages API, `x-api-key` + `anthropic-version`
//!
//! Every call sends a single user message and returns the first text
//! candidate. No retry: one analysis is one outbound request.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::models::*;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_MAX_TOKENS: u32 = 2000;

/// One operation every AI backend offers
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn analyze(&self, prompt: &str, model: &str) -> Result<String, ProviderError>;
}

/// reqwest-backed client for one configured provider
pub struct ProviderClient {
    kind: ProviderKind,
    api_key: String,
    base_url: String,
    http_client: Client,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderClient {
    /// Fails when the credential is empty
    pub fn new(kind: ProviderKind, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(ProviderError::MissingApiKey(kind));
        }

        let http_client = Client::builder().build()?;
        Ok(Self { kind, api_key, base_url: kind.default_base_url().to_string(), http_client })
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = Self::new(settings.kind, settings.api_key.as_str())?;
        Ok(match settings.base_url.as_deref() {
            Some(url) => client.with_base_url(url),
            None => client,
        })
    }

    /// Point at a self-hosted gateway or a test server
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn chat_completion(&self, prompt: &str, model: &str) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
        };
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!("Calling {} API: {} with model {}", self.kind, url, model);

        let builder = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request);

        let response: ChatCompletionResponse = self.send(builder).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse(self.kind))
    }

    async fn messages(&self, prompt: &str, model: &str) -> Result<String, ProviderError> {
        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: ANTHROPIC_MAX_TOKENS,
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
        };
        let url = format!("{}/messages", self.base_url);

        tracing::debug!("Calling {} API: {} with model {}", self.kind, url, model);

        let builder = self
            .http_client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request);

        let response: MessagesResponse = self.send(builder).await?;

        response
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse(self.kind))
    }

    async fn send<Resp>(&self, builder: RequestBuilder) -> Result<Resp, ProviderError>
    where
        Resp: serde::de::DeserializeOwned,
    {
        let response = builder.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited(self.kind, retry_after));
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Api { provider: self.kind, status: status.as_u16(), body });
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| ProviderError::Parse(self.kind, e.to_string()))
    }
}

#[async_trait]
impl AnalysisProvider for ProviderClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn analyze(&self, prompt: &str, model: &str) -> Result<String, ProviderError> {
        match self.kind {
            ProviderKind::Mistral | ProviderKind::OpenAI => self.chat_completion(prompt, model).await,
            ProviderKind::Anthropic => self.messages(prompt, model).await,
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

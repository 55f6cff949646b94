//! Provider Gateway Data Models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::QueryAnalysis;

// ============================================================================
// Providers
// ============================================================================

/// Supported AI backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mistral,
    OpenAI,
    Anthropic,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Mistral, Self::OpenAI, Self::Anthropic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mistral => "mistral",
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// API root the endpoint paths are appended to
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mistral" => Ok(Self::Mistral),
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!(
                "Invalid provider: '{}', supported providers are mistral, openai and anthropic",
                other
            )),
        }
    }
}

/// Validated provider selection: exactly one provider, model and credential
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &"****")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ============================================================================
// Analysis outcome
// ============================================================================

/// Result of asking for an analysis of one query record
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// A new analysis was stored
    Analyzed(QueryAnalysis),
    /// The record already had one; nothing was sent to the provider
    AlreadyAnalyzed(QueryAnalysis),
    /// The provider failed; nothing was stored
    Unavailable,
}

impl AnalysisOutcome {
    pub fn analysis(&self) -> Option<&QueryAnalysis> {
        match self {
            Self::Analyzed(a) | Self::AlreadyAnalyzed(a) => Some(a),
            Self::Unavailable => None,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} API key is not configured")]
    MissingApiKey(ProviderKind),

    #[error("{provider} API error {status}: {body}")]
    Api { provider: ProviderKind, status: u16, body: String },

    #[error("{0} rate limited, retry after {1}s")]
    RateLimited(ProviderKind, u64),

    #[error("{0} response parsing error: {1}")]
    Parse(ProviderKind, String),

    #[error("{0} returned an empty response")]
    EmptyResponse(ProviderKind),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

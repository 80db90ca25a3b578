use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Provider Types
// =============================================================================

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Normalized completion or embedding returned by a provider adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Provider that served the call.
    pub provider: String,
    /// Model reported by the provider.
    pub model: String,
    /// Generated text (empty for embeddings).
    #[serde(default)]
    pub content: String,
    /// Embedding vector for embedding requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub usage: TokenUsage,
    /// Provider-computed cost in USD, if the adapter knows it.
    #[serde(default)]
    pub cost: Option<f64>,
    pub finish_reason: String,
}

impl NormalizedResponse {
    /// Text completion.
    pub fn completion(
        provider: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
        usage: TokenUsage,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            content: content.into(),
            embedding: None,
            usage,
            cost: None,
            finish_reason: "stop".to_string(),
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Failure class of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    Connection,
    /// 5xx response.
    Server,
    /// 408/429 response.
    Throttled,
    /// Other 4xx response.
    Client,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Server => "server",
            Self::Throttled => "throttled",
            Self::Client => "client",
        };
        f.write_str(s)
    }
}

/// Typed error returned by a provider adapter.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("Provider '{provider}' {kind} error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Timeouts, connection errors, throttling and 5xx are retryable.
    pub retryable: bool,
}

impl ProviderError {
    /// Classify an HTTP status.
    pub fn from_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            408 | 429 => ProviderErrorKind::Throttled,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::Client,
        };
        Self {
            provider: provider.into(),
            kind,
            status: Some(status),
            message: message.into(),
            retryable: kind != ProviderErrorKind::Client,
        }
    }

    pub fn server(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::from_status(provider, status, message)
    }

    pub fn client(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::from_status(provider, status, message)
    }

    pub fn timeout(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Timeout,
            status: None,
            message: "request timed out".to_string(),
            retryable: true,
        }
    }

    pub fn connection(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: ProviderErrorKind::Connection,
            status: None,
            message: message.into(),
            retryable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ProviderError::from_status("p", 503, "x").retryable);
        assert!(ProviderError::from_status("p", 429, "x").retryable);
        assert!(!ProviderError::from_status("p", 400, "x").retryable);
        assert!(!ProviderError::from_status("p", 422, "x").retryable);
        assert!(ProviderError::timeout("p").retryable);
    }

    #[test]
    fn test_display_includes_status() {
        let err = ProviderError::server("openai", 502, "bad gateway");
        assert_eq!(err.to_string(), "Provider 'openai' server error (502): bad gateway");
    }
}

//! Reference provider adapters.
//!
//! Real adapters translate to a vendor wire format; these serve local
//! development and tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use aegis_core::{
    NormalizedResponse, ProviderAdapter, ProviderError, RequestContext, RequestKind, Role,
    TokenUsage, CHARS_PER_TOKEN,
};

const EMBEDDING_DIMENSIONS: usize = 128;

fn token_estimate(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

// =============================================================================
// Echo Provider
// =============================================================================

/// Answers with the last user message, prefixed by a fixed reply.
pub struct EchoProvider {
    name: String,
    reply: String,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: "echo".to_string(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    fn embed(text: &str) -> Vec<f32> {
        let hash = text.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        (0..EMBEDDING_DIMENSIONS)
            .map(|i| (hash.wrapping_add(i as u64) % 1000) as f32 / 1000.0)
            .collect()
    }
}

#[async_trait]
impl ProviderAdapter for EchoProvider {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &RequestContext) -> Result<NormalizedResponse, ProviderError> {
        let prompt_tokens: u64 = request
            .messages
            .iter()
            .map(|m| token_estimate(&m.text()))
            .sum();

        if request.kind == RequestKind::Embedding {
            let input: Vec<String> = request.messages.iter().map(|m| m.text().into_owned()).collect();
            return Ok(NormalizedResponse {
                provider: self.name.clone(),
                model: request.model.clone(),
                content: String::new(),
                embedding: Some(Self::embed(&input.join("\n"))),
                usage: TokenUsage::new(prompt_tokens, 0),
                cost: None,
                finish_reason: "stop".to_string(),
            });
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text().into_owned())
            .unwrap_or_default();
        let content = format!("{}: {}", self.reply, last_user);
        let mut completion_tokens = token_estimate(&content);
        if let Some(max) = request.max_tokens {
            completion_tokens = completion_tokens.min(u64::from(max));
        }

        Ok(NormalizedResponse::completion(
            &self.name,
            &request.model,
            content,
            TokenUsage::new(prompt_tokens, completion_tokens),
        ))
    }
}

// =============================================================================
// Scripted Provider
// =============================================================================

/// Replays a queue of outcomes, then falls back to a default outcome.
///
/// Counts calls and can delay each call, for failover and cancellation tests.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<NormalizedResponse, ProviderError>>>,
    fallback: Result<NormalizedResponse, ProviderError>,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl ScriptedProvider {
    /// Always succeeds with a small completion.
    pub fn healthy(name: impl Into<String>) -> Self {
        let name = name.into();
        let response =
            NormalizedResponse::completion(&name, "scripted", "ok", TokenUsage::new(10, 5));
        Self::with_fallback(name, Ok(response))
    }

    /// Always fails with a 503.
    pub fn failing(name: impl Into<String>) -> Self {
        let name = name.into();
        let error = ProviderError::server(&name, 503, "service unavailable");
        Self::with_fallback(name, Err(error))
    }

    pub fn with_fallback(
        name: impl Into<String>,
        fallback: Result<NormalizedResponse, ProviderError>,
    ) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Queue one outcome ahead of the fallback.
    pub fn then(self, outcome: Result<NormalizedResponse, ProviderError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls started so far, including cancelled ones.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: &RequestContext) -> Result<NormalizedResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let mut outcome = next.unwrap_or_else(|| self.fallback.clone());
        if let Ok(response) = &mut outcome {
            response.provider = self.name.clone();
            if response.model == "scripted" {
                response.model = request.model.clone();
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::Message;

    fn request() -> RequestContext {
        RequestContext::new("gpt-4o", "app", vec![Message::system("be nice"), Message::user("Hello")])
    }

    #[tokio::test]
    async fn test_echo_provider() {
        let provider = EchoProvider::new("local").with_reply("Response");
        let response = provider.send(&request()).await.unwrap();
        assert_eq!(response.content, "Response: Hello");
        assert_eq!(response.provider, "local");
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.usage.prompt_tokens, 2 + 2);
    }

    #[tokio::test]
    async fn test_echo_embedding_is_deterministic() {
        let provider = EchoProvider::new("local");
        let req = RequestContext::new("text-embedding-3-small", "app", vec![Message::user("abc")])
            .with_kind(RequestKind::Embedding);
        let a = provider.send(&req).await.unwrap();
        let b = provider.send(&req).await.unwrap();
        assert_eq!(a.embedding.as_ref().unwrap().len(), EMBEDDING_DIMENSIONS);
        assert_eq!(a.embedding, b.embedding);
        assert_eq!(a.usage.completion_tokens, 0);
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_then_falls_back() {
        let provider = ScriptedProvider::healthy("p")
            .then(Err(ProviderError::timeout("p")))
            .then(Err(ProviderError::client("p", 400, "bad")));

        assert!(provider.send(&request()).await.unwrap_err().retryable);
        assert!(!provider.send(&request()).await.unwrap_err().retryable);
        let response = provider.send(&request()).await.unwrap();
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(provider.calls(), 3);
    }
}

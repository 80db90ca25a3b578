use aegis_core::config::ModerationConfig;
use aegis_core::{
    AsyncSecurityPlugin, Error, Finding, FindingCategory, Message, Result, RiskLevel,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Client for an OpenAI-compatible moderation endpoint.
pub struct ModerationPlugin {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<Secret<String>>,
    model: Option<String>,
}

#[derive(Serialize)]
struct ModerationRequest<'a> {
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: HashMap<String, bool>,
    #[serde(default)]
    category_scores: HashMap<String, f64>,
}

impl ModerationPlugin {
    pub const NAME: &'static str = "moderation";

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            model: None,
        }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(Secret::new(key.into()));
        self
    }

    fn findings_for(result: &ModerationResult) -> Option<Finding> {
        if !result.flagged {
            return None;
        }
        let mut flagged: Vec<&str> = result
            .categories
            .iter()
            .filter(|&(_, &hit)| hit)
            .map(|(name, _)| name.as_str())
            .collect();
        flagged.sort_unstable();

        let top_score = result
            .category_scores
            .iter()
            .filter(|(name, _)| result.categories.get(*name).copied().unwrap_or(false))
            .map(|(_, &score)| score)
            .fold(0.0, f64::max);

        Some(
            Finding::new(
                Self::NAME,
                FindingCategory::Moderation,
                severity_for_score(top_score),
                format!("Content flagged by moderation: {}", flagged.join(", ")),
            )
            .with_recommendation("Reject or review the content"),
        )
    }
}

/// Map a provider confidence score to a severity.
fn severity_for_score(score: f64) -> RiskLevel {
    if score >= 0.9 {
        RiskLevel::Critical
    } else if score >= 0.7 {
        RiskLevel::High
    } else if score >= 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[async_trait]
impl AsyncSecurityPlugin for ModerationPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Screens content with an external moderation endpoint"
    }

    async fn check_async(&self, messages: &[Message]) -> Result<Vec<Finding>> {
        let input: Vec<String> = messages
            .iter()
            .map(|m| m.text().into_owned())
            .filter(|t| !t.trim().is_empty())
            .collect();
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let body = ModerationRequest {
            input,
            model: self.model.as_deref(),
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::plugin(Self::NAME, format!("request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::plugin(
                Self::NAME,
                format!("endpoint returned {}", status),
            ));
        }
        let parsed: ModerationResponse = response
            .json()
            .await
            .map_err(|e| Error::plugin(Self::NAME, format!("invalid response: {}", e)))?;

        tracing::debug!(results = parsed.results.len(), "Moderation response received");
        Ok(parsed.results.iter().filter_map(Self::findings_for).collect())
    }
}

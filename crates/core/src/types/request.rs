use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::budget::{BudgetScope, ScopeType};
use super::message::Message;
use crate::error::{Error, Result};

// =============================================================================
// Request Types
// =============================================================================

/// Characters per token used for prompt size estimates.
pub const CHARS_PER_TOKEN: usize = 4;

/// Kind of upstream call requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    #[default]
    Completion,
    Embedding,
}

fn default_environment() -> String {
    "production".to_string()
}

/// Normalized inbound request, built by the API layer from the wire request.
///
/// Owned by exactly one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Unique request ID. Assigned at pipeline entry when empty.
    #[serde(default)]
    pub request_id: String,

    /// Requested model identifier (e.g. "gpt-4o").
    pub model: String,

    /// Completion or embedding.
    #[serde(default)]
    pub kind: RequestKind,

    /// Ordered conversation messages (or embedding inputs).
    pub messages: Vec<Message>,

    /// Requested completion token ceiling.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Requested sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Owning application.
    pub application_id: String,

    /// End user on whose behalf the application calls.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Organization the application belongs to.
    #[serde(default)]
    pub organization_id: Option<String>,

    /// Optional feature tag for per-feature accounting.
    #[serde(default)]
    pub feature: Option<String>,

    /// Declared deployment environment.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Evaluate without calling the provider or recording spend.
    #[serde(default)]
    pub dry_run: bool,

    /// Attach the full decision trail to the outcome.
    #[serde(default)]
    pub debug: bool,

    /// Caller-supplied bound on the routed provider call.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RequestContext {
    /// Create a completion request for an application.
    pub fn new(
        model: impl Into<String>,
        application_id: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            model: model.into(),
            kind: RequestKind::Completion,
            messages,
            max_tokens: None,
            temperature: None,
            application_id: application_id.into(),
            user_id: None,
            organization_id: None,
            feature: None,
            environment: default_environment(),
            dry_run: false,
            debug: false,
            timeout_ms: None,
        }
    }

    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Mark the request as a dry run.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Request the debug decision trail.
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Assign a fresh request ID if the API layer did not supply one.
    pub fn ensure_request_id(&mut self) -> &str {
        if self.request_id.is_empty() {
            self.request_id = Uuid::new_v4().to_string();
        }
        &self.request_id
    }

    /// Reject malformed attributes before any stage runs.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::invalid_request("model must not be empty"));
        }
        if self.application_id.trim().is_empty() {
            return Err(Error::invalid_request("application_id must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(Error::invalid_request("messages must not be empty"));
        }
        if self.environment.trim().is_empty() {
            return Err(Error::invalid_request("environment must not be empty"));
        }
        if self.kind == RequestKind::Embedding
            && self.messages.iter().all(|m| m.text().trim().is_empty())
        {
            return Err(Error::invalid_request("embedding input must not be empty"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) || t.is_nan() {
                return Err(Error::invalid_request(format!(
                    "temperature {} outside [0, 2]",
                    t
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(Error::invalid_request("max_tokens must be positive"));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::invalid_request("timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Rough prompt token estimate (characters / 4, rounded up).
    pub fn estimated_prompt_tokens(&self) -> u64 {
        let chars: usize = self.messages.iter().map(|m| m.content.char_len()).sum();
        chars.div_ceil(CHARS_PER_TOKEN) as u64
    }

    /// Budget scopes this request is accountable to, most specific last.
    pub fn budget_scopes(&self) -> Vec<BudgetScope> {
        let mut scopes = vec![BudgetScope::new(ScopeType::Application, &self.application_id)];
        if let Some(org) = &self.organization_id {
            scopes.push(BudgetScope::new(ScopeType::Organization, org));
        }
        if let Some(user) = &self.user_id {
            scopes.push(BudgetScope::new(ScopeType::User, user));
        }
        if let Some(feature) = &self.feature {
            scopes.push(BudgetScope::new(
                ScopeType::Feature,
                format!("{}/{}", self.application_id, feature),
            ));
        }
        scopes
    }
}

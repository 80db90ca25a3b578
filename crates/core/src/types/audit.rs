use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::security::Finding;

/// Final decision of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Allowed and served (or would be, in dry-run).
    Allow,
    /// Allowed with policy or budget warnings attached.
    Warn,
    /// Blocked by security screening or a DENY rule.
    Blocked,
    /// Blocked by a hard budget limit.
    BudgetExceeded,
    /// Allowed but no provider could serve it.
    Failed,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Blocked => "blocked",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record handed to the audit sink per completed or blocked request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub application_id: String,
    pub model: String,
    pub decision: Decision,
    pub findings: Vec<Finding>,
    pub matched_rules: Vec<String>,
    pub cost: Option<f64>,
    pub latency_ms: u64,
    pub provider: Option<String>,
    pub dry_run: bool,
    /// Error code for non-allowed outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

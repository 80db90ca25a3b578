use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::request::RequestContext;

// =============================================================================
// Policy Types
// =============================================================================

/// Outcome of a policy rule or a whole evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Warn,
    Deny,
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Allow => "ALLOW",
            Self::Warn => "WARN",
            Self::Deny => "DENY",
        };
        f.write_str(s)
    }
}

/// Rule type discriminant, derived from the rule's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    ModelRestriction,
    TokenLimit,
    RateLimit,
    TimeRestriction,
    EnvironmentRestriction,
}

/// How a model list is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelListMode {
    /// Matches when the model is in the list.
    #[default]
    Block,
    /// Matches when the model is NOT in the list.
    Allow,
}

/// Day of week for time windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

/// Structured predicate of a rule, tagged by rule type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConditions {
    /// Model id is / is not in a set, optionally gated by environment.
    ModelRestriction {
        models: Vec<String>,
        #[serde(default)]
        mode: ModelListMode,
        /// Only applies in these environments when non-empty.
        #[serde(default)]
        environments: Vec<String>,
    },
    /// Estimated or requested tokens exceed a threshold.
    TokenLimit { max_tokens: u64 },
    /// Caller-supplied recent request count exceeds a threshold.
    RateLimit { max_requests: u64 },
    /// Matches outside the allowed wall-clock window.
    TimeRestriction {
        /// Inclusive start hour (0-23).
        start_hour: u8,
        /// Exclusive end hour (1-24). A window may wrap midnight.
        end_hour: u8,
        /// Allowed days; empty means every day.
        #[serde(default)]
        days: Vec<DayOfWeek>,
        /// Offset applied to UTC before evaluating the window.
        #[serde(default)]
        utc_offset_minutes: i32,
    },
    /// Declared environment not in the allowed set.
    EnvironmentRestriction { allowed: Vec<String> },
}

impl RuleConditions {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::ModelRestriction { .. } => RuleType::ModelRestriction,
            Self::TokenLimit { .. } => RuleType::TokenLimit,
            Self::RateLimit { .. } => RuleType::RateLimit,
            Self::TimeRestriction { .. } => RuleType::TimeRestriction,
            Self::EnvironmentRestriction { .. } => RuleType::EnvironmentRestriction,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// An ordered, conditional ALLOW/WARN/DENY predicate.
///
/// Administered externally; read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub name: String,
    pub conditions: RuleConditions,
    pub action: PolicyAction,
    /// Lower is evaluated first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Application this rule is restricted to; `None` applies to all.
    #[serde(default)]
    pub scope: Option<String>,
    /// Reason reported when the rule matches.
    #[serde(default)]
    pub description: Option<String>,
}

impl PolicyRule {
    /// Create an enabled, unscoped rule.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        conditions: RuleConditions,
        action: PolicyAction,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            conditions,
            action,
            priority,
            enabled: true,
            scope: None,
            description: None,
        }
    }

    pub fn scoped_to(mut self, application_id: impl Into<String>) -> Self {
        self.scope = Some(application_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn rule_type(&self) -> RuleType {
        self.conditions.rule_type()
    }
}

/// Result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    /// IDs of matched rules. On DENY, exactly the denying rule.
    pub matched_rules: Vec<String>,
    pub reasons: Vec<String>,
}

impl PolicyDecision {
    /// Decision when nothing matched.
    pub fn allow() -> Self {
        Self {
            action: PolicyAction::Allow,
            matched_rules: Vec::new(),
            reasons: Vec::new(),
        }
    }

    pub fn is_denied(&self) -> bool {
        self.action == PolicyAction::Deny
    }
}

/// Request attributes a policy is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub request: &'a RequestContext,
    /// Recent request count for the application, supplied by the caller.
    pub recent_requests: u64,
    /// Evaluation time for time-window rules.
    pub now: DateTime<Utc>,
}

impl<'a> PolicyInput<'a> {
    pub fn new(request: &'a RequestContext, recent_requests: u64, now: DateTime<Utc>) -> Self {
        Self {
            request,
            recent_requests,
            now,
        }
    }

    /// Larger of the prompt estimate and the requested completion ceiling.
    pub fn token_estimate(&self) -> u64 {
        let estimated = self.request.estimated_prompt_tokens();
        let requested = self.request.max_tokens.map(u64::from).unwrap_or(0);
        estimated.max(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_yaml_round_shape() {
        let yaml = r#"
id: no-gpt4-in-dev
name: Block GPT-4 in development
action: deny
priority: 10
conditions:
  type: model_restriction
  models: ["gpt-4*"]
  environments: ["development"]
"#;
        let rule: PolicyRule = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.rule_type(), RuleType::ModelRestriction);
        match rule.conditions {
            RuleConditions::ModelRestriction { mode, .. } => assert_eq!(mode, ModelListMode::Block),
            _ => panic!("expected model restriction"),
        }
    }
}

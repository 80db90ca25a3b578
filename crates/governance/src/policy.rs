//! Policy rule evaluation and rule sources.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, Duration, Timelike};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

use aegis_core::pattern::glob_match;
use aegis_core::{
    DayOfWeek, ModelListMode, PolicyAction, PolicyDecision, PolicyInput, PolicyRule,
    PolicySource, Result, RuleConditions,
};

// =============================================================================
// Policy Engine
// =============================================================================

/// Stateless evaluator of rule sets.
///
/// Enabled rules applicable to the request's application are evaluated in
/// ascending `(priority, id)` order. The first matching DENY rule ends the
/// evaluation; matching WARN rules accumulate; matching ALLOW rules are
/// recorded but do not change the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `rules` against one request.
    pub fn evaluate(&self, input: &PolicyInput<'_>, rules: &[PolicyRule]) -> PolicyDecision {
        let application_id = input.request.application_id.as_str();
        let mut applicable: Vec<&PolicyRule> = rules
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| r.scope.as_deref().map_or(true, |s| s == application_id))
            .collect();
        applicable.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut matched_rules = Vec::new();
        let mut reasons = Vec::new();
        let mut warned = false;

        for rule in applicable {
            let Some(detail) = self.matches(rule, input) else {
                continue;
            };
            let reason = rule.description.clone().unwrap_or(detail);

            match rule.action {
                PolicyAction::Deny => {
                    tracing::info!(
                        rule_id = %rule.id,
                        application_id = application_id,
                        reason = %reason,
                        "Policy rule denied request"
                    );
                    return PolicyDecision {
                        action: PolicyAction::Deny,
                        matched_rules: vec![rule.id.clone()],
                        reasons: vec![reason],
                    };
                }
                PolicyAction::Warn => {
                    tracing::debug!(rule_id = %rule.id, reason = %reason, "Policy rule warned");
                    warned = true;
                    matched_rules.push(rule.id.clone());
                    reasons.push(reason);
                }
                PolicyAction::Allow => {
                    matched_rules.push(rule.id.clone());
                }
            }
        }

        PolicyDecision {
            action: if warned {
                PolicyAction::Warn
            } else {
                PolicyAction::Allow
            },
            matched_rules,
            reasons,
        }
    }

    /// Evaluate a batch of hypothetical requests without side effects.
    pub fn simulate(&self, inputs: &[PolicyInput<'_>], rules: &[PolicyRule]) -> Vec<PolicyDecision> {
        inputs.iter().map(|input| self.evaluate(input, rules)).collect()
    }

    /// Reason string when `rule`'s conditions hold for `input`.
    fn matches(&self, rule: &PolicyRule, input: &PolicyInput<'_>) -> Option<String> {
        let request = input.request;
        match &rule.conditions {
            RuleConditions::ModelRestriction {
                models,
                mode,
                environments,
            } => {
                if !environments.is_empty()
                    && !environments
                        .iter()
                        .any(|e| e.eq_ignore_ascii_case(&request.environment))
                {
                    return None;
                }
                let listed = models.iter().any(|p| glob_match(p, &request.model));
                match (mode, listed) {
                    (ModelListMode::Block, true) => Some(format!(
                        "model '{}' is not permitted in {}",
                        request.model, request.environment
                    )),
                    (ModelListMode::Allow, false) => Some(format!(
                        "model '{}' is not on the allowed list",
                        request.model
                    )),
                    _ => None,
                }
            }
            RuleConditions::TokenLimit { max_tokens } => {
                let estimate = input.token_estimate();
                (estimate > *max_tokens).then(|| {
                    format!("{} tokens exceeds the limit of {}", estimate, max_tokens)
                })
            }
            RuleConditions::RateLimit { max_requests } => {
                (input.recent_requests > *max_requests).then(|| {
                    format!(
                        "{} recent requests exceeds the limit of {}",
                        input.recent_requests, max_requests
                    )
                })
            }
            RuleConditions::TimeRestriction {
                start_hour,
                end_hour,
                days,
                utc_offset_minutes,
            } => {
                let local = input.now + Duration::minutes(i64::from(*utc_offset_minutes));
                let day = DayOfWeek::from(local.weekday());
                let hour = local.hour();
                let day_allowed = days.is_empty() || days.contains(&day);
                let hour_allowed = hour_in_window(hour, u32::from(*start_hour), u32::from(*end_hour));
                (!(day_allowed && hour_allowed)).then(|| {
                    format!(
                        "requests are only allowed between {:02}:00 and {:02}:00",
                        start_hour, end_hour
                    )
                })
            }
            RuleConditions::EnvironmentRestriction { allowed } => {
                let permitted = allowed
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&request.environment));
                (!permitted).then(|| {
                    format!("environment '{}' is not permitted", request.environment)
                })
            }
        }
    }
}

/// `[start, end)` with wrap-around past midnight; `start == end` is the full day.
fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        (start..end).contains(&hour)
    } else {
        hour >= start || hour < end
    }
}

// =============================================================================
// Policy Sources
// =============================================================================

/// YAML document holding a rule set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// In-memory rule source, optionally loaded from YAML.
#[derive(Debug, Default)]
pub struct StaticPolicySource {
    rules: RwLock<Vec<PolicyRule>>,
}

impl StaticPolicySource {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Load rules from a YAML policy file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy file: {:?}", path))?;
        let file: PolicyFile =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse policy YAML")?;
        tracing::info!(path = ?path, rules = file.rules.len(), "Loaded policy rules");
        Ok(Self::new(file.rules))
    }

    /// Merge rules in (incoming wins on ID conflict).
    pub fn merge(&self, incoming: Vec<PolicyRule>) {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        for rule in incoming {
            if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
                *existing = rule;
            } else {
                rules.push(rule);
            }
        }
    }

    /// Replace the whole rule set.
    pub fn replace(&self, rules: Vec<PolicyRule>) {
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = rules;
    }

    pub fn rules(&self) -> Vec<PolicyRule> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn rules_for(&self, application_id: &str) -> Result<Vec<PolicyRule>> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        Ok(rules
            .iter()
            .filter(|r| r.scope.as_deref().map_or(true, |s| s == application_id))
            .cloned()
            .collect())
    }
}

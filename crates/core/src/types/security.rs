use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Security Types
// =============================================================================

/// Severity of a finding, ordered LOW < MEDIUM < HIGH < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Fixed aggregation score for this level.
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.8,
            Self::Critical => 1.0,
        }
    }

    /// Level bucket containing `score`. A zero score (no findings) is LOW.
    pub fn from_score(score: f64) -> Self {
        if score >= Self::Critical.score() {
            Self::Critical
        } else if score >= Self::High.score() {
            Self::High
        } else if score >= Self::Medium.score() {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Detection category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    PromptInjection,
    Pii,
    Secrets,
    CodeInjection,
    Moderation,
}

impl FindingCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PromptInjection => "prompt_injection",
            Self::Pii => "pii",
            Self::Secrets => "secrets",
            Self::CodeInjection => "code_injection",
            Self::Moderation => "moderation",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detection produced by a security plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the plugin that produced the finding.
    pub plugin: String,
    /// Detection category.
    pub category: FindingCategory,
    /// Severity.
    pub severity: RiskLevel,
    /// Human-readable description.
    pub description: String,
    /// Matched excerpt (redacted for secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    /// Suggested remediation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Finding {
    /// Create a finding without match details.
    pub fn new(
        plugin: impl Into<String>,
        category: FindingCategory,
        severity: RiskLevel,
        description: impl Into<String>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            category,
            severity,
            description: description.into(),
            matched_text: None,
            recommendation: None,
        }
    }

    pub fn with_matched_text(mut self, text: impl Into<String>) -> Self {
        self.matched_text = Some(text.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Default block threshold: anything at HIGH or above blocks.
pub const DEFAULT_BLOCK_THRESHOLD: f64 = 0.8;

/// Aggregate risk of all findings for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// All findings, in plugin registration order.
    pub findings: Vec<Finding>,
    /// Bucket containing `risk_score`.
    pub risk_level: RiskLevel,
    /// Max severity score over findings, 0 when empty.
    pub risk_score: f64,
    /// `risk_score < block_threshold`.
    pub safe: bool,
    /// Plugins that failed or timed out and were ignored under fail-open.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_plugins: Vec<String>,
}

impl RiskAssessment {
    /// Aggregate findings against a block threshold.
    pub fn from_findings(findings: Vec<Finding>, block_threshold: f64) -> Self {
        let risk_score = max_severity_score(&findings);
        Self {
            risk_level: RiskLevel::from_score(risk_score),
            safe: risk_score < block_threshold,
            risk_score,
            findings,
            skipped_plugins: Vec::new(),
        }
    }

    /// Assessment with no findings.
    pub fn clean() -> Self {
        Self::from_findings(Vec::new(), DEFAULT_BLOCK_THRESHOLD)
    }

    /// Whether any finding has the given category.
    pub fn has_category(&self, category: FindingCategory) -> bool {
        self.findings.iter().any(|f| f.category == category)
    }
}

/// `max(severity_score(f))` over findings, 0 if empty.
pub fn max_severity_score(findings: &[Finding]) -> f64 {
    findings
        .iter()
        .map(|f| f.severity.score())
        .fold(0.0, f64::max)
}

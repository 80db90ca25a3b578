use aegis_core::{Finding, FindingCategory, Message, Result, RiskLevel, SecurityPlugin};

use super::{Excerpt, PatternDetector, PatternSpec};

/// Detects credentials: provider API keys, cloud keys, tokens and private keys.
///
/// Matched values are always redacted.
pub struct SecretsScanner {
    detector: PatternDetector,
}

impl SecretsScanner {
    pub const NAME: &'static str = "secrets_scanner";

    pub fn new() -> Result<Self> {
        let detector = PatternDetector::new(
            Self::NAME,
            FindingCategory::Secrets,
            Excerpt::Redacted,
            patterns(),
        )?;
        Ok(Self { detector })
    }
}

fn patterns() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            id: "private_key",
            pattern: r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP |ENCRYPTED )?PRIVATE KEY(?: BLOCK)?-----",
            severity: RiskLevel::Critical,
            description: "Private key block",
            recommendation: "Never send private keys; rotate the key",
            validate: None,
        },
        PatternSpec {
            id: "aws_access_key",
            pattern: r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
            severity: RiskLevel::Critical,
            description: "AWS access key id",
            recommendation: "Rotate the AWS credential",
            validate: None,
        },
        PatternSpec {
            id: "anthropic_api_key",
            pattern: r"\bsk-ant-[A-Za-z0-9_-]{20,}",
            severity: RiskLevel::Critical,
            description: "Anthropic API key",
            recommendation: "Rotate the API key",
            validate: None,
        },
        PatternSpec {
            id: "openai_api_key",
            pattern: r"\bsk-(?:proj-)?[A-Za-z0-9]{20,}",
            severity: RiskLevel::Critical,
            description: "OpenAI API key",
            recommendation: "Rotate the API key",
            validate: None,
        },
        PatternSpec {
            id: "github_token",
            pattern: r"\bgh[pousr]_[A-Za-z0-9]{36,}\b",
            severity: RiskLevel::Critical,
            description: "GitHub token",
            recommendation: "Revoke the token",
            validate: None,
        },
        PatternSpec {
            id: "google_api_key",
            pattern: r"\bAIza[0-9A-Za-z_-]{35}",
            severity: RiskLevel::High,
            description: "Google API key",
            recommendation: "Restrict or rotate the key",
            validate: None,
        },
        PatternSpec {
            id: "slack_token",
            pattern: r"\bxox[abprs]-[A-Za-z0-9-]{10,}",
            severity: RiskLevel::High,
            description: "Slack token",
            recommendation: "Revoke the token",
            validate: None,
        },
        PatternSpec {
            id: "bearer_token",
            pattern: r"(?i)\bbearer\s+[A-Za-z0-9\-._~+/]{20,}=*",
            severity: RiskLevel::High,
            description: "Bearer token",
            recommendation: "Remove authorization headers from prompts",
            validate: None,
        },
        PatternSpec {
            id: "password_assignment",
            pattern: r#"(?i)\b(?:password|passwd|pwd|secret|api_key|apikey)\s*[:=]\s*["']?[^\s"']{8,}"#,
            severity: RiskLevel::Medium,
            description: "Credential assignment",
            recommendation: "Remove credentials from prompts",
            validate: None,
        },
    ]
}

impl SecurityPlugin for SecretsScanner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Detects API keys, tokens and private keys"
    }

    fn check(&self, messages: &[Message]) -> Result<Vec<Finding>> {
        Ok(self.detector.scan(messages))
    }
}

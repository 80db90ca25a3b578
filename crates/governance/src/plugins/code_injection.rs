use aegis_core::{Finding, FindingCategory, Message, Result, RiskLevel, SecurityPlugin};

use super::{Excerpt, PatternDetector, PatternSpec};

/// Detects shell, SQL and path-traversal payloads embedded in prompts.
pub struct CodeInjectionDetector {
    detector: PatternDetector,
}

impl CodeInjectionDetector {
    pub const NAME: &'static str = "code_injection";

    pub fn new() -> Result<Self> {
        let detector = PatternDetector::new(
            Self::NAME,
            FindingCategory::CodeInjection,
            Excerpt::Verbatim,
            patterns(),
        )?;
        Ok(Self { detector })
    }
}

fn patterns() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            id: "destructive_shell",
            pattern: r"\brm\s+-[a-zA-Z]*(?:rf|fr)[a-zA-Z]*\s+(?:/|~|\*)|\bmkfs(?:\.\w+)?\s+/dev/|\bdd\s+if=\S+\s+of=/dev/|:\(\)\s*\{\s*:\|:&\s*\};:",
            severity: RiskLevel::Critical,
            description: "Destructive shell command",
            recommendation: "Reject the request",
            validate: None,
        },
        PatternSpec {
            id: "shell_chaining",
            pattern: r"(?:;|&&|\|\|)\s*(?:rm|curl|wget|nc|ncat|bash|sh|zsh|chmod|chown|sudo|python3?|perl)\s",
            severity: RiskLevel::High,
            description: "Chained shell command",
            recommendation: "Review the request",
            validate: None,
        },
        PatternSpec {
            id: "remote_script_pipe",
            pattern: r"\b(?:curl|wget)\s+[^|\n]*\|\s*(?:sudo\s+)?(?:ba|z)?sh\b",
            severity: RiskLevel::High,
            description: "Remote script piped to a shell",
            recommendation: "Review the request",
            validate: None,
        },
        PatternSpec {
            id: "sql_tautology",
            pattern: r#"(?i)['"]\s*or\s+['"]?(\w+)['"]?\s*=\s*['"]?\w+['"]?\s*(?:--|#|/\*)?"#,
            severity: RiskLevel::High,
            description: "SQL tautology",
            recommendation: "Reject the request",
            validate: None,
        },
        PatternSpec {
            id: "sql_destructive",
            pattern: r"(?i)\b(?:union\s+(?:all\s+)?select|drop\s+(?:table|database)|truncate\s+table)\b|;\s*(?:delete\s+from|insert\s+into|update\s+\w+\s+set|shutdown)\b",
            severity: RiskLevel::High,
            description: "Destructive or stacked SQL statement",
            recommendation: "Reject the request",
            validate: None,
        },
        PatternSpec {
            id: "path_traversal",
            pattern: r"(?i)(?:\.\.[/\\]){2,}|(?:%2e%2e(?:%2f|%5c|/)){2,}",
            severity: RiskLevel::Medium,
            description: "Path traversal sequence",
            recommendation: "Review the request",
            validate: None,
        },
        PatternSpec {
            id: "sensitive_file",
            pattern: r"/etc/(?:passwd|shadow|sudoers)\b|~/\.ssh/id_\w+",
            severity: RiskLevel::Medium,
            description: "Reference to a sensitive system file",
            recommendation: "Review the request",
            validate: None,
        },
    ]
}

impl SecurityPlugin for CodeInjectionDetector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Detects shell, SQL and path traversal payloads"
    }

    fn check(&self, messages: &[Message]) -> Result<Vec<Finding>> {
        Ok(self.detector.scan(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<Finding> {
        CodeInjectionDetector::new()
            .unwrap()
            .check(&[Message::user(text)])
            .unwrap()
    }

    #[test]
    fn test_destructive_shell() {
        let findings = scan("run this: ls; rm -rf / --no-preserve-root");
        assert!(findings.iter().any(|f| f.severity == RiskLevel::Critical));
        assert!(findings.iter().any(|f| f.description.contains("shell_chaining")));
    }

    #[test]
    fn test_sql_payloads() {
        let findings = scan("username: admin' OR '1'='1' --");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, RiskLevel::High);

        let findings = scan("'; DROP TABLE users; --");
        assert!(findings.iter().any(|f| f.description.contains("sql_destructive")));
    }

    #[test]
    fn test_path_traversal() {
        let findings = scan("open ../../../etc/passwd");
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.severity == RiskLevel::Medium));
    }

    #[test]
    fn test_regular_code_question() {
        assert!(scan("How do I write a SELECT query with a JOIN in Postgres?").is_empty());
        assert!(scan("What does rm do on Linux?").is_empty());
    }
}

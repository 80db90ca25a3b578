use aegis_core::{Finding, FindingCategory, Message, Result, RiskLevel, SecurityPlugin};

use super::{Excerpt, PatternDetector, PatternSpec};

/// PII scanner for emails, phone numbers, national IDs, card numbers and
/// IP addresses. Matched values are redacted in findings.
pub struct PiiScanner {
    detector: PatternDetector,
}

impl PiiScanner {
    pub const NAME: &'static str = "pii_scanner";

    pub fn new() -> Result<Self> {
        let detector = PatternDetector::new(
            Self::NAME,
            FindingCategory::Pii,
            Excerpt::Redacted,
            patterns(),
        )?;
        Ok(Self { detector })
    }
}

fn patterns() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            id: "credit_card",
            pattern: r"\b\d(?:[ -]?\d){12,18}\b",
            severity: RiskLevel::High,
            description: "Payment card number",
            recommendation: "Remove card numbers before sending to a model",
            validate: Some(luhn_valid),
        },
        PatternSpec {
            id: "ssn",
            pattern: r"\b\d{3}-\d{2}-\d{4}\b",
            severity: RiskLevel::High,
            description: "National identification number",
            recommendation: "Remove identification numbers",
            validate: None,
        },
        PatternSpec {
            id: "email",
            pattern: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            severity: RiskLevel::Medium,
            description: "Email address",
            recommendation: "Mask email addresses",
            validate: None,
        },
        PatternSpec {
            id: "phone",
            pattern: r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b",
            severity: RiskLevel::Medium,
            description: "Phone number",
            recommendation: "Mask phone numbers",
            validate: None,
        },
        PatternSpec {
            id: "ip_address",
            pattern: r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
            severity: RiskLevel::Low,
            description: "IP address",
            recommendation: "Consider masking IP addresses",
            validate: None,
        },
    ]
}

/// Luhn checksum over the digits of `candidate`, ignoring separators.
pub(crate) fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

impl SecurityPlugin for PiiScanner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Detects personal data such as emails, phone numbers and card numbers"
    }

    fn check(&self, messages: &[Message]) -> Result<Vec<Finding>> {
        Ok(self.detector.scan(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<Finding> {
        PiiScanner::new().unwrap().check(&[Message::user(text)]).unwrap()
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(luhn_valid("5500-0000-0000-0004"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("1234"));
    }

    #[test]
    fn test_card_requires_valid_checksum() {
        let findings = scan("my card is 4111 1111 1111 1111");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, RiskLevel::High);
        assert!(!findings[0].matched_text.as_ref().unwrap().contains("1111 1111"));

        assert!(scan("order number 4111 1111 1111 1112").is_empty());
    }

    #[test]
    fn test_email_and_ssn() {
        let findings = scan("reach me at jane.doe@example.com, ssn 123-45-6789");
        let severities: Vec<RiskLevel> = findings.iter().map(|f| f.severity).collect();
        assert!(severities.contains(&RiskLevel::High));
        assert!(severities.contains(&RiskLevel::Medium));
        assert!(findings.iter().all(|f| f.category == FindingCategory::Pii));
    }

    #[test]
    fn test_clean_text() {
        assert!(scan("The meeting is at 10am in room 4.").is_empty());
    }
}

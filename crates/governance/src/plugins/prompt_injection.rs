use aegis_core::{Finding, FindingCategory, Message, Result, RiskLevel, SecurityPlugin};

use super::{Excerpt, PatternDetector, PatternSpec};

/// Detects attempts to override instructions, hijack the assistant's role
/// or extract the system prompt.
///
/// Every role is scanned, system messages included.
pub struct PromptInjectionDetector {
    detector: PatternDetector,
}

impl PromptInjectionDetector {
    pub const NAME: &'static str = "prompt_injection";

    pub fn new() -> Result<Self> {
        let detector = PatternDetector::new(
            Self::NAME,
            FindingCategory::PromptInjection,
            Excerpt::Verbatim,
            patterns(),
        )?;
        Ok(Self { detector })
    }
}

fn patterns() -> Vec<PatternSpec> {
    vec![
        PatternSpec {
            id: "instruction_override",
            pattern: r"(?i)\b(?:ignore|disregard|forget|override|skip)\s+(?:all\s+|any\s+|the\s+|your\s+)*(?:previous|prior|above|earlier|preceding|original)\s+(?:instructions?|prompts?|rules?|directions?|guidelines?)",
            severity: RiskLevel::High,
            description: "Attempt to override previous instructions",
            recommendation: "Reject the request or strip the override phrase",
            validate: None,
        },
        PatternSpec {
            id: "forget_everything",
            pattern: r"(?i)\bforget\s+(?:everything|all)\s+(?:you\s+(?:were|have\s+been)\s+told|above|before)",
            severity: RiskLevel::High,
            description: "Attempt to reset the assistant's context",
            recommendation: "Reject the request",
            validate: None,
        },
        PatternSpec {
            id: "system_prompt_extraction",
            pattern: r"(?i)\b(?:reveal|show|print|repeat|output|display|leak|tell\s+me)\s+(?:me\s+)?(?:your|the)\s+(?:full\s+|entire\s+|original\s+)?(?:system\s+prompt|initial\s+instructions|hidden\s+instructions|system\s+message)",
            severity: RiskLevel::High,
            description: "Attempt to extract the system prompt",
            recommendation: "Reject the request",
            validate: None,
        },
        PatternSpec {
            id: "template_tokens",
            pattern: r"(?i)\[/?INST\]|<<SYS>>|<\|im_start\|>|<\|im_end\|>|<\|system\|>|<\|endoftext\|>",
            severity: RiskLevel::High,
            description: "Chat template control tokens in user content",
            recommendation: "Strip control tokens before forwarding",
            validate: None,
        },
        PatternSpec {
            id: "safety_bypass",
            pattern: r"(?i)\b(?:do\s+anything\s+now|jailbreak(?:ed)?|developer\s+mode|bypass\s+(?:your\s+|all\s+|the\s+)?(?:safety|content\s+policy|filters?|guidelines|restrictions)|without\s+(?:any\s+)?(?:restrictions|filters|censorship))\b",
            severity: RiskLevel::High,
            description: "Attempt to disable safety behaviour",
            recommendation: "Reject the request",
            validate: None,
        },
        PatternSpec {
            id: "role_hijack",
            pattern: r"(?i)\b(?:you\s+are\s+now|from\s+now\s+on,?\s+you\s+are|pretend\s+(?:to\s+be|you\s+are)|act\s+as\s+if\s+you\s+(?:are|were)|roleplay\s+as)\b",
            severity: RiskLevel::Medium,
            description: "Attempt to reassign the assistant's role",
            recommendation: "Review the request",
            validate: None,
        },
        PatternSpec {
            id: "fake_role_marker",
            pattern: r"(?im)^\s*(?:system|assistant)\s*:",
            severity: RiskLevel::Medium,
            description: "Role marker embedded in message text",
            recommendation: "Review the request",
            validate: None,
        },
    ]
}

impl SecurityPlugin for PromptInjectionDetector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Detects instruction overrides, role hijacking and system prompt extraction"
    }

    fn check(&self, messages: &[Message]) -> Result<Vec<Finding>> {
        let mut findings = self.detector.scan(messages);
        // Several techniques in one request are treated as a deliberate attack.
        if findings.len() >= 2 {
            findings.push(
                Finding::new(
                    Self::NAME,
                    FindingCategory::PromptInjection,
                    RiskLevel::Critical,
                    format!("{} injection techniques combined", findings.len()),
                )
                .with_recommendation("Reject the request"),
            );
        }
        Ok(findings)
    }
}

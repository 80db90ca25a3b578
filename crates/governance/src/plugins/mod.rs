//! Built-in security plugins.
//!
//! Pattern-based detectors share [`PatternDetector`]; each plugin module
//! supplies its own rule table.

mod code_injection;
mod moderation;
mod pii;
mod prompt_injection;
mod secrets;

pub use code_injection::CodeInjectionDetector;
pub use moderation::ModerationPlugin;
pub use pii::PiiScanner;
pub use prompt_injection::PromptInjectionDetector;
pub use secrets::SecretsScanner;

use aegis_core::{Error, Finding, FindingCategory, Message, Result, RiskLevel};
use regex::Regex;

use crate::security::Plugin;

/// Names of the built-in pattern plugins, in registration order.
pub const BUILTIN_PLUGINS: [&str; 4] = [
    PromptInjectionDetector::NAME,
    PiiScanner::NAME,
    SecretsScanner::NAME,
    CodeInjectionDetector::NAME,
];

/// Instantiate every built-in pattern plugin.
pub fn builtin_plugins() -> Result<Vec<Plugin>> {
    Ok(vec![
        Plugin::sync(PromptInjectionDetector::new()?),
        Plugin::sync(PiiScanner::new()?),
        Plugin::sync(SecretsScanner::new()?),
        Plugin::sync(CodeInjectionDetector::new()?),
    ])
}

/// Instantiate a built-in pattern plugin by name.
pub fn builtin_plugin(name: &str) -> Result<Plugin> {
    match name {
        PromptInjectionDetector::NAME => Ok(Plugin::sync(PromptInjectionDetector::new()?)),
        PiiScanner::NAME => Ok(Plugin::sync(PiiScanner::new()?)),
        SecretsScanner::NAME => Ok(Plugin::sync(SecretsScanner::new()?)),
        CodeInjectionDetector::NAME => Ok(Plugin::sync(CodeInjectionDetector::new()?)),
        other => Err(Error::config(format!("unknown security plugin '{}'", other))),
    }
}

// =============================================================================
// Pattern Detector
// =============================================================================

/// How a matched excerpt is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Excerpt {
    /// Report the match as-is.
    Verbatim,
    /// Keep a short prefix, mask the rest.
    Redacted,
}

/// One rule of a pattern table.
pub(crate) struct PatternSpec {
    pub id: &'static str,
    pub pattern: &'static str,
    pub severity: RiskLevel,
    pub description: &'static str,
    pub recommendation: &'static str,
    /// Extra check applied to each regex match.
    pub validate: Option<fn(&str) -> bool>,
}

struct CompiledPattern {
    spec: PatternSpec,
    regex: Regex,
}

/// Regex rule table scanned against message text.
///
/// Each rule reports at most one finding per request.
pub(crate) struct PatternDetector {
    name: &'static str,
    category: FindingCategory,
    excerpt: Excerpt,
    patterns: Vec<CompiledPattern>,
}

impl PatternDetector {
    pub fn new(
        name: &'static str,
        category: FindingCategory,
        excerpt: Excerpt,
        specs: Vec<PatternSpec>,
    ) -> Result<Self> {
        let patterns = specs
            .into_iter()
            .map(|spec| {
                Regex::new(spec.pattern)
                    .map(|regex| CompiledPattern { spec, regex })
                    .map_err(|e| Error::config(format!("{}: invalid pattern: {}", name, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            category,
            excerpt,
            patterns,
        })
    }

    /// Scan every message and return one finding per matched rule.
    pub fn scan(&self, messages: &[Message]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for compiled in &self.patterns {
            let hit = messages.iter().find_map(|m| {
                let text = m.text();
                compiled
                    .regex
                    .find_iter(&text)
                    .map(|mat| mat.as_str())
                    .find(|s| compiled.spec.validate.map_or(true, |check| check(s)))
                    .map(str::to_string)
            });

            if let Some(matched) = hit {
                let excerpt = match self.excerpt {
                    Excerpt::Verbatim => truncate(&matched, 80),
                    Excerpt::Redacted => redact(&matched),
                };
                findings.push(
                    Finding::new(
                        self.name,
                        self.category,
                        compiled.spec.severity,
                        format!("{} ({})", compiled.spec.description, compiled.spec.id),
                    )
                    .with_matched_text(excerpt)
                    .with_recommendation(compiled.spec.recommendation),
                );
            }
        }
        findings
    }
}

/// Mask all but the first four characters.
pub(crate) fn redact(text: &str) -> String {
    let visible: String = text.chars().take(4).collect();
    let hidden = text.chars().count().saturating_sub(4).clamp(3, 12);
    format!("{}{}", visible, "*".repeat(hidden))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

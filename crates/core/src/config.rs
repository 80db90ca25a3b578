use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

use crate::types::{BudgetPeriod, PolicyRule, ScopeType, DEFAULT_BLOCK_THRESHOLD};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub security: SecurityConfig,
    pub policy: PolicyConfig,
    pub budget: BudgetConfig,
    pub router: RouterConfig,
    pub pricing: Vec<PricingEntry>,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

// =============================================================================
// Security
// =============================================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    /// Run plugins concurrently.
    pub parallel: bool,
    /// Per-plugin timeout.
    pub timeout_ms: u64,
    /// Treat failed or timed-out plugins as "no findings".
    pub fail_open: bool,
    /// Risk score at or above which a request is blocked.
    pub block_threshold: f64,
    /// Only these plugins run when set.
    pub enabled_plugins: Option<Vec<String>>,
    /// Optional external moderation endpoint.
    pub moderation: Option<ModerationConfig>,
}

impl SecurityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            timeout_ms: 2_000,
            fail_open: true,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            enabled_plugins: None,
            moderation: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModerationConfig {
    /// OpenAI-compatible moderation URL.
    pub endpoint: String,
    pub api_key: Option<Secret<String>>,
    #[serde(default)]
    pub model: Option<String>,
}

// =============================================================================
// Policy
// =============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PolicyConfig {
    /// Inline rules.
    pub rules: Vec<PolicyRule>,
    /// YAML file with additional rules.
    pub rules_path: Option<String>,
    /// Sliding window for the request rate counter.
    pub rate_window_secs: Option<u64>,
}

// =============================================================================
// Budget
// =============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BudgetConfig {
    pub budgets: Vec<BudgetDefinition>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetDefinition {
    pub scope_type: ScopeType,
    pub scope_id: String,
    #[serde(default)]
    pub period: BudgetPeriod,
    #[serde(default)]
    pub soft_limit: Option<f64>,
    pub hard_limit: f64,
}

// =============================================================================
// Router
// =============================================================================

/// Endpoint selection strategy.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Weighted,
    LeastLatency,
    Random,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RouterConfig {
    pub strategy: StrategyKind,
    /// Consecutive failures that open a circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before a trial request.
    pub recovery_time_secs: f64,
    pub retry: RetryConfig,
    pub routes: Vec<RouteDefinition>,
}

impl RouterConfig {
    pub fn recovery_time(&self) -> crate::Result<Duration> {
        seconds("router.recovery_time_secs", self.recovery_time_secs)
    }
}

/// Non-negative duration from a seconds value; negative values clamp to zero.
pub fn seconds(key: &str, secs: f64) -> crate::Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|e| crate::Error::config(format!("{} = {}: {}", key, secs, e)))
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::RoundRobin,
            failure_threshold: 5,
            recovery_time_secs: 30.0,
            retry: RetryConfig::default(),
            routes: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl RetryConfig {
    pub fn base_delay(&self) -> crate::Result<Duration> {
        seconds("router.retry.base_delay_secs", self.base_delay_secs)
    }

    pub fn max_delay(&self) -> crate::Result<Duration> {
        seconds("router.retry.max_delay_secs", self.max_delay_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 30.0,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouteDefinition {
    /// Exact model id or glob ("gpt-4*", "*-embedding", "*").
    pub model_pattern: String,
    pub endpoints: Vec<EndpointDefinition>,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointDefinition {
    /// Provider adapter name.
    pub provider: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: u32,
}

// =============================================================================
// Pricing / Pipeline / Observability
// =============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct PricingEntry {
    /// Model id or glob.
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Completion tokens assumed when a request sets no `max_tokens`.
    pub default_completion_tokens: u32,
    /// Emit audit events.
    pub audit_enabled: bool,
    /// Also append audit events as JSON lines to this file.
    pub audit_log: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_completion_tokens: 512,
            audit_enabled: true,
            audit_log: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,aegis=debug".into(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    pub enabled: bool,
}

impl AppConfig {
    /// Layered load: `config/default`, `config/{AEGIS_ENV}`, `config/local`,
    /// then `AEGIS__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AEGIS_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("AEGIS").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load a single configuration file (format inferred from extension).
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("AEGIS").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.security.parallel);
        assert!(cfg.security.fail_open);
        assert_eq!(cfg.security.block_threshold, 0.8);
        assert_eq!(cfg.router.failure_threshold, 5);
        assert_eq!(cfg.router.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
router:
  strategy: weighted
  routes:
    - model_pattern: "gpt-4*"
      endpoints:
        - provider: openai
          weight: 70
        - provider: azure
          weight: 30
          priority: 1
budget:
  budgets:
    - scope_type: application
      scope_id: app-1
      period: daily
      soft_limit: 90
      hard_limit: 100
"#;
        let cfg: AppConfig = Config::builder()
            .add_source(File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.router.strategy, StrategyKind::Weighted);
        assert_eq!(cfg.router.failure_threshold, 5);
        assert_eq!(cfg.router.routes[0].endpoints[0].priority, 0);
        assert_eq!(cfg.budget.budgets[0].period, BudgetPeriod::Daily);
        assert_eq!(cfg.pipeline.default_completion_tokens, 512);
    }
}

//! Builder and configuration-driven composition of the pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::config::{AppConfig, PipelineConfig};
use aegis_core::{AuditSink, Clock, PolicySource, ProviderAdapter, RateCounter, Result, SystemClock};
use aegis_governance::{
    BudgetTracker, CompositeAuditSink, GuardConfig, JsonlAuditSink, PolicyEngine,
    SecurityGuard, SlidingWindowRateCounter, StaticPolicySource, TracingAuditSink,
};
use aegis_model_gateway::{PricingRegistry, Router};

use crate::pipeline::GovernancePipeline;

/// Builder for constructing a [`GovernancePipeline`].
///
/// Only the router is required. Unset components default to the built-in
/// plugins, an empty rule set, in-memory budgets and default pricing.
pub struct PipelineBuilder {
    config: PipelineConfig,
    router: Arc<Router>,
    guard: Option<Arc<SecurityGuard>>,
    policy_source: Option<Arc<dyn PolicySource>>,
    rate_counter: Option<Arc<dyn RateCounter>>,
    budget: Option<Arc<BudgetTracker>>,
    pricing: Option<Arc<PricingRegistry>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            config: PipelineConfig::default(),
            router,
            guard: None,
            policy_source: None,
            rate_counter: None,
            budget: None,
            pricing: None,
            audit: None,
            clock: None,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_guard(mut self, guard: Arc<SecurityGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_policy_source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.policy_source = Some(source);
        self
    }

    pub fn with_rate_counter(mut self, counter: Arc<dyn RateCounter>) -> Self {
        self.rate_counter = Some(counter);
        self
    }

    pub fn with_budget(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingRegistry>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Clock used for policy time windows and audit timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<GovernancePipeline> {
        let guard = match self.guard {
            Some(guard) => guard,
            None => Arc::new(SecurityGuard::with_builtin_plugins(GuardConfig::default())?),
        };
        Ok(GovernancePipeline {
            guard,
            policy: PolicyEngine::new(),
            policy_source: self
                .policy_source
                .unwrap_or_else(|| Arc::new(StaticPolicySource::new(Vec::new()))),
            rate_counter: self
                .rate_counter
                .unwrap_or_else(|| Arc::new(SlidingWindowRateCounter::default())),
            budget: self
                .budget
                .unwrap_or_else(|| Arc::new(BudgetTracker::in_memory())),
            router: self.router,
            pricing: self
                .pricing
                .unwrap_or_else(|| Arc::new(PricingRegistry::with_defaults())),
            audit: self.audit,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
        })
    }
}

impl GovernancePipeline {
    pub fn builder(router: Arc<Router>) -> PipelineBuilder {
        PipelineBuilder::new(router)
    }

    /// Compose a pipeline from configuration and named provider adapters.
    pub async fn from_config(
        config: &AppConfig,
        adapters: &HashMap<String, Arc<dyn ProviderAdapter>>,
    ) -> Result<Self> {
        let guard = SecurityGuard::from_config(&config.security)?;

        let policy_source = match &config.policy.rules_path {
            Some(path) => {
                let source = StaticPolicySource::load(path)?;
                source.merge(config.policy.rules.clone());
                source
            }
            None => StaticPolicySource::new(config.policy.rules.clone()),
        };
        let rate_window = Duration::from_secs(config.policy.rate_window_secs.unwrap_or(60));

        let budget = BudgetTracker::in_memory();
        budget.configure(&config.budget.budgets).await?;

        let router = Router::from_config(&config.router, adapters)?;

        let mut builder = Self::builder(Arc::new(router))
            .with_config(config.pipeline.clone())
            .with_guard(Arc::new(guard))
            .with_policy_source(Arc::new(policy_source))
            .with_rate_counter(Arc::new(SlidingWindowRateCounter::new(rate_window)))
            .with_budget(Arc::new(budget))
            .with_pricing(Arc::new(PricingRegistry::from_entries(&config.pricing)));

        if config.pipeline.audit_enabled {
            let sink: Arc<dyn AuditSink> = match &config.pipeline.audit_log {
                Some(path) => Arc::new(CompositeAuditSink::new(vec![
                    Arc::new(TracingAuditSink),
                    Arc::new(JsonlAuditSink::new(path)),
                ])),
                None => Arc::new(TracingAuditSink),
            };
            builder = builder.with_audit_sink(sink);
        }

        let pipeline = builder.build()?;
        tracing::info!(
            plugins = pipeline.guard().plugins().len(),
            budgets = config.budget.budgets.len(),
            routes = config.router.routes.len(),
            "Governance pipeline composed"
        );
        Ok(pipeline)
    }
}

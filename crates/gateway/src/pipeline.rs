//! Request governance pipeline.
//!
//! ```text
//! RECEIVED → SECURITY_CHECKED → POLICY_EVALUATED → BUDGET_CHECKED → ROUTED → COMPLETED
//!     │              │                  │                  │            │
//!     └──────────────┴──► BLOCKED       └──► BUDGET_EXCEEDED            └──► FAILED
//! ```
//!
//! Stages run strictly in order and the first short-circuit wins. WARN-level
//! policy and budget conditions are attached to the outcome and never block.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use aegis_core::config::PipelineConfig;
use aegis_core::{
    AuditEvent, AuditSink, BudgetCheckSummary, BudgetRecord, BudgetScope, Clock, Decision, Error,
    Finding, NormalizedResponse, PolicyAction, PolicyDecision, PolicyInput, PolicySource,
    RateCounter, RequestContext, RequestKind, Result, RiskAssessment, RiskLevel,
};
use aegis_governance::{
    spawn_emit, track_decision, track_spend, BudgetTracker, PolicyEngine, SecurityGuard,
};
use aegis_model_gateway::{PricingRegistry, Router};

// =============================================================================
// Outcome Types
// =============================================================================

/// Pipeline state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Received,
    SecurityChecked,
    PolicyEvaluated,
    BudgetChecked,
    Routed,
    Completed,
    Blocked,
    BudgetExceeded,
    /// Allowed, but no provider served it.
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "RECEIVED",
            Self::SecurityChecked => "SECURITY_CHECKED",
            Self::PolicyEvaluated => "POLICY_EVALUATED",
            Self::BudgetChecked => "BUDGET_CHECKED",
            Self::Routed => "ROUTED",
            Self::Completed => "COMPLETED",
            Self::Blocked => "BLOCKED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Blocked | Self::BudgetExceeded | Self::Failed
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intermediate results, attached when the request asks for debug output.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionTrail {
    pub stages: Vec<Stage>,
    pub assessment: Option<RiskAssessment>,
    pub policy: Option<PolicyDecision>,
    pub budget_check: Option<BudgetCheckSummary>,
    /// Budget records of the request's scopes after the decision.
    pub budget_snapshot: Vec<BudgetRecord>,
    pub provider: Option<String>,
    pub latency_ms: u64,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
}

/// Result of one pipeline execution.
#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub decision: Decision,
    /// Terminal stage.
    pub stage: Stage,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<NormalizedResponse>,
    pub provider: Option<String>,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub findings: Vec<Finding>,
    pub matched_rules: Vec<String>,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
    /// Why the request stopped, for BLOCKED, BUDGET_EXCEEDED and FAILED.
    #[serde(
        serialize_with = "serialize_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<Error>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail: Option<DecisionTrail>,
}

impl PipelineOutcome {
    /// Whether the request was (or in a dry run, would be) let through.
    pub fn is_allowed(&self) -> bool {
        matches!(self.decision, Decision::Allow | Decision::Warn)
    }

    /// The provider response, or the error that stopped the request.
    ///
    /// Dry runs that pass yield `Ok(None)`.
    pub fn into_response(self) -> Result<Option<NormalizedResponse>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

fn serialize_error<S: Serializer>(
    error: &Option<Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => ErrorBody {
            code: e.code(),
            message: e.to_string(),
        }
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}

// =============================================================================
// Execution State
// =============================================================================

/// State of one request as it moves through the stages.
struct Execution {
    started: Instant,
    history: Vec<Stage>,
    assessment: Option<RiskAssessment>,
    policy: Option<PolicyDecision>,
    budget_check: Option<BudgetCheckSummary>,
    warnings: Vec<String>,
    estimated_cost: f64,
}

impl Execution {
    fn start(request_id: &str) -> Self {
        let mut exec = Self {
            started: Instant::now(),
            history: Vec::with_capacity(6),
            assessment: None,
            policy: None,
            budget_check: None,
            warnings: Vec::new(),
            estimated_cost: 0.0,
        };
        exec.advance(request_id, Stage::Received);
        exec
    }

    fn advance(&mut self, request_id: &str, stage: Stage) {
        tracing::debug!(request_id = %request_id, stage = %stage, "Pipeline stage");
        self.history.push(stage);
    }

    fn passing_decision(&self) -> Decision {
        if self.warnings.is_empty() {
            Decision::Allow
        } else {
            Decision::Warn
        }
    }
}

/// How an execution ends.
struct Ending {
    decision: Decision,
    stage: Stage,
    response: Option<NormalizedResponse>,
    actual_cost: Option<f64>,
    error: Option<Error>,
}

impl Ending {
    fn stopped(decision: Decision, stage: Stage, error: Error) -> Self {
        Self {
            decision,
            stage,
            response: None,
            actual_cost: None,
            error: Some(error),
        }
    }
}

// =============================================================================
// Governance Pipeline
// =============================================================================

/// Orchestrates security, policy, budget and routing for each request.
///
/// Shared state (budget records, endpoint health, rate windows) lives in the
/// injected components; one pipeline serves many concurrent requests.
pub struct GovernancePipeline {
    pub(crate) guard: Arc<SecurityGuard>,
    pub(crate) policy: PolicyEngine,
    pub(crate) policy_source: Arc<dyn PolicySource>,
    pub(crate) rate_counter: Arc<dyn RateCounter>,
    pub(crate) budget: Arc<BudgetTracker>,
    pub(crate) router: Arc<Router>,
    pub(crate) pricing: Arc<PricingRegistry>,
    pub(crate) audit: Option<Arc<dyn AuditSink>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: PipelineConfig,
}

impl GovernancePipeline {
    pub fn guard(&self) -> &SecurityGuard {
        &self.guard
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn pricing(&self) -> &PricingRegistry {
        &self.pricing
    }

    /// Estimated cost: prompt estimate plus `max_tokens` (or the configured
    /// default) completion tokens. Embeddings have no completion.
    pub fn estimate_cost(&self, ctx: &RequestContext) -> f64 {
        let prompt_tokens = ctx.estimated_prompt_tokens();
        let completion_tokens = match ctx.kind {
            RequestKind::Embedding => 0,
            RequestKind::Completion => u64::from(
                ctx.max_tokens
                    .unwrap_or(self.config.default_completion_tokens),
            ),
        };
        self.pricing
            .estimate_cost(&ctx.model, prompt_tokens, completion_tokens)
    }

    /// Run one request through every stage.
    ///
    /// Governance decisions (blocked, budget exceeded, provider failure) are
    /// returned as outcomes. `Err` means the request was invalid or a
    /// collaborator (policy source, budget store) failed, including a spend
    /// that could not be recorded after the provider answered.
    pub async fn process(&self, mut ctx: RequestContext) -> Result<PipelineOutcome> {
        if let Err(e) = ctx.validate() {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "Rejected invalid request");
            return Err(e);
        }
        ctx.ensure_request_id();
        let mut exec = Execution::start(&ctx.request_id);

        // Security
        let assessment = match self.guard.assess(&ctx.messages).await {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    error = %e,
                    "Security screening failed closed"
                );
                let error = Error::SecurityBlocked {
                    risk_level: RiskLevel::Critical,
                    risk_score: RiskLevel::Critical.score(),
                    findings: Vec::new(),
                    reason: Some(e.to_string()),
                };
                return Ok(self
                    .finish(&ctx, exec, Ending::stopped(Decision::Blocked, Stage::Blocked, error))
                    .await);
            }
        };
        if !assessment.safe {
            let error = Error::SecurityBlocked {
                risk_level: assessment.risk_level,
                risk_score: assessment.risk_score,
                findings: assessment.findings.clone(),
                reason: None,
            };
            exec.assessment = Some(assessment);
            return Ok(self
                .finish(&ctx, exec, Ending::stopped(Decision::Blocked, Stage::Blocked, error))
                .await);
        }
        exec.assessment = Some(assessment);
        exec.advance(&ctx.request_id, Stage::SecurityChecked);

        // Policy
        let rules = self.policy_source.rules_for(&ctx.application_id).await?;
        let recent_requests = self.count_request(&ctx).await?;
        let input = PolicyInput::new(&ctx, recent_requests, self.clock.now());
        let decision = self.policy.evaluate(&input, &rules);
        if decision.is_denied() {
            let rule_id = decision.matched_rules.first().cloned().unwrap_or_default();
            let rule_name = rules
                .iter()
                .find(|r| r.id == rule_id)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| rule_id.clone());
            let error = Error::PolicyDenied {
                rule_id,
                rule_name,
                reason: decision.reasons.first().cloned().unwrap_or_default(),
            };
            exec.policy = Some(decision);
            return Ok(self
                .finish(&ctx, exec, Ending::stopped(Decision::Blocked, Stage::Blocked, error))
                .await);
        }
        if decision.action == PolicyAction::Warn {
            exec.warnings.extend(decision.reasons.iter().cloned());
        }
        exec.policy = Some(decision);
        exec.advance(&ctx.request_id, Stage::PolicyEvaluated);

        // Budget
        let scopes = ctx.budget_scopes();
        exec.estimated_cost = self.estimate_cost(&ctx);
        let summary = self.budget.check_all(&scopes, exec.estimated_cost).await?;
        exec.warnings.extend(summary.warnings.iter().cloned());
        if let Some(blocking) = summary.blocking() {
            let error = Error::BudgetExceeded {
                scope_type: blocking.scope.scope_type,
                scope_id: blocking.scope.scope_id.clone(),
                hard_limit: blocking.hard_limit.unwrap_or_default(),
                current_spend: blocking.current_spend,
                estimated_cost: blocking.estimated_cost,
            };
            exec.budget_check = Some(summary);
            return Ok(self
                .finish(
                    &ctx,
                    exec,
                    Ending::stopped(Decision::BudgetExceeded, Stage::BudgetExceeded, error),
                )
                .await);
        }
        exec.budget_check = Some(summary);
        exec.advance(&ctx.request_id, Stage::BudgetChecked);

        if ctx.dry_run {
            let decision = exec.passing_decision();
            let ending = Ending {
                decision,
                stage: Stage::Completed,
                response: None,
                actual_cost: None,
                error: None,
            };
            return Ok(self.finish(&ctx, exec, ending).await);
        }

        // Routing
        let response = match self.dispatch(&ctx).await {
            Ok(response) => response,
            Err(e) => {
                return Ok(self
                    .finish(&ctx, exec, Ending::stopped(Decision::Failed, Stage::Failed, e))
                    .await);
            }
        };
        exec.advance(&ctx.request_id, Stage::Routed);

        let actual_cost = self.pricing.cost_of(&ctx.model, &response);
        self.record_spend(&ctx, scopes, actual_cost, &response).await?;

        let ending = Ending {
            decision: exec.passing_decision(),
            stage: Stage::Completed,
            response: Some(response),
            actual_cost: Some(actual_cost),
            error: None,
        };
        Ok(self.finish(&ctx, exec, ending).await)
    }

    /// [`process`](Self::process), abandoned as soon as `cancel` resolves.
    ///
    /// An abandoned provider call counts as an endpoint failure and records
    /// no spend.
    pub async fn process_with_cancel<F>(
        &self,
        mut ctx: RequestContext,
        cancel: F,
    ) -> Result<PipelineOutcome>
    where
        F: Future<Output = ()>,
    {
        let request_id = ctx.ensure_request_id().to_string();
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!(request_id = %request_id, "Request cancelled by caller");
                Err(Error::Cancelled)
            }
            outcome = self.process(ctx) => outcome,
        }
    }

    /// Count this request in the application's rate window. Dry runs only
    /// read the window.
    async fn count_request(&self, ctx: &RequestContext) -> Result<u64> {
        if ctx.dry_run {
            Ok(self.rate_counter.current(&ctx.application_id).await? + 1)
        } else {
            self.rate_counter.hit(&ctx.application_id).await
        }
    }

    async fn dispatch(&self, ctx: &RequestContext) -> Result<NormalizedResponse> {
        match ctx.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.router.dispatch(ctx))
                .await
                .map_err(|_| Error::Timeout(format!("provider call exceeded {}ms", ms)))?,
            None => self.router.dispatch(ctx).await,
        }
    }

    /// Charge every scope. Runs on its own task so that a caller
    /// cancelling after the provider answered cannot leave a partial charge.
    async fn record_spend(
        &self,
        ctx: &RequestContext,
        scopes: Vec<BudgetScope>,
        cost: f64,
        response: &NormalizedResponse,
    ) -> Result<()> {
        let budget = Arc::clone(&self.budget);
        let task = tokio::spawn(async move { budget.record_all(&scopes, cost).await });
        let records = task
            .await
            .map_err(|e| Error::internal(format!("spend recording task failed: {}", e)))
            .and_then(|recorded| recorded);
        let records = match records {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    cost,
                    error = %e,
                    "Failed to record spend"
                );
                return Err(e);
            }
        };
        tracing::debug!(
            request_id = %ctx.request_id,
            cost,
            scopes = records.len(),
            "Recorded spend"
        );
        track_spend(
            &ctx.application_id,
            &ctx.model,
            cost,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
        );
        Ok(())
    }

    async fn budget_snapshot(&self, ctx: &RequestContext) -> Vec<BudgetRecord> {
        let mut records = Vec::new();
        for scope in ctx.budget_scopes() {
            match self.budget.get(&scope).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    request_id = %ctx.request_id,
                    scope = %scope,
                    error = %e,
                    "Failed to read budget for debug trail"
                ),
            }
        }
        records
    }

    async fn finish(&self, ctx: &RequestContext, exec: Execution, end: Ending) -> PipelineOutcome {
        let latency = exec.started.elapsed();
        let latency_ms = latency.as_millis() as u64;
        let mut history = exec.history;
        history.push(end.stage);

        let findings = exec
            .assessment
            .as_ref()
            .map(|a| a.findings.clone())
            .unwrap_or_default();
        let matched_rules = exec
            .policy
            .as_ref()
            .map(|p| p.matched_rules.clone())
            .unwrap_or_default();
        let provider = end.response.as_ref().map(|r| r.provider.clone());

        match (&end.error, end.decision) {
            (Some(error), Decision::Failed) => tracing::error!(
                request_id = %ctx.request_id,
                application_id = %ctx.application_id,
                model = %ctx.model,
                code = error.code(),
                error = %error,
                latency_ms,
                "Request failed"
            ),
            (Some(error), decision) => tracing::warn!(
                request_id = %ctx.request_id,
                application_id = %ctx.application_id,
                model = %ctx.model,
                decision = %decision,
                code = error.code(),
                reason = %error,
                dry_run = ctx.dry_run,
                "Request stopped"
            ),
            (None, decision) => tracing::info!(
                request_id = %ctx.request_id,
                application_id = %ctx.application_id,
                model = %ctx.model,
                decision = %decision,
                provider = ?provider,
                cost = ?end.actual_cost,
                warnings = exec.warnings.len(),
                dry_run = ctx.dry_run,
                latency_ms,
                "Request completed"
            ),
        }
        track_decision(&ctx.application_id, end.decision, latency.as_secs_f64());

        if self.config.audit_enabled {
            if let Some(sink) = &self.audit {
                spawn_emit(
                    Arc::clone(sink),
                    AuditEvent {
                        request_id: ctx.request_id.clone(),
                        timestamp: self.clock.now(),
                        application_id: ctx.application_id.clone(),
                        model: ctx.model.clone(),
                        decision: end.decision,
                        findings: findings.clone(),
                        matched_rules: matched_rules.clone(),
                        cost: end.actual_cost,
                        latency_ms,
                        provider: provider.clone(),
                        dry_run: ctx.dry_run,
                        error_code: end.error.as_ref().map(|e| e.code().to_string()),
                    },
                );
            }
        }

        let trail = if ctx.debug {
            Some(DecisionTrail {
                stages: history,
                assessment: exec.assessment,
                policy: exec.policy,
                budget_check: exec.budget_check,
                budget_snapshot: self.budget_snapshot(ctx).await,
                provider: provider.clone(),
                latency_ms,
                estimated_cost: exec.estimated_cost,
                actual_cost: end.actual_cost,
            })
        } else {
            None
        };

        PipelineOutcome {
            request_id: ctx.request_id.clone(),
            decision: end.decision,
            stage: end.stage,
            dry_run: ctx.dry_run,
            response: end.response,
            provider,
            estimated_cost: exec.estimated_cost,
            actual_cost: end.actual_cost,
            findings,
            matched_rules,
            warnings: exec.warnings,
            latency_ms,
            error: end.error,
            trail,
        }
    }
}

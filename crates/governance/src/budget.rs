//! Spend budgets per application, user, organization and feature.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use aegis_core::config::BudgetDefinition;
use aegis_core::{
    BudgetCheckResult, BudgetCheckSummary, BudgetRecord, BudgetScope, BudgetStore, Clock, Error,
    Result, SystemClock,
};

// =============================================================================
// In-memory Store
// =============================================================================

/// Budget store backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryBudgetStore {
    records: DashMap<BudgetScope, BudgetRecord>,
}

impl InMemoryBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetStore for InMemoryBudgetStore {
    async fn get(&self, scope: &BudgetScope) -> Result<Option<BudgetRecord>> {
        Ok(self.records.get(scope).map(|r| r.value().clone()))
    }

    async fn put(&self, record: BudgetRecord) -> Result<()> {
        self.records.insert(record.scope.clone(), record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BudgetRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }
}

// =============================================================================
// Budget Tracker
// =============================================================================

/// Pre-call budget checks and post-call spend accounting.
///
/// Read-modify-write on a scope is serialized by a per-scope lock, so
/// concurrent `record` calls never lose updates. Scopes without a record
/// are unlimited. Period roll-over happens lazily on first access after
/// the window ends.
pub struct BudgetTracker {
    store: Arc<dyn BudgetStore>,
    locks: DashMap<BudgetScope, Arc<Mutex<()>>>,
    clock: Arc<dyn Clock>,
}

impl BudgetTracker {
    pub fn new(store: Arc<dyn BudgetStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Tracker over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryBudgetStore::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock_for(&self, scope: &BudgetScope) -> Arc<Mutex<()>> {
        self.locks.entry(scope.clone()).or_default().clone()
    }

    /// Create or replace the budget of a scope, starting at zero spend.
    pub async fn set_budget(&self, definition: &BudgetDefinition) -> Result<BudgetRecord> {
        validate_limits(definition.soft_limit, definition.hard_limit)?;
        let scope = BudgetScope::new(definition.scope_type, definition.scope_id.clone());
        let record = BudgetRecord::new(
            scope.clone(),
            definition.period,
            definition.soft_limit,
            definition.hard_limit,
            self.clock.now(),
        );

        let lock = self.lock_for(&scope);
        let _guard = lock.lock().await;
        self.store.put(record.clone()).await?;
        tracing::info!(
            scope = %scope,
            hard_limit = record.hard_limit,
            soft_limit = ?record.soft_limit,
            period = ?record.period,
            "Budget configured"
        );
        Ok(record)
    }

    /// Configure every definition in order.
    pub async fn configure(&self, definitions: &[BudgetDefinition]) -> Result<()> {
        for definition in definitions {
            self.set_budget(definition).await?;
        }
        Ok(())
    }

    /// Load a scope's record under its lock, rolling the period if needed.
    async fn load_current(&self, scope: &BudgetScope) -> Result<Option<BudgetRecord>> {
        let Some(mut record) = self.store.get(scope).await? else {
            return Ok(None);
        };
        if record.roll_over(self.clock.now()) {
            tracing::info!(scope = %scope, period_start = %record.period_start, "Budget period rolled over");
            self.store.put(record.clone()).await?;
        }
        Ok(Some(record))
    }

    /// Check whether `estimated_cost` fits under the scope's hard limit.
    ///
    /// Warns when the projected spend passes the soft limit.
    pub async fn check(&self, scope: &BudgetScope, estimated_cost: f64) -> Result<BudgetCheckResult> {
        validate_cost(estimated_cost)?;

        if self.store.get(scope).await?.is_none() {
            return Ok(BudgetCheckResult::unlimited(scope.clone(), estimated_cost));
        }

        let lock = self.lock_for(scope);
        let _guard = lock.lock().await;
        let Some(record) = self.load_current(scope).await? else {
            return Ok(BudgetCheckResult::unlimited(scope.clone(), estimated_cost));
        };

        let projected = record.current_spend + estimated_cost;
        let proceed = projected <= record.hard_limit;
        let warning = if !proceed {
            Some(format!(
                "{} would exceed hard limit {:.4} (spent {:.4}, estimated {:.4})",
                scope, record.hard_limit, record.current_spend, estimated_cost
            ))
        } else {
            record.soft_limit.filter(|soft| projected > *soft).map(|soft| {
                format!(
                    "{} projected spend {:.4} exceeds soft limit {:.4}",
                    scope, projected, soft
                )
            })
        };

        if !proceed {
            tracing::warn!(scope = %scope, projected = projected, hard_limit = record.hard_limit, "Budget hard limit reached");
        }

        Ok(BudgetCheckResult {
            scope: scope.clone(),
            proceed,
            warning,
            current_spend: record.current_spend,
            estimated_cost,
            soft_limit: record.soft_limit,
            hard_limit: Some(record.hard_limit),
        })
    }

    /// Check every scope; the request proceeds only if all scopes allow it.
    pub async fn check_all(&self, scopes: &[BudgetScope], estimated_cost: f64) -> Result<BudgetCheckSummary> {
        let mut results = Vec::with_capacity(scopes.len());
        for scope in scopes {
            results.push(self.check(scope, estimated_cost).await?);
        }
        Ok(BudgetCheckSummary {
            proceed: results.iter().all(|r| r.proceed),
            warnings: results.iter().filter_map(|r| r.warning.clone()).collect(),
            results,
        })
    }

    /// Add `actual_cost` to a scope's spend.
    ///
    /// Returns `None` for scopes without a budget.
    pub async fn record(&self, scope: &BudgetScope, actual_cost: f64) -> Result<Option<BudgetRecord>> {
        validate_cost(actual_cost)?;

        if self.store.get(scope).await?.is_none() {
            return Ok(None);
        }

        let lock = self.lock_for(scope);
        let _guard = lock.lock().await;
        let Some(mut record) = self.load_current(scope).await? else {
            return Ok(None);
        };
        record.current_spend += actual_cost;
        self.store.put(record.clone()).await?;

        tracing::debug!(
            scope = %scope,
            cost = actual_cost,
            current_spend = record.current_spend,
            "Recorded spend"
        );
        Ok(Some(record))
    }

    /// Record spend against every scope with a budget.
    ///
    /// A failing scope does not stop the others from being charged; the
    /// first error is returned once every scope has been attempted.
    pub async fn record_all(&self, scopes: &[BudgetScope], actual_cost: f64) -> Result<Vec<BudgetRecord>> {
        let mut updated = Vec::new();
        let mut first_error = None;
        for scope in scopes {
            match self.record(scope, actual_cost).await {
                Ok(Some(record)) => updated.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(scope = %scope, cost = actual_cost, error = %e, "Failed to record spend");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(updated),
        }
    }

    /// Current record of a scope, after any pending roll-over.
    pub async fn get(&self, scope: &BudgetScope) -> Result<Option<BudgetRecord>> {
        if self.store.get(scope).await?.is_none() {
            return Ok(None);
        }
        let lock = self.lock_for(scope);
        let _guard = lock.lock().await;
        self.load_current(scope).await
    }

    /// All configured records.
    pub async fn snapshot(&self) -> Result<Vec<BudgetRecord>> {
        self.store.list().await
    }
}

fn validate_cost(cost: f64) -> Result<()> {
    if !cost.is_finite() || cost < 0.0 {
        return Err(Error::invalid_request(format!(
            "cost must be a non-negative number, got {}",
            cost
        )));
    }
    Ok(())
}

fn validate_limits(soft: Option<f64>, hard: f64) -> Result<()> {
    if !hard.is_finite() || hard < 0.0 {
        return Err(Error::config(format!("hard limit must be non-negative, got {}", hard)));
    }
    if let Some(soft) = soft {
        if !soft.is_finite() || soft < 0.0 || soft > hard {
            return Err(Error::config(format!(
                "soft limit {} must be between 0 and the hard limit {}",
                soft, hard
            )));
        }
    }
    Ok(())
}

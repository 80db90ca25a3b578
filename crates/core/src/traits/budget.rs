//! Budget record persistence.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BudgetRecord, BudgetScope};

/// Read/write accessor for budget records by scope.
///
/// Callers serialize read-modify-write per scope; implementations only need
/// individual `get`/`put` calls to be atomic.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Record for a scope, `None` when the scope has no budget.
    async fn get(&self, scope: &BudgetScope) -> Result<Option<BudgetRecord>>;

    /// Insert or replace a record.
    async fn put(&self, record: BudgetRecord) -> Result<()>;

    /// All records.
    async fn list(&self) -> Result<Vec<BudgetRecord>>;
}

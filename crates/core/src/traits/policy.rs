//! Policy rule source and rate counting.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PolicyRule;

/// Read accessor for the current rules of an application.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Rules that may apply to `application_id`, including unscoped rules.
    async fn rules_for(&self, application_id: &str) -> Result<Vec<PolicyRule>>;
}

/// Counter of recent requests per key, consulted by rate-limit rules.
#[async_trait]
pub trait RateCounter: Send + Sync {
    /// Count one request for `key` and return the count inside the window.
    async fn hit(&self, key: &str) -> Result<u64>;

    /// Count inside the window without recording a request.
    async fn current(&self, key: &str) -> Result<u64>;
}

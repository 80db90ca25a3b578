//! Upstream provider adapter.

use async_trait::async_trait;

use crate::types::{NormalizedResponse, ProviderError, RequestContext};

/// Adapter translating a normalized request to one upstream provider.
///
/// Dropping the returned future must abort the in-flight call.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identity (e.g. "openai", "azure-eastus").
    fn provider(&self) -> &str;

    /// Send the request upstream.
    async fn send(&self, request: &RequestContext) -> Result<NormalizedResponse, ProviderError>;
}

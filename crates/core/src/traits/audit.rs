//! Audit/observability sink.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AuditEvent;

/// Receives one event per completed or blocked request.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<()>;
}

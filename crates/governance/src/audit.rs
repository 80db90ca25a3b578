//! Audit sinks for pipeline decisions.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use aegis_core::{AuditEvent, AuditSink, Decision, Error, Result};

/// Hand an event to a sink without blocking the caller.
///
/// Sink failures are logged and never reach the request.
pub fn spawn_emit(sink: Arc<dyn AuditSink>, event: AuditEvent) {
    tokio::spawn(async move {
        let request_id = event.request_id.clone();
        if let Err(e) = sink.emit(event).await {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to emit audit event");
        }
    });
}

/// Filter for querying in-memory audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub application_id: Option<String>,
    pub decision: Option<Decision>,
    pub limit: Option<usize>,
}

/// In-memory audit sink, queried with an [`AuditFilter`].
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                filter
                    .application_id
                    .as_ref()
                    .map_or(true, |a| &e.application_id == a)
                    && filter.decision.map_or(true, |d| e.decision == d)
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        result
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

/// Writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        tracing::info!(
            target: "aegis::audit",
            request_id = %event.request_id,
            application_id = %event.application_id,
            model = %event.model,
            decision = %event.decision,
            findings = event.findings.len(),
            matched_rules = ?event.matched_rules,
            cost = ?event.cost,
            provider = ?event.provider,
            latency_ms = event.latency_ms,
            dry_run = event.dry_run,
            error_code = ?event.error_code,
            "audit"
        );
        Ok(())
    }
}

/// Appends events as JSON lines to a file.
pub struct JsonlAuditSink {
    path: PathBuf,
    writer: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let _guard = self.writer.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::storage(format!("open {:?}: {}", self.path, e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| Error::storage(format!("write {:?}: {}", self.path, e)))?;
        file.flush()
            .await
            .map_err(|e| Error::storage(format!("flush {:?}: {}", self.path, e)))?;
        Ok(())
    }
}

/// Fans an event out to several sinks; the first failure is returned after
/// every sink has been tried.
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for CompositeAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#![deny(unused)]
//! Governance stages for Aegis.
//!
//! This crate provides:
//! - Security screening (pluggable detectors with timeout and fail-open)
//! - Policy evaluation (ordered ALLOW/WARN/DENY rules)
//! - Budget enforcement (per-scope soft/hard spend limits)
//! - Request rate counting
//! - Audit sinks
//! - Metrics and distributed tracing setup

pub mod audit;
pub mod budget;
pub mod metrics;
pub mod plugins;
pub mod policy;
pub mod rate;
pub mod security;
pub mod tracing_layer;

pub use audit::{
    spawn_emit, AuditFilter, CompositeAuditSink, InMemoryAuditSink, JsonlAuditSink,
    TracingAuditSink,
};
pub use budget::{BudgetTracker, InMemoryBudgetStore};
pub use metrics::{setup_metrics_recorder, track_decision, track_findings, track_spend};
pub use plugins::{
    builtin_plugin, builtin_plugins, CodeInjectionDetector, ModerationPlugin, PiiScanner,
    PromptInjectionDetector, SecretsScanner,
};
pub use policy::{PolicyEngine, PolicyFile, StaticPolicySource};
pub use rate::SlidingWindowRateCounter;
pub use security::{GuardConfig, Plugin, SecurityGuard};
pub use tracing_layer::configure_tracing;

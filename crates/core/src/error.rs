//! Error types for Aegis.

use thiserror::Error;

use crate::types::{Finding, ProviderError, RiskLevel, ScopeType};

/// Result type alias using Aegis's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Aegis.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Governance Errors
    // =========================================================================
    #[error("Request blocked by security screening: risk {risk_level} ({risk_score:.2}), {} finding(s){}", .findings.len(), .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    SecurityBlocked {
        risk_level: RiskLevel,
        risk_score: f64,
        findings: Vec<Finding>,
        /// Set when the block was caused by a plugin failure under fail-closed mode.
        reason: Option<String>,
    },

    #[error("Request denied by policy rule '{rule_name}' ({rule_id}): {reason}")]
    PolicyDenied {
        rule_id: String,
        rule_name: String,
        reason: String,
    },

    #[error("Budget exceeded for {scope_type} '{scope_id}': spent {current_spend:.4} + estimated {estimated_cost:.4} > hard limit {hard_limit:.4}")]
    BudgetExceeded {
        scope_type: ScopeType,
        scope_id: String,
        hard_limit: f64,
        current_spend: f64,
        estimated_cost: f64,
    },

    // =========================================================================
    // Security Plugin Errors
    // =========================================================================
    #[error("Security plugin '{plugin}' timed out after {timeout_ms}ms")]
    PluginTimeout { plugin: String, timeout_ms: u64 },

    #[error("Security plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    // =========================================================================
    // Routing Errors
    // =========================================================================
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("All endpoints unavailable for model '{model}' after {attempts} attempt(s){}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    AllEndpointsUnavailable {
        model: String,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("No route configured for model '{0}'")]
    NoRoute(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a plugin failure error.
    pub fn plugin(plugin: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "validation_error",
            Self::SecurityBlocked { .. } => "security_blocked",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::PluginTimeout { .. } => "plugin_timeout",
            Self::Plugin { .. } => "plugin_error",
            Self::Provider(e) if e.retryable => "provider_error_retryable",
            Self::Provider(_) => "provider_error",
            Self::AllEndpointsUnavailable { .. } => "all_endpoints_unavailable",
            Self::NoRoute(_) => "no_route",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config_error",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Whether the router may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.retryable,
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

//! Security plugin capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Finding, Message};

/// Self-description of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub is_async: bool,
}

/// Plugin whose check is pure computation.
///
/// Implementations must not mutate or retain `messages`.
pub trait SecurityPlugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    /// Inspect messages and report findings.
    fn check(&self, messages: &[Message]) -> Result<Vec<Finding>>;
}

/// Plugin whose check performs I/O (e.g. an external moderation endpoint).
#[async_trait]
pub trait AsyncSecurityPlugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    /// Inspect messages and report findings.
    async fn check_async(&self, messages: &[Message]) -> Result<Vec<Finding>>;
}

//! Security guard: runs detection plugins and aggregates their findings.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::config::SecurityConfig;
use aegis_core::{
    AsyncSecurityPlugin, Error, Finding, Message, PluginDescriptor, Result, RiskAssessment,
    SecurityPlugin, DEFAULT_BLOCK_THRESHOLD,
};

use crate::plugins::{builtin_plugins, ModerationPlugin};

// =============================================================================
// Plugin Handle
// =============================================================================

/// A registered plugin, tagged by execution capability.
#[derive(Clone)]
pub enum Plugin {
    /// Pure computation; scheduled on the blocking pool.
    Sync(Arc<dyn SecurityPlugin>),
    /// Performs I/O; awaited directly.
    Async(Arc<dyn AsyncSecurityPlugin>),
}

impl Plugin {
    pub fn sync(plugin: impl SecurityPlugin + 'static) -> Self {
        Self::Sync(Arc::new(plugin))
    }

    pub fn asynchronous(plugin: impl AsyncSecurityPlugin + 'static) -> Self {
        Self::Async(Arc::new(plugin))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Sync(p) => p.name(),
            Self::Async(p) => p.name(),
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        let (name, description, version, is_async) = match self {
            Self::Sync(p) => (p.name(), p.description(), p.version(), false),
            Self::Async(p) => (p.name(), p.description(), p.version(), true),
        };
        PluginDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            is_async,
        }
    }

    async fn run(&self, messages: Arc<[Message]>) -> Result<Vec<Finding>> {
        match self {
            Self::Sync(plugin) => {
                let plugin = Arc::clone(plugin);
                let name = plugin.name().to_string();
                tokio::task::spawn_blocking(move || plugin.check(&messages))
                    .await
                    .map_err(|e| Error::plugin(name, format!("task failed: {}", e)))?
            }
            Self::Async(plugin) => plugin.check_async(&messages).await,
        }
    }
}

// =============================================================================
// Security Guard
// =============================================================================

/// Runtime settings of the guard.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Run plugins concurrently.
    pub parallel: bool,
    /// Per-plugin timeout.
    pub timeout: Duration,
    /// Ignore failed plugins instead of failing the assessment.
    pub fail_open: bool,
    /// Score at or above which the assessment is unsafe.
    pub block_threshold: f64,
    /// Only these plugins run when set.
    pub enabled_plugins: Option<HashSet<String>>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            timeout: Duration::from_secs(2),
            fail_open: true,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            enabled_plugins: None,
        }
    }
}

impl From<&SecurityConfig> for GuardConfig {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            parallel: config.parallel,
            timeout: config.timeout(),
            fail_open: config.fail_open,
            block_threshold: config.block_threshold,
            enabled_plugins: config
                .enabled_plugins
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
        }
    }
}

/// Ordered plugin registry with the assessment entry point.
///
/// Registration happens at startup; `assess` only reads the registry.
pub struct SecurityGuard {
    plugins: Vec<Plugin>,
    config: GuardConfig,
}

impl SecurityGuard {
    /// Create an empty guard.
    pub fn new(config: GuardConfig) -> Self {
        Self {
            plugins: Vec::new(),
            config,
        }
    }

    /// Guard with every built-in pattern plugin registered.
    pub fn with_builtin_plugins(config: GuardConfig) -> Result<Self> {
        let mut guard = Self::new(config);
        for plugin in builtin_plugins()? {
            guard.register(plugin)?;
        }
        Ok(guard)
    }

    /// Built-in plugins plus the moderation plugin when configured.
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let mut guard = Self::with_builtin_plugins(GuardConfig::from(config))?;
        if let Some(moderation) = &config.moderation {
            guard.register(Plugin::asynchronous(ModerationPlugin::from_config(moderation)))?;
        }
        if let Some(enabled) = &guard.config.enabled_plugins {
            for name in enabled {
                if !guard.plugins.iter().any(|p| p.name() == name) {
                    tracing::warn!(plugin = %name, "Enabled plugin is not registered");
                }
            }
        }
        Ok(guard)
    }

    /// Register a plugin. Names must be unique.
    pub fn register(&mut self, plugin: Plugin) -> Result<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(Error::config(format!(
                "security plugin '{}' is already registered",
                plugin.name()
            )));
        }
        tracing::debug!(plugin = plugin.name(), "Registered security plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_plugin(mut self, plugin: Plugin) -> Result<Self> {
        self.register(plugin)?;
        Ok(self)
    }

    /// Descriptors of all registered plugins, in registration order.
    pub fn plugins(&self) -> Vec<PluginDescriptor> {
        self.plugins.iter().map(Plugin::descriptor).collect()
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    fn is_enabled(&self, plugin: &Plugin) -> bool {
        self.config
            .enabled_plugins
            .as_ref()
            .map_or(true, |enabled| enabled.contains(plugin.name()))
    }

    async fn run_one(&self, plugin: &Plugin, messages: Arc<[Message]>) -> Result<Vec<Finding>> {
        match tokio::time::timeout(self.config.timeout, plugin.run(messages)).await {
            Ok(result) => result,
            Err(_) => Err(Error::PluginTimeout {
                plugin: plugin.name().to_string(),
                timeout_ms: self.config.timeout.as_millis() as u64,
            }),
        }
    }

    /// Run enabled plugins over `messages` and aggregate the findings.
    ///
    /// Findings keep plugin registration order regardless of scheduling.
    /// Under fail-open, failed or timed-out plugins are listed in
    /// `skipped_plugins`; otherwise the first failure is returned.
    pub async fn assess(&self, messages: &[Message]) -> Result<RiskAssessment> {
        let active: Vec<&Plugin> = self.plugins.iter().filter(|p| self.is_enabled(p)).collect();
        if active.is_empty() {
            return Ok(RiskAssessment::from_findings(
                Vec::new(),
                self.config.block_threshold,
            ));
        }

        let shared: Arc<[Message]> = Arc::from(messages.to_vec());
        let mut outcomes = Vec::with_capacity(active.len());
        if self.config.parallel {
            let results =
                join_all(active.iter().map(|p| self.run_one(p, Arc::clone(&shared)))).await;
            outcomes.extend(active.iter().zip(results));
        } else {
            for plugin in &active {
                let result = self.run_one(plugin, Arc::clone(&shared)).await;
                let failed = result.is_err();
                outcomes.push((plugin, result));
                if failed && !self.config.fail_open {
                    break;
                }
            }
        }

        let mut findings = Vec::new();
        let mut skipped = Vec::new();
        for (plugin, outcome) in outcomes {
            match outcome {
                Ok(found) => findings.extend(found),
                Err(e) if self.config.fail_open => {
                    tracing::warn!(plugin = plugin.name(), error = %e, "Security plugin skipped");
                    skipped.push(plugin.name().to_string());
                }
                Err(e) => {
                    tracing::error!(plugin = plugin.name(), error = %e, "Security plugin failed");
                    return Err(e);
                }
            }
        }

        crate::metrics::track_findings(&findings);
        let mut assessment = RiskAssessment::from_findings(findings, self.config.block_threshold);
        assessment.skipped_plugins = skipped;

        tracing::debug!(
            risk_level = %assessment.risk_level,
            risk_score = assessment.risk_score,
            findings = assessment.findings.len(),
            skipped = assessment.skipped_plugins.len(),
            "Security assessment complete"
        );
        Ok(assessment)
    }
}

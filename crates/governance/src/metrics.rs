//! Metrics implementation using Prometheus.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use aegis_core::{Decision, Error, Finding, Result};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::config(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Count one pipeline decision and its end-to-end latency.
pub fn track_decision(application_id: &str, decision: Decision, latency_sec: f64) {
    metrics::counter!(
        "aegis_decisions_total",
        "application" => application_id.to_string(),
        "decision" => decision.as_str()
    )
    .increment(1);

    metrics::histogram!("aegis_request_duration_seconds", "decision" => decision.as_str())
        .record(latency_sec);
}

/// Count security findings by plugin and severity.
pub fn track_findings(findings: &[Finding]) {
    for finding in findings {
        metrics::counter!(
            "aegis_findings_total",
            "plugin" => finding.plugin.clone(),
            "category" => finding.category.as_str(),
            "severity" => finding.severity.to_string()
        )
        .increment(1);
    }
}

/// Track recorded spend (in micro-USD) and token usage.
pub fn track_spend(application_id: &str, model: &str, cost: f64, prompt: u64, completion: u64) {
    metrics::counter!("aegis_spend_total", "application" => application_id.to_string())
        .increment((cost * 1_000_000.0).round() as u64);
    metrics::counter!("aegis_token_usage_total", "model" => model.to_string(), "type" => "prompt")
        .increment(prompt);
    metrics::counter!("aegis_token_usage_total", "model" => model.to_string(), "type" => "completion")
        .increment(completion);
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::config::AppConfig;
use aegis_core::{BudgetScope, Decision, Error, Message, ProviderAdapter, RequestContext};
use aegis_gateway::{GovernancePipeline, Stage};
use aegis_model_gateway::{CircuitState, ScriptedProvider};
use serde_json::json;

fn config(overrides: serde_json::Value) -> anyhow::Result<AppConfig> {
    let mut base = json!({
        "policy": {
            "rules_path": "config/policies.yaml",
            "rules": [{
                "id": "large-completions",
                "name": "Hard completion cap",
                "priority": 50,
                "action": "deny",
                "conditions": { "type": "token_limit", "max_tokens": 4000 }
            }]
        },
        "budget": {
            "budgets": [{ "scope_type": "application", "scope_id": "web", "hard_limit": 10.0 }]
        },
        "router": {
            "failure_threshold": 2,
            "recovery_time_secs": 30,
            "retry": { "max_retries": 2, "base_delay_secs": 0.0, "max_delay_secs": 0.0, "jitter": false },
            "routes": [{
                "model_pattern": "gpt-*",
                "endpoints": [{ "provider": "primary" }, { "provider": "backup", "priority": 1 }]
            }]
        },
        "pricing": [{ "model": "gpt-4o", "input_cost_per_1k": 1.0, "output_cost_per_1k": 1.0 }],
        "pipeline": { "audit_enabled": false }
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), overrides.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    Ok(serde_json::from_value(base)?)
}

fn adapters(
    primary: &Arc<ScriptedProvider>,
    backup: &Arc<ScriptedProvider>,
) -> HashMap<String, Arc<dyn ProviderAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert("primary".into(), primary.clone());
    adapters.insert("backup".into(), backup.clone());
    adapters
}

fn request(model: &str) -> RequestContext {
    RequestContext::new(model, "web", vec![Message::user("Draft a status update")])
}

#[tokio::test]
async fn test_configured_pipeline_fails_over_and_charges() -> anyhow::Result<()> {
    let primary = Arc::new(ScriptedProvider::failing("primary"));
    let backup = Arc::new(ScriptedProvider::healthy("backup"));
    let pipeline =
        GovernancePipeline::from_config(&config(json!({}))?, &adapters(&primary, &backup)).await?;

    for _ in 0..3 {
        let outcome = pipeline.process(request("gpt-4o")).await?;
        assert_eq!(outcome.decision, Decision::Allow);
        assert_eq!(outcome.provider.as_deref(), Some("backup"));
        assert!((outcome.actual_cost.unwrap() - 0.015).abs() < 1e-9);
    }
    // The primary circuit opened after two failures.
    assert_eq!(primary.calls(), 2);
    assert_eq!(backup.calls(), 3);

    let health = pipeline.router().get_health_status();
    let primary_health = health[0]
        .endpoints
        .iter()
        .find(|e| e.provider == "primary")
        .unwrap();
    assert!(!primary_health.healthy);
    assert_eq!(primary_health.circuit_state, CircuitState::Open);

    let spent = pipeline
        .budget()
        .get(&BudgetScope::application("web"))
        .await?
        .unwrap()
        .current_spend;
    assert!((spent - 0.045).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_inline_rules_override_policy_file() -> anyhow::Result<()> {
    let primary = Arc::new(ScriptedProvider::healthy("primary"));
    let backup = Arc::new(ScriptedProvider::healthy("backup"));
    let pipeline =
        GovernancePipeline::from_config(&config(json!({}))?, &adapters(&primary, &backup)).await?;

    // File rule: opus is staging only.
    let opus = pipeline.process(request("claude-3-opus-20240229")).await?;
    assert_eq!(opus.decision, Decision::Blocked);
    assert_eq!(opus.matched_rules, vec!["no-opus-in-production".to_string()]);

    // Inline rule replaced the file's WARN with a DENY.
    let big = pipeline
        .process(request("gpt-4o").with_max_tokens(8000))
        .await?;
    assert_eq!(big.decision, Decision::Blocked);
    assert!(matches!(
        big.error,
        Some(Error::PolicyDenied { ref rule_name, .. }) if rule_name == "Hard completion cap"
    ));
    assert_eq!(primary.calls() + backup.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unrouted_model_fails_after_governance() -> anyhow::Result<()> {
    let primary = Arc::new(ScriptedProvider::healthy("primary"));
    let backup = Arc::new(ScriptedProvider::healthy("backup"));
    let pipeline =
        GovernancePipeline::from_config(&config(json!({}))?, &adapters(&primary, &backup)).await?;

    let outcome = pipeline.process(request("mistral-large").debug()).await?;
    assert_eq!(outcome.decision, Decision::Failed);
    assert_eq!(outcome.stage, Stage::Failed);
    assert!(matches!(outcome.error, Some(Error::NoRoute(_))));
    assert_eq!(
        outcome.trail.unwrap().stages.last().copied(),
        Some(Stage::Failed)
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_provider_is_a_config_error() -> anyhow::Result<()> {
    let primary = Arc::new(ScriptedProvider::healthy("primary"));
    let backup = Arc::new(ScriptedProvider::healthy("backup"));
    let config = config(json!({
        "router": {
            "routes": [{ "model_pattern": "*", "endpoints": [{ "provider": "missing" }] }]
        }
    }))?;

    let result = GovernancePipeline::from_config(&config, &adapters(&primary, &backup)).await;
    assert!(matches!(result, Err(Error::Config(_))));
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_router_delays_are_config_errors() -> anyhow::Result<()> {
    let primary = Arc::new(ScriptedProvider::healthy("primary"));
    let backup = Arc::new(ScriptedProvider::healthy("backup"));
    for router in [
        json!({ "recovery_time_secs": 1e300 }),
        json!({ "retry": { "max_delay_secs": 1e300 } }),
    ] {
        let config = config(json!({ "router": router }))?;
        let result = GovernancePipeline::from_config(&config, &adapters(&primary, &backup)).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
    Ok(())
}

#[tokio::test]
async fn test_audit_log_receives_json_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("audit.jsonl");
    let primary = Arc::new(ScriptedProvider::healthy("primary"));
    let backup = Arc::new(ScriptedProvider::healthy("backup"));
    let config = config(json!({
        "pipeline": { "audit_enabled": true, "audit_log": path.to_string_lossy() }
    }))?;
    let pipeline = GovernancePipeline::from_config(&config, &adapters(&primary, &backup)).await?;

    let outcome = pipeline.process(request("gpt-4o").dry_run()).await?;
    assert!(outcome.is_allowed());

    let mut content = String::new();
    for _ in 0..100 {
        content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        if !content.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let event: serde_json::Value = serde_json::from_str(content.trim())?;
    assert_eq!(event["request_id"], outcome.request_id.as_str());
    assert_eq!(event["dry_run"], true);
    assert_eq!(event["decision"], "allow");
    Ok(())
}

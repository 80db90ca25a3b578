#![deny(unused)]
//! Aegis - LLM Governance Gateway
//!
//! Reads completion requests as JSON, runs each through security screening,
//! policy evaluation, budget enforcement and resilient routing, and prints
//! the governance outcome.
//!
//! ```text
//! aegis [--config <path>] [--dry-run] [--debug] [request.json ...]
//! ```
//!
//! With no request files, one JSON request per line is read from stdin.
//! Provider endpoints named in the routing table are served by local echo
//! adapters.

use std::collections::HashMap;
use std::sync::Arc;

use aegis_core::config::{AppConfig, EndpointDefinition, RouteDefinition};
use aegis_core::{ProviderAdapter, RequestContext};
use aegis_gateway::GovernancePipeline;
use aegis_model_gateway::EchoProvider;
use clap::Parser;
use tokio::io::AsyncBufReadExt;

const DEFAULT_PROVIDER: &str = "echo";

/// Aegis - LLM Governance Gateway
#[derive(Debug, Parser)]
#[command(name = "aegis", version)]
#[command(about = "Run completion requests through the Aegis governance pipeline", long_about = None)]
struct Args {
    /// Configuration file (defaults to config/default.yaml plus AEGIS__* overrides)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Run governance checks without calling a provider or recording spend
    #[arg(long)]
    dry_run: bool,

    /// Attach the decision trail to each outcome
    #[arg(long)]
    debug: bool,

    /// Request files (JSON); one request per stdin line when omitted
    #[arg(value_name = "REQUEST")]
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // =========================================================================
    // Configuration & Observability
    // =========================================================================
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    aegis_governance::configure_tracing(&config.logging)?;
    tracing::info!("Starting Aegis v{}", env!("CARGO_PKG_VERSION"));

    let metrics = if config.metrics.enabled {
        Some(aegis_governance::setup_metrics_recorder()?)
    } else {
        None
    };

    // =========================================================================
    // Providers & Pipeline
    // =========================================================================
    if config.router.routes.is_empty() {
        tracing::warn!("No routes configured; sending every model to the echo provider");
        config.router.routes.push(RouteDefinition {
            model_pattern: "*".into(),
            endpoints: vec![EndpointDefinition {
                provider: DEFAULT_PROVIDER.into(),
                weight: 1,
                priority: 0,
            }],
        });
    }
    let adapters = echo_adapters(&config);
    let pipeline = GovernancePipeline::from_config(&config, &adapters).await?;

    // =========================================================================
    // Requests
    // =========================================================================
    let mut processed = 0usize;
    if args.files.is_empty() {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            run_one(&pipeline, &args, &line).await?;
            processed += 1;
        }
    } else {
        for path in &args.files {
            let body = tokio::fs::read_to_string(path).await?;
            run_one(&pipeline, &args, &body).await?;
            processed += 1;
        }
    }

    tracing::info!(requests = processed, "Done");
    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }
    Ok(())
}

/// One echo adapter per provider named in the routing table.
fn echo_adapters(config: &AppConfig) -> HashMap<String, Arc<dyn ProviderAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
    for route in &config.router.routes {
        for endpoint in &route.endpoints {
            adapters
                .entry(endpoint.provider.clone())
                .or_insert_with(|| Arc::new(EchoProvider::new(endpoint.provider.clone())));
        }
    }
    adapters
}

/// Parse one request, run it and print the outcome as JSON.
///
/// Malformed and rejected requests are reported on stdout and do not stop
/// the run.
async fn run_one(pipeline: &GovernancePipeline, args: &Args, body: &str) -> anyhow::Result<()> {
    let mut ctx: RequestContext = match serde_json::from_str(body) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed request");
            let report = serde_json::json!({
                "error": { "code": "validation_error", "message": e.to_string() }
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
    };
    ctx.dry_run |= args.dry_run;
    ctx.debug |= args.debug;

    match pipeline.process(ctx).await {
        Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
        Err(e) => {
            let report = serde_json::json!({
                "error": { "code": e.code(), "message": e.to_string() }
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags_and_files() -> anyhow::Result<()> {
        let args = Args::try_parse_from([
            "aegis",
            "-c",
            "config/default.yaml",
            "--dry-run",
            "demos/allowed.json",
            "demos/injection.json",
        ])?;
        assert_eq!(args.config.as_deref(), Some("config/default.yaml"));
        assert!(args.dry_run);
        assert!(!args.debug);
        assert_eq!(args.files, vec!["demos/allowed.json", "demos/injection.json"]);
        Ok(())
    }

    #[test]
    fn test_help_and_unknown_flags() {
        let help = Args::try_parse_from(["aegis", "--help"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);
        let unknown = Args::try_parse_from(["aegis", "--verbose"]).unwrap_err();
        assert_eq!(unknown.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}

//! Provider routing with priority tiers, circuit breaking and retries.
//!
//! A route maps a model pattern to an ordered list of endpoints. Each
//! (route, endpoint) pair has its own circuit breaker and latency stats.
//! One dispatch makes an initial attempt plus at most `max_retries`
//! retries, wherever they land.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use aegis_core::config::RouterConfig;
use aegis_core::pattern::{glob_match, is_glob};
use aegis_core::{Error, NormalizedResponse, ProviderAdapter, RequestContext, Result};

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitConfig, CircuitState, Transition};
use crate::retry::RetryPolicy;
use crate::selector::{strategy_for, Candidate, SelectionStrategy};

/// Smoothing factor of the latency moving average.
const LATENCY_EMA_ALPHA: f64 = 0.2;

// =============================================================================
// Endpoints
// =============================================================================

/// One provider behind a route, as declared.
#[derive(Clone)]
pub struct EndpointSpec {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub weight: u32,
    /// Lower tiers are tried first.
    pub priority: u32,
}

impl EndpointSpec {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            weight: 1,
            priority: 0,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Default)]
struct EndpointStats {
    successes: u64,
    failures: u64,
    ema_latency_ms: Option<f64>,
}

struct Endpoint {
    provider: String,
    adapter: Arc<dyn ProviderAdapter>,
    weight: u32,
    priority: u32,
    breaker: CircuitBreaker,
    stats: Mutex<EndpointStats>,
}

impl Endpoint {
    fn new(spec: EndpointSpec, circuit: CircuitConfig) -> Self {
        Self {
            provider: spec.adapter.provider().to_string(),
            adapter: spec.adapter,
            weight: spec.weight,
            priority: spec.priority,
            breaker: CircuitBreaker::new(circuit),
            stats: Mutex::new(EndpointStats::default()),
        }
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, EndpointStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn avg_latency_ms(&self) -> Option<f64> {
        self.stats().ema_latency_ms
    }

    fn record(&self, success: bool, latency_ms: Option<f64>) {
        let mut stats = self.stats();
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        if let Some(sample) = latency_ms {
            stats.ema_latency_ms = Some(match stats.ema_latency_ms {
                Some(avg) => LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * avg,
                None => sample,
            });
        }
    }

    fn observe(&self, route: &str, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        match transition.to {
            CircuitState::Open => tracing::warn!(
                route = %route,
                provider = %self.provider,
                from = %transition.from,
                consecutive_failures = self.breaker.consecutive_failures(),
                "Circuit breaker OPENED"
            ),
            _ => tracing::info!(
                route = %route,
                provider = %self.provider,
                from = %transition.from,
                to = %transition.to,
                "Circuit breaker transition"
            ),
        }
        metrics::counter!(
            "aegis_circuit_transitions_total",
            "provider" => self.provider.clone(),
            "state" => transition.to.as_str()
        )
        .increment(1);
    }
}

// =============================================================================
// Attempt Guard
// =============================================================================

/// Settles one admitted attempt exactly once.
///
/// Dropping an unsettled guard (the dispatch future was cancelled or timed
/// out) counts as a failure and frees the HALF_OPEN trial slot.
struct AttemptGuard<'a> {
    route: &'a str,
    endpoint: &'a Endpoint,
    admission: Admission,
    started: Instant,
    settled: bool,
}

impl<'a> AttemptGuard<'a> {
    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn finish(&mut self, outcome: &'static str, healthy: bool, success: bool) {
        self.settled = true;
        let latency_ms = self.elapsed_ms();
        let transition = if healthy {
            self.endpoint.breaker.record_success(self.admission)
        } else {
            self.endpoint.breaker.record_failure(self.admission)
        };
        self.endpoint.observe(self.route, transition);
        self.endpoint.record(success, Some(latency_ms));

        metrics::counter!(
            "aegis_provider_requests_total",
            "provider" => self.endpoint.provider.clone(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!(
            "aegis_provider_latency_seconds",
            "provider" => self.endpoint.provider.clone()
        )
        .record(latency_ms / 1000.0);
    }

    fn succeed(mut self) {
        self.finish("success", true, true);
    }

    /// Retryable failure: counts against the breaker.
    fn fail(mut self) {
        self.finish("error", false, false);
    }

    /// Non-retryable rejection: the endpoint answered, so the breaker sees
    /// it as healthy.
    fn reject(mut self) {
        self.finish("rejected", true, false);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let transition = self.endpoint.breaker.record_failure(self.admission);
        self.endpoint.observe(self.route, transition);
        self.endpoint.record(false, None);
        metrics::counter!(
            "aegis_provider_requests_total",
            "provider" => self.endpoint.provider.clone(),
            "outcome" => "abandoned"
        )
        .increment(1);
        tracing::debug!(
            route = %self.route,
            provider = %self.endpoint.provider,
            "Provider attempt abandoned"
        );
    }
}

// =============================================================================
// Routes
// =============================================================================

struct Route {
    pattern: String,
    endpoints: Vec<Endpoint>,
}

impl Route {
    fn any_admissible(&self) -> bool {
        self.endpoints.iter().any(|e| e.breaker.is_admissible())
    }
}

/// Health of one endpoint within a route.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub provider: String,
    pub priority: u32,
    pub weight: u32,
    /// False while the circuit is OPEN.
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub failures: u64,
    pub successes: u64,
    pub avg_latency_ms: Option<f64>,
}

/// Health of every endpoint of a route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteHealth {
    pub model_pattern: String,
    pub endpoints: Vec<EndpointHealth>,
}

// =============================================================================
// Router
// =============================================================================

/// Dispatches requests to provider endpoints.
pub struct Router {
    routes: Vec<Route>,
    strategy: Arc<dyn SelectionStrategy>,
    retry: RetryPolicy,
    circuit: CircuitConfig,
}

impl Router {
    pub fn new(
        strategy: Arc<dyn SelectionStrategy>,
        retry: RetryPolicy,
        circuit: CircuitConfig,
    ) -> Self {
        Self {
            routes: Vec::new(),
            strategy,
            retry,
            circuit,
        }
    }

    /// Build from configuration. Every endpoint must name a known adapter.
    pub fn from_config(
        config: &RouterConfig,
        adapters: &HashMap<String, Arc<dyn ProviderAdapter>>,
    ) -> Result<Self> {
        let mut router = Self::new(
            strategy_for(config.strategy),
            RetryPolicy::try_from(&config.retry)?,
            CircuitConfig {
                failure_threshold: config.failure_threshold,
                recovery_time: config.recovery_time()?,
            },
        );

        for route in &config.routes {
            let endpoints = route
                .endpoints
                .iter()
                .map(|def| {
                    let adapter = adapters.get(&def.provider).ok_or_else(|| {
                        Error::config(format!(
                            "route '{}' references unknown provider '{}'",
                            route.model_pattern, def.provider
                        ))
                    })?;
                    Ok(EndpointSpec::new(adapter.clone())
                        .with_weight(def.weight)
                        .with_priority(def.priority))
                })
                .collect::<Result<Vec<_>>>()?;
            router.add_route(&route.model_pattern, endpoints)?;
        }

        tracing::info!(
            routes = router.routes.len(),
            strategy = router.strategy.name(),
            max_retries = router.retry.max_retries,
            "Router configured"
        );
        Ok(router)
    }

    /// Add a route. Patterns must be unique and name at least one endpoint.
    pub fn add_route(
        &mut self,
        model_pattern: impl Into<String>,
        endpoints: Vec<EndpointSpec>,
    ) -> Result<()> {
        let pattern = model_pattern.into();
        if pattern.trim().is_empty() {
            return Err(Error::config("route pattern must not be empty"));
        }
        if endpoints.is_empty() {
            return Err(Error::config(format!("route '{}' has no endpoints", pattern)));
        }
        if self.routes.iter().any(|r| r.pattern == pattern) {
            return Err(Error::config(format!("duplicate route '{}'", pattern)));
        }
        let endpoints = endpoints
            .into_iter()
            .map(|spec| Endpoint::new(spec, self.circuit))
            .collect();
        self.routes.push(Route { pattern, endpoints });
        Ok(())
    }

    pub fn with_route(
        mut self,
        model_pattern: impl Into<String>,
        endpoints: Vec<EndpointSpec>,
    ) -> Result<Self> {
        self.add_route(model_pattern, endpoints)?;
        Ok(self)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Exact patterns win over globs; globs match in declaration order.
    fn resolve(&self, model: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| !is_glob(&r.pattern) && r.pattern == model)
            .or_else(|| {
                self.routes
                    .iter()
                    .find(|r| is_glob(&r.pattern) && glob_match(&r.pattern, model))
            })
    }

    /// Whether some route serves the model.
    pub fn has_route(&self, model: &str) -> bool {
        self.resolve(model).is_some()
    }

    /// Admit one endpoint of the best tier that still has candidates.
    ///
    /// Endpoints that failed earlier in this dispatch are used only once no
    /// untried endpoint is admissible.
    fn acquire<'r>(&self, route: &'r Route, failed: &[usize]) -> Option<(usize, AttemptGuard<'r>)> {
        let mut lost: Vec<usize> = Vec::new();
        loop {
            let admissible: Vec<usize> = (0..route.endpoints.len())
                .filter(|i| !lost.contains(i) && route.endpoints[*i].breaker.is_admissible())
                .collect();
            let untried: Vec<usize> = admissible
                .iter()
                .copied()
                .filter(|i| !failed.contains(i))
                .collect();
            let pool = if untried.is_empty() { admissible } else { untried };

            let best = pool.iter().map(|&i| route.endpoints[i].priority).min()?;
            let tier: Vec<usize> = pool
                .into_iter()
                .filter(|&i| route.endpoints[i].priority == best)
                .collect();
            let candidates: Vec<Candidate<'_>> = tier
                .iter()
                .map(|&i| {
                    let e = &route.endpoints[i];
                    Candidate {
                        provider: &e.provider,
                        weight: e.weight,
                        avg_latency_ms: e.avg_latency_ms(),
                    }
                })
                .collect();
            let pick = self.strategy.select(&route.pattern, &candidates).min(tier.len() - 1);
            let idx = tier[pick];
            let endpoint = &route.endpoints[idx];

            // Another request may have taken the trial slot since the check.
            match endpoint.breaker.try_acquire() {
                Some((admission, transition)) => {
                    endpoint.observe(&route.pattern, transition);
                    return Some((
                        idx,
                        AttemptGuard {
                            route: &route.pattern,
                            endpoint,
                            admission,
                            started: Instant::now(),
                            settled: false,
                        },
                    ));
                }
                None => lost.push(idx),
            }
        }
    }

    /// Send a request to the best available endpoint, failing over and
    /// backing off on retryable errors.
    pub async fn dispatch(&self, request: &RequestContext) -> Result<NormalizedResponse> {
        let route = self
            .resolve(&request.model)
            .ok_or_else(|| Error::NoRoute(request.model.clone()))?;

        let max_attempts = self.retry.max_retries.saturating_add(1);
        let mut attempts: u32 = 0;
        let mut failed: Vec<usize> = Vec::new();
        let mut last_error: Option<String> = None;

        while attempts < max_attempts {
            let Some((idx, guard)) = self.acquire(route, &failed) else {
                break;
            };
            attempts += 1;
            let provider = &route.endpoints[idx].provider;
            tracing::debug!(
                request_id = %request.request_id,
                route = %route.pattern,
                provider = %provider,
                attempt = attempts,
                trial = guard.admission == Admission::Trial,
                "Dispatching to provider"
            );

            let outcome = route.endpoints[idx].adapter.send(request).await;
            match outcome {
                Ok(response) => {
                    guard.succeed();
                    return Ok(response);
                }
                Err(err) if !err.retryable => {
                    guard.reject();
                    tracing::warn!(
                        request_id = %request.request_id,
                        provider = %provider,
                        error = %err,
                        "Provider rejected request"
                    );
                    return Err(Error::Provider(err));
                }
                Err(err) => {
                    guard.fail();
                    tracing::warn!(
                        request_id = %request.request_id,
                        provider = %provider,
                        attempt = attempts,
                        error = %err,
                        "Provider call failed"
                    );
                    last_error = Some(err.to_string());
                    if !failed.contains(&idx) {
                        failed.push(idx);
                    }
                }
            }

            if attempts >= max_attempts || !route.any_admissible() {
                break;
            }
            let delay = self.retry.backoff(attempts - 1);
            if !delay.is_zero() {
                tracing::debug!(
                    request_id = %request.request_id,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            request_id = %request.request_id,
            model = %request.model,
            attempts,
            "All endpoints unavailable"
        );
        Err(Error::AllEndpointsUnavailable {
            model: request.model.clone(),
            attempts,
            last_error,
        })
    }

    /// Health of every endpoint, by route.
    pub fn get_health_status(&self) -> Vec<RouteHealth> {
        self.routes
            .iter()
            .map(|route| RouteHealth {
                model_pattern: route.pattern.clone(),
                endpoints: route
                    .endpoints
                    .iter()
                    .map(|e| {
                        let circuit_state = e.breaker.state();
                        let stats = e.stats();
                        EndpointHealth {
                            provider: e.provider.clone(),
                            priority: e.priority,
                            weight: e.weight,
                            healthy: circuit_state != CircuitState::Open,
                            circuit_state,
                            consecutive_failures: e.breaker.consecutive_failures(),
                            failures: stats.failures,
                            successes: stats.successes,
                            avg_latency_ms: stats.ema_latency_ms,
                        }
                    })
                    .collect(),
            })
            .collect()
    }
}

#![deny(unused)]
//! Provider routing for Aegis.
//!
//! This crate provides:
//! - Model-pattern routes with priority tiers
//! - Endpoint selection strategies (round-robin, weighted, least-latency, random)
//! - Per-endpoint circuit breakers
//! - Exponential backoff retries with a per-dispatch budget
//! - Model pricing for cost estimation
//! - Reference provider adapters

pub mod circuit_breaker;
pub mod pricing;
pub mod providers;
pub mod retry;
pub mod router;
pub mod selector;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState};
pub use pricing::{ModelPricing, PricingRegistry};
pub use providers::{EchoProvider, ScriptedProvider};
pub use retry::RetryPolicy;
pub use router::{EndpointHealth, EndpointSpec, RouteHealth, Router};
pub use selector::{
    strategy_for, Candidate, LeastLatency, RandomChoice, RoundRobin, SelectionStrategy, Weighted,
};

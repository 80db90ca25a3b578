//! Endpoint selection strategies.

use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aegis_core::config::StrategyKind;

/// What a strategy sees of one admissible endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub provider: &'a str,
    pub weight: u32,
    /// Rolling average latency; `None` until the first completed call.
    pub avg_latency_ms: Option<f64>,
}

/// Picks one endpoint among the admissible endpoints of a priority tier.
///
/// `candidates` is never empty and keeps declaration order.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Index into `candidates`.
    fn select(&self, route: &str, candidates: &[Candidate<'_>]) -> usize;
}

/// Create the strategy for a configured kind.
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn SelectionStrategy> {
    match kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobin::default()),
        StrategyKind::Weighted => Arc::new(Weighted),
        StrategyKind::LeastLatency => Arc::new(LeastLatency),
        StrategyKind::Random => Arc::new(RandomChoice),
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// Cycles through candidates with one shared counter per route.
#[derive(Default)]
pub struct RoundRobin {
    counters: DashMap<String, AtomicUsize>,
}

impl SelectionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, route: &str, candidates: &[Candidate<'_>]) -> usize {
        let next = match self.counters.get(route) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .counters
                .entry(route.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        next % candidates.len()
    }
}

/// Picks proportionally to weight. All-zero weights fall back to uniform.
#[derive(Debug, Default, Clone, Copy)]
pub struct Weighted;

impl SelectionStrategy for Weighted {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn select(&self, _route: &str, candidates: &[Candidate<'_>]) -> usize {
        let total: u64 = candidates.iter().map(|c| u64::from(c.weight)).sum();
        let mut rng = rand::thread_rng();
        if total == 0 {
            return rng.gen_range(0..candidates.len());
        }
        let mut point = rng.gen_range(0..total);
        for (idx, candidate) in candidates.iter().enumerate() {
            let weight = u64::from(candidate.weight);
            if point < weight {
                return idx;
            }
            point -= weight;
        }
        candidates.len() - 1
    }
}

/// Picks the lowest rolling average latency. Unmeasured endpoints count as
/// zero so each gets probed; ties go to declaration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLatency;

impl SelectionStrategy for LeastLatency {
    fn name(&self) -> &'static str {
        "least_latency"
    }

    fn select(&self, _route: &str, candidates: &[Candidate<'_>]) -> usize {
        candidates
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |(best, best_latency), (idx, c)| {
                let latency = c.avg_latency_ms.unwrap_or(0.0);
                if latency < best_latency {
                    (idx, latency)
                } else {
                    (best, best_latency)
                }
            })
            .0
    }
}

/// Uniform choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChoice;

impl SelectionStrategy for RandomChoice {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, _route: &str, candidates: &[Candidate<'_>]) -> usize {
        rand::thread_rng().gen_range(0..candidates.len())
    }
}

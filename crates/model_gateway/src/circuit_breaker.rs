//! Per-endpoint circuit breaker.
//!
//! ```text
//! CLOSED ──[failure_threshold consecutive failures]──► OPEN
//!                                                        │
//!                                             [recovery_time elapsed,
//!                                              next admission attempt]
//!                                                        ▼
//!            CLOSED ◄──[trial success]── HALF_OPEN ──[trial failure]──► OPEN
//! ```
//!
//! HALF_OPEN admits exactly one in-flight trial. State lives behind a mutex
//! so the admission decision and the trial flag change together.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit rejects requests before a trial.
    pub recovery_time: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_secs(30),
        }
    }
}

/// How a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit was CLOSED.
    Normal,
    /// The single HALF_OPEN trial.
    Trial,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// A state change, reported to the caller for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Circuit breaker for one (route, endpoint) pair.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config: CircuitConfig {
                failure_threshold: config.failure_threshold.max(1),
                recovery_time: config.recovery_time,
            },
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn recovered(&self, inner: &Inner, now: Instant) -> bool {
        inner
            .opened_at
            .map_or(true, |opened| now.duration_since(opened) >= self.config.recovery_time)
    }

    /// Whether an admission attempt could succeed now. Does not change state.
    pub fn is_admissible(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.recovered(&inner, Instant::now()),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Try to let one request through.
    ///
    /// An OPEN circuit past its recovery time moves to HALF_OPEN and hands
    /// out the trial slot.
    pub fn try_acquire(&self) -> Option<(Admission, Option<Transition>)> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some((Admission::Normal, None)),
            CircuitState::Open => {
                if !self.recovered(&inner, Instant::now()) {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                Some((
                    Admission::Trial,
                    Some(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    }),
                ))
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Some((Admission::Trial, None))
            }
            CircuitState::HalfOpen => None,
        }
    }

    /// Record a healthy response.
    pub fn record_success(&self, admission: Admission) -> Option<Transition> {
        let mut inner = self.lock();
        match (inner.state, admission) {
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = 0;
                None
            }
            // Late results of requests admitted before the circuit opened.
            _ => None,
        }
    }

    /// Record a failed or abandoned request.
    pub fn record_failure(&self, admission: Admission) -> Option<Transition> {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match (inner.state, admission) {
            (CircuitState::Closed, _)
                if inner.consecutive_failures >= self.config.failure_threshold =>
            {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                Some(Transition {
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            (CircuitState::HalfOpen, Admission::Trial) => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            _ => None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }
}

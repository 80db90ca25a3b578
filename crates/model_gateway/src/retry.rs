//! Exponential backoff between dispatch attempts.

use rand::Rng;
use std::time::Duration;

use aegis_core::config::RetryConfig;
use aegis_core::Error;

/// Backoff schedule shared by all attempts of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt, across all endpoints.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl TryFrom<&RetryConfig> for RetryPolicy {
    type Error = Error;

    /// Fails on delays that do not fit a [`Duration`].
    fn try_from(config: &RetryConfig) -> Result<Self, Error> {
        let exponential_base = if config.exponential_base.is_finite() {
            config.exponential_base.max(1.0)
        } else {
            return Err(Error::config(format!(
                "router.retry.exponential_base = {}: must be finite",
                config.exponential_base
            )));
        };
        Ok(Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay()?,
            max_delay: config.max_delay()?,
            exponential_base,
            jitter: config.jitter,
        })
    }
}

impl RetryPolicy {
    /// No retries and no delay.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 1.0,
            jitter: false,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// `min(max_delay, base_delay * exponential_base^attempt)`, attempt from 0.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_delay
        } else {
            Duration::ZERO
        }
    }

    /// Delay to sleep before the retry following failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

//! In-memory sliding-window request counter.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use aegis_core::{RateCounter, Result};

/// Counts requests per key over a trailing time window.
pub struct SlidingWindowRateCounter {
    window: Duration,
    hits: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowRateCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            hits: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn evict(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop keys with no hits inside the window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|_, timestamps| {
            timestamps
                .back()
                .map_or(false, |&last| now.duration_since(last) < self.window)
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.len()
    }
}

impl Default for SlidingWindowRateCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl RateCounter for SlidingWindowRateCounter {
    async fn hit(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entry = self.hits.entry(key.to_string()).or_default();
        self.evict(&mut entry, now);
        entry.push_back(now);
        Ok(entry.len() as u64)
    }

    async fn current(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        match self.hits.get_mut(key) {
            Some(mut entry) => {
                self.evict(&mut entry, now);
                Ok(entry.len() as u64)
            }
            None => Ok(0),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Total write attempts per batch, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max attempts must be at least 1".to_string());
        }
        if self.max_backoff < self.initial_backoff {
            return Err("retry max backoff must not be less than the initial backoff".to_string());
        }
        Ok(())
    }
}

/// Exponential backoff with jitter for a single batch.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            current: config.initial_backoff,
            config: config.clone(),
            attempts: 0,
        }
    }

    /// Records a failed attempt and returns how long to wait before the next
    /// one, or None once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.config.max_attempts {
            return None;
        }

        let backoff_ms = i64::try_from(self.current.as_millis()).unwrap_or(i64::MAX);
        let mut v = backoff_ms / 2;
        // avoid div by zero
        if v == 0 {
            v = 1;
        }

        let jitter = (rand::random::<i64>() % v) - (v / 2);
        let mut sleep_ms = backoff_ms.saturating_add(jitter);
        if sleep_ms < 0 {
            sleep_ms = 1;
        }

        self.current = std::cmp::min(self.current.saturating_mul(2), self.config.max_backoff);
        Some(Duration::from_millis(sleep_ms as u64))
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

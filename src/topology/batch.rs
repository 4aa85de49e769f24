// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::time::Instant;

/// Upper bound on the up-front allocation for a batch. Larger batches grow.
const MAX_PREALLOC: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_size: usize,
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            timeout: Duration::from_secs(1),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err("batch size must be at least 1".to_string());
        }
        if self.timeout.is_zero() {
            return Err("batch timeout must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Accumulates items until either the size limit is reached or the oldest
/// item has waited `timeout`.
pub struct Batch<T> {
    items: Vec<T>,
    max_size: usize,
    timeout: Duration,
    opened_at: Option<Instant>,
}

impl<T> Batch<T> {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            items: Vec::with_capacity(config.max_size.min(MAX_PREALLOC)),
            max_size: config.max_size,
            timeout: config.timeout,
            opened_at: None,
        }
    }

    /// Adds an item, handing back the full batch once it reaches the size limit.
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        if self.items.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.items.push(item);
        if self.items.len() >= self.max_size {
            return Some(self.take_batch());
        }
        None
    }

    pub fn take_batch(&mut self) -> Vec<T> {
        self.opened_at = None;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size.min(MAX_PREALLOC)))
    }

    /// When the pending items must be flushed. None while the batch is empty.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.timeout)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

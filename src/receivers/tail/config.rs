// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file tailer.

use std::path::PathBuf;
use std::time::Duration;

/// Shortest poll interval accepted, keeps the EOF loop from spinning.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_micros(100);
/// Longest poll interval accepted.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where to begin reading the file when the tailer starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartAt {
    /// Replay the existing content
    Beginning,
    /// Only ship lines appended after start
    #[default]
    End,
}

/// Configuration for the file tailer
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Path of the access log to follow
    pub path: PathBuf,
    /// Where to start reading
    pub start_at: StartAt,
    /// Sleep between reads once the end of the file is reached
    pub poll_interval: Duration,
    /// How long the path may stay missing before the tailer gives up
    pub missing_file_timeout: Duration,
    /// Maximum log line size in bytes, longer lines are truncated
    pub max_line_size: usize,
    /// Number of leading bytes compared to detect a file rewritten in place
    pub fingerprint_size: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./access.log"),
            start_at: StartAt::End,
            poll_interval: Duration::from_millis(1),
            missing_file_timeout: Duration::from_secs(30),
            max_line_size: 65536,
            fingerprint_size: 1000,
        }
    }
}

impl TailConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("A source file path must be specified".to_string());
        }

        if self.poll_interval < MIN_POLL_INTERVAL || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(format!(
                "Poll interval must be between {:?} and {:?}, got {:?}",
                MIN_POLL_INTERVAL, MAX_POLL_INTERVAL, self.poll_interval
            ));
        }

        if self.max_line_size == 0 {
            return Err("Maximum line size must be greater than zero".to_string());
        }

        Ok(())
    }
}

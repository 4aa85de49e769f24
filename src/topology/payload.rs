// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use std::fmt;

/// One record read from the source file, line terminator stripped.
#[derive(Clone, PartialEq, Eq)]
pub struct RawLine(Bytes);

impl RawLine {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for RawLine {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<&'static str> for RawLine {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl fmt::Debug for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawLine({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// A fully parsed access log record.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub client_address: String,
    pub scheme: String,
    pub http_method: String,
    /// URL path of the request target, without query string or fragment
    pub request_path: String,
    /// Three character status code, kept as text
    pub status_code: String,
    pub bytes_sent: u64,
    /// Seconds, None when the log recorded `-`
    pub upstream_time: Option<f64>,
    /// Seconds, None when the log recorded `-`
    pub request_time: Option<f64>,
}

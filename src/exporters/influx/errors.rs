// SPDX-License-Identifier: Apache-2.0

use http::StatusCode;
use thiserror::Error;

/// How the publisher reacts to a failed write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth retrying with backoff, the server or network may recover.
    Transient,
    /// The batch itself was rejected, retrying cannot help.
    Rejected,
    /// Credentials or target are wrong, nothing further can be written.
    Fatal,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unable to connect to InfluxDB: {0}")]
    Connect(String),

    #[error("InfluxDB write timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("InfluxDB request failed: {0}")]
    Request(String),

    #[error("InfluxDB responded {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("invalid InfluxDB configuration: {0}")]
    Config(String),
}

impl ExportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExportError::Connect(_) | ExportError::Timeout(_) | ExportError::Request(_) => {
                FailureKind::Transient
            }
            ExportError::Status { status, .. } => match status.as_u16() {
                401 | 403 | 404 => FailureKind::Fatal,
                408 | 429 => FailureKind::Transient,
                500..=599 => FailureKind::Transient,
                _ => FailureKind::Rejected,
            },
            ExportError::Config(_) => FailureKind::Fatal,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ExportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

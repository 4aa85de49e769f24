// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Why a single line was rejected. Never fatal to the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("line is not valid UTF-8")]
    Encoding,

    #[error("line does not match the access log format")]
    Grammar,

    #[error("invalid timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },

    #[error("invalid request {value:?}: {reason}")]
    Request { value: String, reason: String },

    #[error("invalid {field} {value:?}")]
    Duration { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ParseError>;

// SPDX-License-Identifier: Apache-2.0

//! Access log parsing.
//!
//! - [`AccessLogParser`] turns one [`RawLine`](crate::topology::payload::RawLine)
//!   into a [`LogEvent`](crate::topology::payload::LogEvent), or rejects it whole
//! - [`ParseStage`] runs a parser between the tailer and publisher queues

mod access;
mod error;
mod stage;

pub use access::{
    ACCESS_LOG_PATTERN, AccessLogParser, DEFAULT_TIMEZONE, ParserConfig, TIME_LOCAL_FORMAT,
};
pub use error::{ParseError, Result};
pub use stage::ParseStage;

use crate::topology::payload::{LogEvent, RawLine};

/// Turns a raw line into an event. Implementations hold no per-line state.
pub trait LineParser: Send + Sync {
    fn parse(&self, line: &RawLine) -> Result<LogEvent>;
}

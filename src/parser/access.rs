// SPDX-License-Identifier: Apache-2.0

//! Parser for the nginx access log format shipped by this tool.
//!
//! Format:
//! ```text
//! $remote_addr $remote_user $auth_user [$time_local] $scheme "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent" "$http_x_forwarded_for" $upstream_response_time $request_time
//! ```
//!
//! Example:
//! ```text
//! 10.0.0.1 - - [01/Jan/2023:00:00:00 +0000] http "GET /a/b?x=1 HTTP/1.1" 200 512 "-" "-" "-" 0.010 0.050
//! ```

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use url::Url;

use super::LineParser;
use super::error::{ParseError, Result};
use crate::topology::payload::{LogEvent, RawLine};

/// nginx time_local format string for chrono parsing.
pub const TIME_LOCAL_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Zone the wall clock time of each line is read in, unless the embedded
/// offset is honored.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Shanghai;

/// Anchored pattern for the whole line. Every position is mandatory.
///
/// Quoted fields accept backslash escaped quotes. The status is any three
/// non-space characters, and the numeric tail fields are validated after
/// matching so the error can name the offending field.
pub const ACCESS_LOG_PATTERN: &str = r#"^(?P<client_ip>\S+)\s+(?P<remote_user>\S+)\s+(?P<auth_user>\S+)\s+\[(?P<time_local>[^\]]+)\]\s+(?P<scheme>[a-z]+)\s+"(?P<request>(?:[^"\\]|\\.)*)"\s+(?P<status>\S{3})\s+(?P<bytes_sent>\S+)\s+"(?P<referrer>(?:[^"\\]|\\.)*)"\s+"(?P<user_agent>(?:[^"\\]|\\.)*)"\s+"(?P<forwarded_for>(?:[^"\\]|\\.)*)"\s+(?P<upstream_time>\S+)\s+(?P<request_time>\S+)\s*$"#;

/// How timestamps are interpreted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParserConfig {
    /// Zone used for the wall clock fields of `time_local`
    pub timezone: Tz,
    /// Use the offset written in the line instead of `timezone`
    pub honor_offset: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            honor_offset: false,
        }
    }
}

pub struct AccessLogParser {
    regex: Regex,
    config: ParserConfig,
}

impl AccessLogParser {
    pub fn new(config: ParserConfig) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(ACCESS_LOG_PATTERN)?,
            config,
        })
    }

    fn parse_timestamp(&self, value: &str) -> Result<DateTime<FixedOffset>> {
        let invalid = |reason: String| ParseError::Timestamp {
            value: value.to_string(),
            reason,
        };

        if self.config.honor_offset {
            return DateTime::parse_from_str(value, TIME_LOCAL_FORMAT)
                .map_err(|e| invalid(e.to_string()));
        }

        // The offset must still be well formed, but the wall clock is read in
        // the configured zone.
        let naive = NaiveDateTime::parse_from_str(value, TIME_LOCAL_FORMAT)
            .map_err(|e| invalid(e.to_string()))?;

        self.config
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset())
            .ok_or_else(|| invalid(format!("does not exist in {}", self.config.timezone)))
    }
}

impl LineParser for AccessLogParser {
    fn parse(&self, line: &RawLine) -> Result<LogEvent> {
        let line = std::str::from_utf8(line.as_bytes()).map_err(|_| ParseError::Encoding)?;
        let captures = self.regex.captures(line).ok_or(ParseError::Grammar)?;

        // All groups are mandatory, so they are present once the line matched
        let field = |name: &str| captures.name(name).map_or("", |m| m.as_str());

        let timestamp = self.parse_timestamp(field("time_local"))?;

        let request = field("request");
        let (method, target) = split_request(request)?;
        let request_path = request_path(target).ok_or_else(|| ParseError::Request {
            value: request.to_string(),
            reason: format!("unusable request target {:?}", target),
        })?;

        Ok(LogEvent {
            timestamp,
            client_address: field("client_ip").to_string(),
            scheme: field("scheme").to_string(),
            http_method: method.to_string(),
            request_path,
            status_code: field("status").to_string(),
            // A malformed byte count (including "-") is recorded as zero
            bytes_sent: field("bytes_sent").parse().unwrap_or(0),
            upstream_time: parse_seconds("upstream_time", field("upstream_time"))?,
            request_time: parse_seconds("request_time", field("request_time"))?,
        })
    }
}

/// Split `"method target protocol"` on single spaces into exactly three tokens.
fn split_request(request: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = request.split(' ').collect();
    match parts.as_slice() {
        [method, target, protocol]
            if !method.is_empty() && !target.is_empty() && !protocol.is_empty() =>
        {
            Ok((*method, *target))
        }
        _ => Err(ParseError::Request {
            value: request.to_string(),
            reason: format!("expected 3 space separated tokens, found {}", parts.len()),
        }),
    }
}

/// URL path of a request target, dropping query string and fragment.
///
/// Origin-form targets keep their bytes as logged. Absolute-form targets
/// (proxy requests) are parsed as URLs and yield their serialized path.
fn request_path(target: &str) -> Option<String> {
    if target.starts_with('/') {
        let end = target.find(|c: char| c == '?' || c == '#').unwrap_or(target.len());
        return Some(target[..end].to_string());
    }

    if target == "*" {
        return Some(target.to_string());
    }

    Url::parse(target)
        .ok()
        .filter(|url| url.has_host())
        .map(|url| url.path().to_string())
}

/// Non-negative seconds, `-` meaning the value doesn't apply.
fn parse_seconds(field: &'static str, value: &str) -> Result<Option<f64>> {
    if value == "-" {
        return Ok(None);
    }

    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
        _ => Err(ParseError::Duration {
            field,
            value: value.to_string(),
        }),
    }
}

// SPDX-License-Identifier: Apache-2.0

//! InfluxDB line protocol.
//!
//! `measurement[,tag=value...] field=value[,field=value...] timestamp`
//!
//! Tag keys are written in sorted order. Tags with empty values are left out
//! since the protocol cannot represent them.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::config::Precision;
use crate::topology::payload::LogEvent;

pub const TAG_PATH: &str = "path";
pub const TAG_METHOD: &str = "method";
pub const TAG_SCHEME: &str = "scheme";
pub const TAG_STATUS: &str = "status";
pub const FIELD_UPSTREAM_TIME: &str = "upstream_time";
pub const FIELD_REQUEST_TIME: &str = "request_time";
pub const FIELD_BYTES_SENT: &str = "bytes_sent";

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn from_event(measurement: &str, event: &LogEvent) -> Self {
        let mut tags = BTreeMap::new();
        for (key, value) in [
            (TAG_PATH, &event.request_path),
            (TAG_METHOD, &event.http_method),
            (TAG_SCHEME, &event.scheme),
            (TAG_STATUS, &event.status_code),
        ] {
            if !value.is_empty() {
                tags.insert(key.to_string(), value.clone());
            }
        }

        let mut fields = BTreeMap::new();
        if let Some(t) = event.upstream_time {
            fields.insert(FIELD_UPSTREAM_TIME.to_string(), FieldValue::Float(t));
        }
        if let Some(t) = event.request_time {
            fields.insert(FIELD_REQUEST_TIME.to_string(), FieldValue::Float(t));
        }
        fields.insert(
            FIELD_BYTES_SENT.to_string(),
            FieldValue::Integer(i64::try_from(event.bytes_sent).unwrap_or(i64::MAX)),
        );

        Self {
            measurement: measurement.to_string(),
            tags,
            fields,
            timestamp: event.timestamp.with_timezone(&Utc),
        }
    }

    /// Timestamp expressed in units of `precision`, truncated toward the past.
    pub fn timestamp_in(&self, precision: Precision) -> i64 {
        let nanos = self.timestamp.timestamp() as i128 * 1_000_000_000
            + self.timestamp.timestamp_subsec_nanos() as i128;
        nanos.div_euclid(precision.divisor() as i128) as i64
    }

    /// Appends the point as one line, without a trailing newline.
    pub fn write_line(&self, precision: Precision, out: &mut String) {
        escape_into(&self.measurement, &[',', ' '], out);
        for (k, v) in &self.tags {
            if v.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(k, &[',', '=', ' '], out);
            out.push('=');
            escape_into(v, &[',', '=', ' '], out);
        }

        let mut sep = ' ';
        for (k, v) in &self.fields {
            out.push(sep);
            sep = ',';
            escape_into(k, &[',', '=', ' '], out);
            out.push('=');
            match v {
                FieldValue::Float(f) => {
                    let _ = write!(out, "{}", f);
                }
                FieldValue::Integer(i) => {
                    let _ = write!(out, "{}i", i);
                }
                FieldValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
                FieldValue::String(s) => {
                    out.push('"');
                    escape_into(s, &['"', '\\'], out);
                    out.push('"');
                }
            }
        }

        let _ = write!(out, " {}", self.timestamp_in(precision));
    }
}

/// Encodes points into a newline separated request body.
pub fn encode_batch(points: &[Point], precision: Precision) -> String {
    let mut out = String::with_capacity(points.len() * 160);
    for p in points {
        p.write_line(precision, &mut out);
        out.push('\n');
    }
    out
}

fn escape_into(s: &str, special: &[char], out: &mut String) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

// Decoder for line protocol written by `encode_batch`. Nothing on the write
// path uses it. It exists so tests and mock servers can check what was sent.

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("line is empty")]
    Empty,
    #[error("missing field set")]
    MissingFields,
    #[error("malformed {0}: {1}")]
    Malformed(&'static str, String),
}

/// One decoded line. The timestamp is left in the units the writer used.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLine {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: Option<i64>,
}

/// Decodes every non-blank line of a request body, for verifying writes.
pub fn parse_body(body: &str) -> Result<Vec<ParsedLine>, LineError> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_line)
        .collect()
}

pub fn parse_line(line: &str) -> Result<ParsedLine, LineError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(LineError::Empty);
    }

    let (series, rest) = split_series(line).ok_or(LineError::MissingFields)?;
    let rest = split_unescaped(rest, ' ', true);
    let (fields, timestamp) = match rest.as_slice() {
        [fields] => (fields, None),
        [fields, ts] => (fields, Some(ts)),
        _ => return Err(LineError::Malformed("line", line.to_string())),
    };

    let mut series_parts = split_unescaped(series, ',', false).into_iter();
    let measurement = unescape(&series_parts.next().ok_or(LineError::Empty)?);
    if measurement.is_empty() {
        return Err(LineError::Malformed("measurement", line.to_string()));
    }

    let mut tags = BTreeMap::new();
    for pair in series_parts {
        let (k, v) =
            split_pair(&pair, false).ok_or_else(|| LineError::Malformed("tag", pair.clone()))?;
        tags.insert(unescape(&k), unescape(&v));
    }

    let mut parsed_fields = BTreeMap::new();
    for pair in split_unescaped(fields, ',', true) {
        let (k, v) =
            split_pair(&pair, true).ok_or_else(|| LineError::Malformed("field", pair.clone()))?;
        parsed_fields.insert(unescape(&k), parse_field_value(&v)?);
    }
    if parsed_fields.is_empty() {
        return Err(LineError::MissingFields);
    }

    let timestamp = match timestamp {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| LineError::Malformed("timestamp", ts.to_string()))?,
        ),
        None => None,
    };

    Ok(ParsedLine {
        measurement,
        tags,
        fields: parsed_fields,
        timestamp,
    })
}

fn parse_field_value(v: &str) -> Result<FieldValue, LineError> {
    if let Some(inner) = v.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(FieldValue::String(unescape(inner)));
    }
    if let Some(int) = v.strip_suffix('i') {
        return int
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| LineError::Malformed("integer field", v.to_string()));
    }
    match v {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }
    v.parse()
        .map(FieldValue::Float)
        .map_err(|_| LineError::Malformed("float field", v.to_string()))
}

/// Splits the measurement and tags off at the first unescaped space.
fn split_series(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ' ' => return Some((&line[..i], &line[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Splits on unescaped `sep`, also skipping separators inside double quoted
/// strings when `quotes` is set. Escapes are preserved in the returned pieces.
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut quoted = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '"' if quotes => {
                current.push(c);
                quoted = !quoted;
            }
            c if c == sep && !quoted => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn split_pair(s: &str, quotes: bool) -> Option<(String, String)> {
    let mut parts = split_unescaped(s, '=', quotes);
    if parts.len() < 2 {
        return None;
    }
    // field string values may contain '=' after the first separator
    let key = parts.remove(0);
    if key.is_empty() {
        return None;
    }
    Some((key, parts.join("=")))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn event() -> LogEvent {
        LogEvent {
            timestamp: FixedOffset::east_opt(8 * 3600)
                .unwrap()
                .with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
                .unwrap(),
            client_address: "127.0.0.1".to_string(),
            scheme: "https".to_string(),
            http_method: "GET".to_string(),
            request_path: "/api/v1/users".to_string(),
            status_code: "200".to_string(),
            bytes_sent: 1024,
            upstream_time: Some(0.01),
            request_time: Some(0.05),
        }
    }

    #[test]
    fn encodes_event() {
        let p = Point::from_event("nginx_log", &event());
        let mut out = String::new();
        p.write_line(Precision::Seconds, &mut out);
        assert_eq!(
            "nginx_log,method=GET,path=/api/v1/users,scheme=https,status=200 \
             bytes_sent=1024i,request_time=0.05,upstream_time=0.01 1672502400",
            out
        );
    }

    #[test]
    fn timestamp_follows_precision() {
        let mut ev = event();
        ev.timestamp = ev.timestamp + chrono::Duration::milliseconds(1500);
        let p = Point::from_event("m", &ev);
        assert_eq!(1672502401, p.timestamp_in(Precision::Seconds));
        assert_eq!(1672502401500, p.timestamp_in(Precision::Milliseconds));
        assert_eq!(1672502401500000, p.timestamp_in(Precision::Microseconds));
        assert_eq!(1672502401500000000, p.timestamp_in(Precision::Nanoseconds));
        assert_eq!(1672502401 / 60, p.timestamp_in(Precision::Minutes));
        assert_eq!(1672502401 / 3600, p.timestamp_in(Precision::Hours));
    }

    #[test]
    fn missing_durations_and_empty_tags_are_omitted() {
        let mut ev = event();
        ev.upstream_time = None;
        ev.request_time = None;
        ev.scheme = String::new();
        let p = Point::from_event("nginx_log", &ev);

        let line = encode_batch(&[p], Precision::Seconds);
        assert_eq!(
            "nginx_log,method=GET,path=/api/v1/users,status=200 bytes_sent=1024i 1672502400\n",
            line
        );
    }

    #[test]
    fn escapes_special_characters() {
        let mut ev = event();
        ev.request_path = "/a b,c=d".to_string();
        let p = Point::from_event("nginx log,x", &ev);
        let mut out = String::new();
        p.write_line(Precision::Seconds, &mut out);
        assert!(out.starts_with(r"nginx\ log\,x,method=GET,path=/a\ b\,c\=d,"));

        let parsed = parse_line(&out).unwrap();
        assert_eq!("nginx log,x", parsed.measurement);
        assert_eq!("/a b,c=d", parsed.tags[TAG_PATH]);
    }

    #[test]
    fn parses_what_it_writes() {
        let points: Vec<Point> = ["/one", "/two", "/three"]
            .iter()
            .map(|path| {
                let mut ev = event();
                ev.request_path = path.to_string();
                Point::from_event("nginx_log", &ev)
            })
            .collect();

        let body = encode_batch(&points, Precision::Nanoseconds);
        let parsed = parse_body(&body).unwrap();
        assert_eq!(3, parsed.len());
        for (p, l) in points.iter().zip(parsed.iter()) {
            assert_eq!(p.measurement, l.measurement);
            assert_eq!(p.tags, l.tags);
            assert_eq!(p.fields, l.fields);
            assert_eq!(Some(p.timestamp_in(Precision::Nanoseconds)), l.timestamp);
        }
    }

    #[test]
    fn event_survives_line_protocol() {
        let ev = event();
        let mut line = String::new();
        Point::from_event("nginx_log", &ev).write_line(Precision::Nanoseconds, &mut line);
        let parsed = parse_line(&line).unwrap();

        let float = |key: &str| match parsed.fields.get(key) {
            Some(FieldValue::Float(f)) => Some(*f),
            _ => None,
        };
        assert_eq!(ev.request_path, parsed.tags[TAG_PATH]);
        assert_eq!(ev.http_method, parsed.tags[TAG_METHOD]);
        assert_eq!(ev.scheme, parsed.tags[TAG_SCHEME]);
        assert_eq!(ev.status_code, parsed.tags[TAG_STATUS]);
        assert_eq!(
            Some(&FieldValue::Integer(ev.bytes_sent as i64)),
            parsed.fields.get(FIELD_BYTES_SENT)
        );
        assert_eq!(ev.upstream_time, float(FIELD_UPSTREAM_TIME));
        assert_eq!(ev.request_time, float(FIELD_REQUEST_TIME));
        assert_eq!(ev.timestamp.timestamp_nanos_opt(), parsed.timestamp);
    }

    #[test]
    fn string_and_bool_fields() {
        let parsed = parse_line(r#"m,t=1 msg="say \"hi\", a=b",ok=t,n=-3i"#).unwrap();
        assert_eq!(
            FieldValue::String(r#"say "hi", a=b"#.to_string()),
            parsed.fields["msg"]
        );
        assert_eq!(FieldValue::Boolean(true), parsed.fields["ok"]);
        assert_eq!(FieldValue::Integer(-3), parsed.fields["n"]);
        assert_eq!(None, parsed.timestamp);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(Err(LineError::Empty), parse_line(""));
        assert_eq!(Err(LineError::MissingFields), parse_line("m,tag=1"));
        assert!(parse_line("m f=abc 1").is_err());
        assert!(parse_line("m f=1 notanumber").is_err());
        assert!(parse_line("m,badtag f=1").is_err());
    }
}

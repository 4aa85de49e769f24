// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Timestamp resolution of written points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precision {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl Precision {
    /// Value sent as the `precision` query parameter.
    pub fn as_query(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "u",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
            Precision::Minutes => "m",
            Precision::Hours => "h",
        }
    }

    /// Nanoseconds per unit.
    pub(crate) fn divisor(&self) -> i64 {
        match self {
            Precision::Nanoseconds => 1,
            Precision::Microseconds => 1_000,
            Precision::Milliseconds => 1_000_000,
            Precision::Seconds => 1_000_000_000,
            Precision::Minutes => 60 * 1_000_000_000,
            Precision::Hours => 3_600 * 1_000_000_000,
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ns" | "n" => Ok(Precision::Nanoseconds),
            "us" | "u" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            "m" => Ok(Precision::Minutes),
            "h" => Ok(Precision::Hours),
            _ => Err(format!("unknown precision: {}", s)),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InfluxConfig {
    pub endpoint: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub precision: Precision,
    pub measurement: String,
    pub request_timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8086".to_string(),
            database: String::new(),
            username: None,
            password: None,
            precision: Precision::default(),
            measurement: "nginx_log".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl InfluxConfig {
    pub fn new(endpoint: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Parses the compact `endpoint@user@password@database@precision` form.
    pub fn from_dsn(dsn: &str) -> Result<Self, String> {
        let parts: Vec<&str> = dsn.split('@').collect();
        let [endpoint, username, password, database, precision] = parts.as_slice() else {
            return Err(format!(
                "DSN must have the form endpoint@user@password@database@precision, got {} segments",
                parts.len()
            ));
        };

        let mut config = InfluxConfig::new(*endpoint, *database)
            .with_precision(precision.parse()?);
        if !username.is_empty() {
            config = config.with_credentials(*username, *password);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| format!("invalid InfluxDB endpoint {}: {}", self.endpoint, e))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported InfluxDB endpoint scheme: {}", other)),
        }
        if !url.has_host() {
            return Err(format!("InfluxDB endpoint has no host: {}", self.endpoint));
        }
        if self.database.is_empty() {
            return Err("InfluxDB database must be set".to_string());
        }
        if self.measurement.is_empty() {
            return Err("measurement name must not be empty".to_string());
        }
        if self.username.is_some() != self.password.is_some() {
            return Err("InfluxDB username and password must be set together".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("InfluxDB request timeout must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Full URL of the write endpoint, including query parameters.
    pub fn write_url(&self) -> Result<Url, String> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| format!("invalid InfluxDB endpoint {}: {}", self.endpoint, e))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| format!("InfluxDB endpoint cannot be a base: {}", self.endpoint))?;
            segments.pop_if_empty().push("write");
        }
        url.query_pairs_mut()
            .append_pair("db", &self.database)
            .append_pair("precision", self.precision.as_query());
        Ok(url)
    }
}

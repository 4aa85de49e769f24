// SPDX-License-Identifier: Apache-2.0

use tokio::select;
use tokio::time::{Instant, sleep_until};
use tower::BoxError;
use tracing::{debug, error, info, warn};

use super::client::InfluxClient;
use super::config::InfluxConfig;
use super::errors::{ExportError, FailureKind};
use super::point::Point;
use crate::bounded_channel::BoundedReceiver;
use crate::exporters::retry::{Backoff, RetryConfig};
use crate::topology::batch::{Batch, BatchConfig};
use crate::topology::payload::LogEvent;

/// Final pipeline stage. Groups events into batches and writes each batch to
/// InfluxDB, retrying transient failures.
pub struct InfluxExporter {
    client: InfluxClient,
    measurement: String,
    batch_config: BatchConfig,
    retry_config: RetryConfig,
    input: BoundedReceiver<LogEvent>,
    written: u64,
    dropped: u64,
}

impl InfluxExporter {
    pub fn new(
        config: &InfluxConfig,
        batch_config: BatchConfig,
        retry_config: RetryConfig,
        input: BoundedReceiver<LogEvent>,
    ) -> Result<Self, ExportError> {
        batch_config.validate().map_err(ExportError::Config)?;
        retry_config.validate().map_err(ExportError::Config)?;

        Ok(Self {
            client: InfluxClient::new(config)?,
            measurement: config.measurement.clone(),
            batch_config,
            retry_config,
            input,
            written: 0,
            dropped: 0,
        })
    }

    /// Runs until the input queue closes, then flushes what is pending and
    /// closes the client. Returns an error only when the server refuses our
    /// credentials or target, since no later write can succeed.
    pub async fn start(mut self) -> Result<(), BoxError> {
        let mut batch = Batch::new(&self.batch_config);

        let res = self.run(&mut batch).await;
        let res = match res {
            Ok(()) if !batch.is_empty() => {
                debug!(size = batch.len(), "Flushing final batch.");
                self.export(batch.take_batch()).await
            }
            other => other,
        };

        info!(
            written = self.written,
            dropped = self.dropped,
            "InfluxDB exporter exiting."
        );
        self.client.close();
        res.map_err(|e| e.into())
    }

    async fn run(&mut self, batch: &mut Batch<Point>) -> Result<(), ExportError> {
        loop {
            let deadline = batch.deadline();
            select! {
                biased;

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let points = batch.take_batch();
                    debug!(size = points.len(), "Batch timeout reached, flushing.");
                    self.export(points).await?;
                },

                item = self.input.next() => match item {
                    None => {
                        debug!("Exporter received end of input, exiting.");
                        return Ok(());
                    }
                    Some(event) => {
                        if let Some(points) = batch.push(Point::from_event(&self.measurement, &event)) {
                            self.export(points).await?;
                        }
                    }
                }
            }
        }
    }

    async fn export(&mut self, points: Vec<Point>) -> Result<(), ExportError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut backoff = Backoff::new(&self.retry_config);
        loop {
            let err = match self.client.write(&points).await {
                Ok(()) => {
                    debug!(
                        size = points.len(),
                        attempts = backoff.attempts() + 1,
                        "Batch written."
                    );
                    self.written += points.len() as u64;
                    return Ok(());
                }
                Err(e) => e,
            };

            match err.kind() {
                FailureKind::Fatal => {
                    error!(
                        error = %err,
                        status = err.status().map(|s| s.as_u16()),
                        size = points.len(),
                        "InfluxDB refused the write, stopping."
                    );
                    self.dropped += points.len() as u64;
                    return Err(err);
                }
                FailureKind::Rejected => {
                    self.drop_batch(&points, backoff.attempts() + 1, &err);
                    return Ok(());
                }
                FailureKind::Transient => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(
                            error = %err,
                            attempt = backoff.attempts(),
                            delay = ?delay,
                            "Batch write failed, will retry after delay."
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.drop_batch(&points, backoff.attempts(), &err);
                        return Ok(());
                    }
                },
            }
        }
    }

    fn drop_batch(&mut self, points: &[Point], attempts: u32, err: &ExportError) {
        self.dropped += points.len() as u64;
        error!(
            error = %err,
            status = err.status().map(|s| s.as_u16()),
            size = points.len(),
            first_timestamp = ?points.first().map(|p| p.timestamp),
            last_timestamp = ?points.last().map(|p| p.timestamp),
            attempts,
            "Batch dropped."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::exporters::influx::config::Precision;
    use crate::exporters::influx::point::{TAG_PATH, parse_body};
    use chrono::{DateTime, Duration as ChronoDuration};
    use httpmock::prelude::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn event(i: i64) -> LogEvent {
        LogEvent {
            timestamp: DateTime::parse_from_rfc3339("2023-01-01T00:00:00+08:00").unwrap()
                + ChronoDuration::seconds(i),
            client_address: "127.0.0.1".to_string(),
            scheme: "http".to_string(),
            http_method: "GET".to_string(),
            request_path: format!("/r{}", i),
            status_code: "200".to_string(),
            bytes_sent: 100,
            upstream_time: Some(0.01),
            request_time: Some(0.02),
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(10),
            max_attempts,
        }
    }

    fn influx(server: &MockServer) -> InfluxConfig {
        InfluxConfig::new(server.base_url(), "nginx").with_precision(Precision::Seconds)
    }

    #[tokio::test]
    async fn writes_full_batches_and_final_partial() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/write").query_param("db", "nginx");
            then.status(204);
        });

        let (tx, rx) = bounded(16);
        let batch = BatchConfig {
            max_size: 2,
            timeout: Duration::from_secs(60),
        };
        let exp = InfluxExporter::new(&influx(&server), batch, fast_retry(3), rx).unwrap();
        let jh = tokio::spawn(exp.start());

        for i in 0..5 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);

        jh.await.unwrap().unwrap();
        mock.assert_hits(3);
    }

    #[tokio::test]
    async fn flushes_partial_batch_on_timeout() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/write")
                .body_contains("path=/r0")
                .body_contains("path=/r1");
            then.status(204);
        });

        let (tx, rx) = bounded(16);
        let batch = BatchConfig {
            max_size: 100,
            timeout: Duration::from_millis(50),
        };
        let exp = InfluxExporter::new(&influx(&server), batch, fast_retry(3), rx).unwrap();
        let jh = tokio::spawn(exp.start());

        tx.send(event(0)).await.unwrap();
        tx.send(event(1)).await.unwrap();

        let mut waited = Duration::ZERO;
        while mock.hits() == 0 && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        mock.assert_hits(1);

        drop(tx);
        jh.await.unwrap().unwrap();
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn no_write_without_events() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/write");
            then.status(204);
        });

        let (tx, rx) = bounded(1);
        let exp =
            InfluxExporter::new(&influx(&server), BatchConfig::default(), fast_retry(3), rx)
                .unwrap();
        drop(tx);
        exp.start().await.unwrap();
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn preserves_event_order_within_batch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/write").matches(|req| {
                let body = String::from_utf8_lossy(req.body.as_deref().unwrap_or_default());
                let Ok(lines) = parse_body(&body) else {
                    return false;
                };
                let paths: Vec<&str> = lines.iter().map(|l| l.tags[TAG_PATH].as_str()).collect();
                paths == ["/r0", "/r1", "/r2"]
            });
            then.status(204);
        });

        let (tx, rx) = bounded(16);
        let exp =
            InfluxExporter::new(&influx(&server), BatchConfig::default(), fast_retry(3), rx)
                .unwrap();
        let jh = tokio::spawn(exp.start());
        for i in 0..3 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);
        jh.await.unwrap().unwrap();
        mock.assert_hits(1);
    }

    #[traced_test]
    #[tokio::test]
    async fn drops_batch_once_after_retries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/write");
            then.status(503).body("overloaded");
        });

        let (tx, rx) = bounded(16);
        let exp =
            InfluxExporter::new(&influx(&server), BatchConfig::default(), fast_retry(3), rx)
                .unwrap();
        tx.send(event(0)).await.unwrap();
        tx.send(event(1)).await.unwrap();
        drop(tx);

        // retries are exhausted but the exporter keeps running
        exp.start().await.unwrap();
        mock.assert_hits(3);

        logs_assert(|lines: &[&str]| {
            let dropped: Vec<&&str> = lines.iter().filter(|l| l.contains("Batch dropped.")).collect();
            if dropped.len() != 1 {
                return Err(format!("expected one dropped batch log, saw {}", dropped.len()));
            }
            if !dropped[0].contains("size=2") || !dropped[0].contains("attempts=3") {
                return Err(format!("missing batch details: {}", dropped[0]));
            }
            Ok(())
        });
    }

    #[traced_test]
    #[tokio::test]
    async fn rejected_batch_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/write");
            then.status(400).body(r#"{"error":"partial write: field type conflict"}"#);
        });

        let (tx, rx) = bounded(16);
        let exp =
            InfluxExporter::new(&influx(&server), BatchConfig::default(), fast_retry(5), rx)
                .unwrap();
        tx.send(event(0)).await.unwrap();
        drop(tx);

        exp.start().await.unwrap();
        mock.assert_hits(1);
        assert!(logs_contain("field type conflict"));
        assert!(logs_contain("status=400"));
    }

    #[tokio::test]
    async fn unauthorized_stops_exporter() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/write");
            then.status(401).body(r#"{"error":"authorization failed"}"#);
        });

        let (tx, rx) = bounded(16);
        let batch = BatchConfig {
            max_size: 1,
            timeout: Duration::from_secs(1),
        };
        let exp = InfluxExporter::new(&influx(&server), batch, fast_retry(5), rx).unwrap();
        let jh = tokio::spawn(exp.start());
        tx.send(event(0)).await.unwrap();

        let res = jh.await.unwrap();
        assert!(res.is_err());
        assert!(res.unwrap_err().to_string().contains("authorization failed"));
        mock.assert_hits(1);
    }

    #[test]
    fn rejects_invalid_batch_config() {
        let (_tx, rx) = bounded(1);
        let batch = BatchConfig {
            max_size: 0,
            timeout: Duration::from_secs(1),
        };
        let cfg = InfluxConfig::new("http://localhost:8086", "db");
        assert!(matches!(
            InfluxExporter::new(&cfg, batch, RetryConfig::default(), rx),
            Err(ExportError::Config(_))
        ));
    }
}

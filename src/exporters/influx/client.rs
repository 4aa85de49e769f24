// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;
use tracing::{debug, warn};

use super::config::{InfluxConfig, Precision};
use super::errors::{ExportError, Result};
use super::point::{Point, encode_batch};

/// Longest slice of a non-JSON error body kept in error messages.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Writes batches of points to the InfluxDB v1 `/write` endpoint.
pub struct InfluxClient {
    inner: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    uri: Uri,
    auth: Option<HeaderValue>,
    precision: Precision,
    request_timeout: Duration,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        config.validate().map_err(ExportError::Config)?;

        let uri: Uri = config
            .write_url()
            .map_err(ExportError::Config)?
            .as_str()
            .parse()
            .map_err(|e| ExportError::Config(format!("invalid write URI: {}", e)))?;

        let auth = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                let encoded = BASE64.encode(format!("{}:{}", user, pass).as_bytes());
                Some(
                    HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(|e| {
                        ExportError::Config(format!("invalid basic auth header value: {}", e))
                    })?,
                )
            }
            _ => None,
        };

        Ok(Self {
            inner: build_hyper_client()?,
            uri,
            auth,
            precision: config.precision,
            request_timeout: config.request_timeout,
        })
    }

    /// Sends one batch as a single request. An empty batch is not sent.
    pub async fn write(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = encode_batch(points, self.precision);
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8");
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        let req = builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| ExportError::Request(e.to_string()))?;

        match tokio::time::timeout(self.request_timeout, self.send(req)).await {
            Ok(res) => res,
            Err(_) => Err(ExportError::Timeout(self.request_timeout)),
        }
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> Result<()> {
        let resp = self.inner.request(req).await.map_err(|e| {
            if e.is_connect() {
                ExportError::Connect(e.to_string())
            } else {
                ExportError::Request(e.to_string())
            }
        })?;

        let (head, body) = resp.into_parts();
        if head.status.is_success() {
            return Ok(());
        }

        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "Failed reading InfluxDB error response body.");
                Bytes::new()
            }
        };
        Err(ExportError::Status {
            status: head.status,
            message: error_message(&bytes),
        })
    }

    /// Releases the connection pool.
    pub fn close(self) {
        debug!(uri = %self.uri, "Closing InfluxDB client.");
        drop(self.inner);
    }
}

fn error_message(body: &[u8]) -> String {
    if let Ok(err) = serde_json::from_slice::<ErrorBody>(body) {
        return err.error;
    }
    String::from_utf8_lossy(body)
        .chars()
        .take(ERROR_BODY_LIMIT)
        .collect::<String>()
        .trim()
        .to_string()
}

fn build_hyper_client() -> Result<HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>> {
    crate::crypto::init_crypto_provider().map_err(|e| ExportError::Config(e.to_string()))?;

    let tls = match ClientConfig::builder().with_native_roots() {
        Ok(builder) => builder.with_no_client_auth(),
        Err(e) => {
            warn!(error = %e, "Unable to load native root certificates, https endpoints will fail verification.");
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth()
        }
    };

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .build();

    let client = HyperClient::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(4)
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(https);

    Ok(client)
}

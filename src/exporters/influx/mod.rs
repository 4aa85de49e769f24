// SPDX-License-Identifier: Apache-2.0

//! Publishes parsed access log events to InfluxDB using the v1 HTTP write API.

pub mod client;
pub mod config;
pub mod errors;
pub mod exporter;
pub mod point;

pub use client::InfluxClient;
pub use config::{InfluxConfig, Precision};
pub use errors::{ExportError, FailureKind};
pub use exporter::InfluxExporter;
pub use point::Point;

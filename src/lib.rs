// SPDX-License-Identifier: Apache-2.0

//! Follows an nginx access log, parses each line and ships the results to
//! InfluxDB in batches.
//!
//! Three stages connected by bounded queues: the tailer in
//! [`receivers::tail`], the [`parser`] and the InfluxDB exporter in
//! [`exporters::influx`]. [`init::agent::Agent`] wires them together.

pub mod bounded_channel;
pub mod crypto;
pub mod exporters;
pub mod init;
pub mod parser;
pub mod receivers;
pub mod topology;

// SPDX-License-Identifier: Apache-2.0

//! Tailing receiver for a single growing log file.
//!
//! Features:
//! - Starts at the end of the file, only appended lines are shipped
//! - Device/inode tracking to follow rotation by rename
//! - Size and fingerprint checks to follow truncation in place
//! - Backpressure through the bounded output queue

pub mod config;
pub mod error;
pub mod file_id;
pub mod fingerprint;
pub mod reader;
pub mod receiver;

pub use config::{StartAt, TailConfig};
pub use error::{Error, Result};
pub use file_id::FileId;
pub use reader::{LineReader, SourceState};
pub use receiver::FileTailer;

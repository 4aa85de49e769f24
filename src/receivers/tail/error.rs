// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File {path} was removed and not recreated within {waited:?}")]
    FileGone { path: PathBuf, waited: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tailer thread failed: {0}")]
    Join(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

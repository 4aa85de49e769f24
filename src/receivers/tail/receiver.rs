// SPDX-License-Identifier: Apache-2.0

//! Follow-mode reader for a single access log.
//!
//! File I/O is synchronous, so the tailer runs on a blocking thread and feeds
//! the parser through the bounded queue, blocking while the queue is full.
//! At EOF it sleeps for the poll interval and then checks the path for
//! rotation, truncation or removal before reading again.

use std::io;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedSender, SendTimeoutError};
use crate::receivers::tail::config::{StartAt, TailConfig};
use crate::receivers::tail::error::{Error, Result};
use crate::receivers::tail::reader::{LineReader, SourceState};
use crate::topology::payload::RawLine;

/// How long a blocked send waits before looking at the cancellation token.
const SEND_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub struct FileTailer {
    config: TailConfig,
    output: BoundedSender<RawLine>,
}

impl FileTailer {
    pub fn new(config: TailConfig, output: BoundedSender<RawLine>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        Ok(Self { config, output })
    }

    /// Opens the file and spawns the tailing loop.
    ///
    /// Opening happens before the spawn so a missing or unreadable file fails
    /// startup instead of surfacing later from the task set.
    pub fn start(
        self,
        task_set: &mut JoinSet<std::result::Result<(), BoxError>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let reader = self.open(self.config.start_at)?;
        let cancel = cancel.clone();

        task_set.spawn(async move {
            match tokio::task::spawn_blocking(move || self.run(reader, cancel)).await {
                Ok(res) => res.map_err(|e| e.into()),
                Err(e) => Err(Error::Join(e.to_string()).into()),
            }
        });

        Ok(())
    }

    fn open(&self, start_at: StartAt) -> Result<LineReader> {
        LineReader::open(
            &self.config.path,
            start_at,
            self.config.fingerprint_size,
            self.config.max_line_size,
        )
        .map_err(|e| Error::io(&self.config.path, e))
    }

    pub(crate) fn run(self, mut reader: LineReader, cancel: CancellationToken) -> Result<()> {
        info!(
            path = %reader.path().display(),
            file_id = %reader.file_id(),
            offset = reader.offset(),
            "Tailing file."
        );

        let mut missing_since: Option<Instant> = None;
        let mut lines_read: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                info!(lines_read, "File tailer cancelled, stopped reading.");
                return Ok(());
            }

            match reader.read_line() {
                Ok(Some(line)) => {
                    lines_read += 1;
                    if !self.send(RawLine::from(line), &cancel) {
                        return Ok(());
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(path = %self.config.path.display(), error = %e, "Failed reading file.");
                    return Err(Error::io(&self.config.path, e));
                }
            }

            let state = reader
                .check_source()
                .map_err(|e| Error::io(&self.config.path, e))?;

            match state {
                SourceState::Unchanged => missing_since = None,
                SourceState::Missing => {
                    let since = *missing_since.get_or_insert_with(|| {
                        warn!(path = %self.config.path.display(), "File disappeared, waiting for it to be recreated.");
                        Instant::now()
                    });
                    if since.elapsed() >= self.config.missing_file_timeout {
                        error!(
                            path = %self.config.path.display(),
                            waited = ?self.config.missing_file_timeout,
                            "File was not recreated, giving up."
                        );
                        return Err(Error::FileGone {
                            path: self.config.path.clone(),
                            waited: self.config.missing_file_timeout,
                        });
                    }
                }
                SourceState::Rotated => {
                    missing_since = None;

                    // Lines written to the old file before it was moved away go first
                    while let Some(line) = reader
                        .read_line()
                        .map_err(|e| Error::io(&self.config.path, e))?
                    {
                        lines_read += 1;
                        if !self.send(RawLine::from(line), &cancel) {
                            return Ok(());
                        }
                    }
                    if let Some(partial) = reader.take_partial() {
                        debug!("Shipping unterminated last line of rotated file.");
                        lines_read += 1;
                        if !self.send(RawLine::from(partial), &cancel) {
                            return Ok(());
                        }
                    }

                    if self.reopen(&mut reader)? {
                        info!(
                            path = %self.config.path.display(),
                            file_id = %reader.file_id(),
                            "File rotated, reading new file from the start."
                        );
                    }
                    continue;
                }
                SourceState::Truncated => {
                    if self.reopen(&mut reader)? {
                        info!(
                            path = %self.config.path.display(),
                            "File truncated, reading from the start."
                        );
                    }
                    continue;
                }
            }

            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Swap in a fresh reader at the start of whatever file the path holds.
    /// Returns false if the path vanished in between, the next check handles it.
    fn reopen(&self, reader: &mut LineReader) -> Result<bool> {
        match self.open(StartAt::Beginning) {
            Ok(new_reader) => {
                *reader = new_reader;
                Ok(true)
            }
            Err(Error::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                std::thread::sleep(self.config.poll_interval);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Blocks until the line is queued. Returns false when the pipeline is
    /// shutting down and reading should stop.
    fn send(&self, line: RawLine, cancel: &CancellationToken) -> bool {
        let mut item = line;
        loop {
            match self.output.send_timeout(item, SEND_CHECK_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if cancel.is_cancelled() {
                        // Downstream keeps draining until we hang up, so this
                        // last line still gets through.
                        if self.output.send_blocking(back).is_err() {
                            debug!("Parser went away during shutdown.");
                        }
                        return false;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected) => {
                    debug!("Parser queue closed, stopping tailer.");
                    return false;
                }
            }
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::config::StartAt;
use super::file_id::FileId;
use super::fingerprint::Fingerprint;

/// What the configured path looks like compared to the handle being read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Same file, nothing unusual
    Unchanged,
    /// The path now points at a different file
    Rotated,
    /// The file shrank below our offset or its leading bytes changed
    Truncated,
    /// Nothing exists at the path right now
    Missing,
}

/// Reads newline-terminated records from one open file, tracking the cursor.
///
/// A trailing record without its newline is held back and completed by a
/// later read, so a line that is still being written is never split.
pub struct LineReader {
    path: PathBuf,
    reader: BufReader<File>,
    file_id: FileId,
    /// Bytes consumed from the file, including the held back partial record
    offset: u64,
    pending: Vec<u8>,
    fingerprint: Fingerprint,
    fingerprint_size: usize,
    max_line_size: usize,
    /// Modification time seen by the last source check
    last_modified: Option<SystemTime>,
}

impl LineReader {
    /// Open the file at `path` and position the cursor according to `start_at`.
    pub fn open(
        path: impl AsRef<Path>,
        start_at: StartAt,
        fingerprint_size: usize,
        max_line_size: usize,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is a directory", path.display()),
            ));
        }

        let file_id = FileId::from_metadata(&metadata);
        let fingerprint = Fingerprint::new(&mut file, fingerprint_size)?;

        let offset = match start_at {
            StartAt::Beginning => 0,
            StartAt::End => metadata.len(),
        };
        file.seek(SeekFrom::Start(offset))?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            file_id,
            offset,
            pending: Vec::new(),
            fingerprint,
            fingerprint_size,
            max_line_size,
            last_modified: metadata.modified().ok(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next complete record, without its line terminator.
    ///
    /// Returns `Ok(None)` at the end of the available data.
    pub fn read_line(&mut self) -> io::Result<Option<Bytes>> {
        let start = self.offset;
        let n = self.reader.read_until(b'\n', &mut self.pending)?;
        self.offset += n as u64;

        // Grow a short fingerprint from the bytes that directly follow it
        if n > 0
            && self.fingerprint.len() < self.fingerprint_size
            && start == self.fingerprint.len() as u64
        {
            let fresh = &self.pending[self.pending.len() - n..];
            self.fingerprint.extend(fresh, self.fingerprint_size);
        }

        if self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }

        let mut line = std::mem::take(&mut self.pending);
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        Ok(Some(self.cap(line)))
    }

    /// Hand out the held back partial record, used when the file is abandoned.
    pub fn take_partial(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(self.cap(line))
    }

    /// Compare the path against the open handle. Only meaningful at EOF.
    pub fn check_source(&mut self) -> io::Result<SourceState> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SourceState::Missing),
            Err(e) => return Err(e),
        };

        if FileId::from_metadata(&metadata) != self.file_id {
            return Ok(SourceState::Rotated);
        }

        let size = metadata.len();
        if size < self.offset {
            return Ok(SourceState::Truncated);
        }

        // A file refilled to exactly our offset only shows up in its mtime
        let modified = metadata.modified().ok();
        let touched = modified.is_some() && modified != self.last_modified;
        self.last_modified = modified;

        if size > self.offset || touched {
            // Either a write raced our last read, or the file was emptied and
            // refilled up to or past our offset. Only the leading bytes tell
            // them apart.
            let mut file = match File::open(&self.path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(SourceState::Missing);
                }
                Err(e) => return Err(e),
            };
            let current = Fingerprint::new(&mut file, self.fingerprint_size)?;
            if !self.fingerprint.is_prefix_of(&current) {
                return Ok(SourceState::Truncated);
            }
            if current.len() > self.fingerprint.len() {
                self.fingerprint = current;
            }
        }

        Ok(SourceState::Unchanged)
    }

    fn cap(&self, mut line: Vec<u8>) -> Bytes {
        if line.len() > self.max_line_size {
            tracing::warn!(
                path = %self.path.display(),
                offset = self.offset,
                length = line.len(),
                max_line_size = self.max_line_size,
                "Line exceeds maximum size, truncating."
            );
            line.truncate(self.max_line_size);
        }
        Bytes::from(line)
    }
}

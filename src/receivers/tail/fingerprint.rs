// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// The first N bytes of a file.
///
/// A file truncated and refilled between two polls can end up larger than the
/// old read offset, so its size alone doesn't reveal the rewrite. Comparing the
/// leading bytes does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Read up to `size` bytes from the start of the file.
    ///
    /// Moves the file position, so never call it on the handle being tailed.
    pub fn new(file: &mut File, size: usize) -> io::Result<Self> {
        let mut first_bytes = Vec::with_capacity(size);
        file.seek(SeekFrom::Start(0))?;
        file.by_ref().take(size as u64).read_to_end(&mut first_bytes)?;

        Ok(Self { first_bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { first_bytes: bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    pub fn len(&self) -> usize {
        self.first_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// Append bytes read contiguously after the recorded prefix, up to `size`
    /// bytes in total.
    pub fn extend(&mut self, bytes: &[u8], size: usize) {
        let room = size.saturating_sub(self.first_bytes.len());
        let take = room.min(bytes.len());
        self.first_bytes.extend_from_slice(&bytes[..take]);
    }

    /// Whether `current`, taken later from the same file, still begins with
    /// the bytes recorded here. An empty fingerprint has nothing to contradict.
    pub fn is_prefix_of(&self, current: &Fingerprint) -> bool {
        current.first_bytes.starts_with(&self.first_bytes)
    }
}

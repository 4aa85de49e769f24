// SPDX-License-Identifier: Apache-2.0

//! File identity based on device and inode.
//!
//! The identity of the file behind the configured path changes when a log
//! rotator moves the old file away and creates a new one, while the identity of
//! the handle we hold open stays the same.

use std::fs::{File, Metadata};
use std::io;

/// Device ID + inode number of a file.
///
/// On platforms without inodes every file reports the same identity, and
/// rotation is only noticed through truncation or a changed fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    dev: u64,
    ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Self {
        Self { dev: 0, ino: 0 }
    }

    /// Identity of an open file handle.
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tempfile::{NamedTempFile, TempDir};

    fn id_of(path: &Path) -> FileId {
        FileId::from_metadata(&std::fs::metadata(path).unwrap())
    }

    #[test]
    fn test_file_id_same_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();

        let id1 = id_of(file.path());
        let id2 = FileId::from_file(file.as_file()).unwrap();

        assert_eq!(id1, id2);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_id_changes_when_path_is_recreated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.log");
        std::fs::write(&path, b"old\n").unwrap();

        // Hold the old file open so its inode can't be reused
        let old = File::open(&path).unwrap();
        let before = FileId::from_file(&old).unwrap();

        std::fs::rename(&path, dir.path().join("access.log.1")).unwrap();
        std::fs::write(&path, b"new\n").unwrap();

        let after = id_of(&path);
        assert_ne!(before, after);
        assert_eq!(before, FileId::from_file(&old).unwrap());
    }

    #[test]
    fn test_file_id_stable_across_append() {
        let file = NamedTempFile::new().unwrap();
        let id1 = id_of(file.path());

        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(file.path())
            .unwrap();
        f.write_all(b"more content").unwrap();

        assert_eq!(id1, id_of(file.path()));
    }

    #[test]
    fn test_file_id_display() {
        let id = FileId { dev: 123, ino: 456 };
        assert_eq!(format!("{}", id), "123:456");
    }
}

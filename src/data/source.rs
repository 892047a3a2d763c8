//! Raw byte access to input files.

use std::path::{Path, PathBuf};

use crate::data::error::LoadError;

/// The complete contents of one input file.
///
/// A source is read fully on open and is read-only afterwards; it is owned by
/// a single load operation.
#[derive(Debug, Clone)]
pub struct ByteSource {
    name: String,
    path: Option<PathBuf>,
    bytes: Vec<u8>,
}

impl ByteSource {
    /// Read a file into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
        log::trace!("ByteSource: read {} bytes from {}", bytes.len(), path.display());
        Ok(Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: Some(path.to_path_buf()),
            bytes,
        })
    }

    /// Wrap bytes that are already in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            path: None,
            bytes,
        }
    }

    /// File name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the source was opened from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Up to `n` leading bytes, for magic detection.
    pub fn head(&self, n: usize) -> &[u8] {
        &self.bytes[..n.min(self.bytes.len())]
    }

    /// Exactly `len` bytes starting at `offset`.
    pub fn read_range(&self, offset: usize, len: usize) -> Result<&[u8], LoadError> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                LoadError::size_mismatch(offset.saturating_add(len), self.bytes.len())
            })?;
        Ok(&self.bytes[offset..end])
    }

    /// Everything from `offset` to the end of the file.
    pub fn tail_from(&self, offset: usize) -> Result<&[u8], LoadError> {
        self.bytes
            .get(offset..)
            .ok_or_else(|| LoadError::size_mismatch(offset, self.bytes.len()))
    }
}

/// Files participating in a single load: the file the caller named and, for
/// ENVI, the binary companion found next to it.
#[derive(Debug, Clone)]
pub struct LoadSources {
    pub primary: ByteSource,
    pub companion: Option<ByteSource>,
}

impl LoadSources {
    /// A single-file load.
    pub fn single(primary: ByteSource) -> Self {
        Self {
            primary,
            companion: None,
        }
    }

    /// A header + data pair.
    pub fn pair(primary: ByteSource, companion: ByteSource) -> Self {
        Self {
            primary,
            companion: Some(companion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_range_bounds() {
        let source = ByteSource::from_bytes("mem", (0..10).collect());
        assert_eq!(source.read_range(2, 3).unwrap(), &[2, 3, 4]);
        assert_eq!(source.read_range(10, 0).unwrap(), &[] as &[u8]);
        assert!(matches!(
            source.read_range(8, 3),
            Err(LoadError::SizeMismatch {
                expected: 11,
                actual: 10
            })
        ));
        assert!(source.read_range(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_head_and_tail() {
        let source = ByteSource::from_bytes("mem", vec![1, 2, 3]);
        assert_eq!(source.head(8), &[1, 2, 3]);
        assert_eq!(source.tail_from(1).unwrap(), &[2, 3]);
        assert!(source.tail_from(4).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let err = ByteSource::open("/nonexistent/cube.npy").unwrap_err();
        assert!(matches!(err, LoadError::IoFailure { .. }));
    }
}

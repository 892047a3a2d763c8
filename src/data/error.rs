//! Error types for cube loading.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The four on-disk container formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// NumPy `.npy` array
    Npy,
    /// Baseline uncompressed TIFF
    Tiff,
    /// MATLAB level-5 `.mat` container
    Mat,
    /// ENVI `.hdr` text header plus a raw binary companion
    Envi,
}

impl FileFormat {
    /// Map a lowercase file extension (without the dot) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "npy" => Some(Self::Npy),
            "tif" | "tiff" => Some(Self::Tiff),
            "mat" => Some(Self::Mat),
            "hdr" => Some(Self::Envi),
            _ => None,
        }
    }

    /// Extensions claimed by this format.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Npy => &["npy"],
            Self::Tiff => &["tif", "tiff"],
            Self::Mat => &["mat"],
            Self::Envi => &["hdr"],
        }
    }

    /// Short lowercase name used in log lines and messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Npy => "npy",
            Self::Tiff => "tiff",
            Self::Mat => "mat",
            Self::Envi => "envi",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur while loading a cube.
///
/// Every variant is terminal for the load it came from; no partially decoded
/// cube is ever returned alongside one.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Extension and leading bytes disagree, or neither identifies a format
    #[error(
        "File content does not match extension '{extension}' (detected: {})",
        .detected.map(|f| f.name()).unwrap_or("unknown")
    )]
    FormatMismatch {
        /// Lowercased extension of the input path (empty if none)
        extension: String,
        /// Format recognised from the leading bytes, if any
        detected: Option<FileFormat>,
    },

    /// ENVI header has no sibling binary file
    #[error("No data file found next to {header:?} (tried: {})", .tried.join(", "))]
    MissingDataFile {
        /// The `.hdr` path that was opened
        header: PathBuf,
        /// Extensions that were probed, in order
        tried: Vec<String>,
    },

    /// Header is structurally invalid
    #[error("Invalid {format} header: {reason}")]
    InvalidHeader {
        /// Format whose header failed to parse
        format: FileFormat,
        /// Description of the problem
        reason: String,
    },

    /// A required header field is absent
    #[error("Missing required header field: {0}")]
    MissingHeaderField(String),

    /// Element type code not in the recognised set
    #[error("Unsupported {format} element type: {code}")]
    UnsupportedElementType {
        /// Format that declared the type
        format: FileFormat,
        /// The type code or descriptor as written in the file
        code: String,
    },

    /// TIFF compression other than none (1)
    #[error("Unsupported TIFF compression: {0} (only uncompressed is supported)")]
    UnsupportedCompression(u32),

    /// TIFF bit depth other than 8
    #[error("Unsupported TIFF bit depth: {0} (only 8-bit samples are supported)")]
    UnsupportedBitDepth(u32),

    /// Array rank other than 2 or 3
    #[error("Unsupported array rank: {0} (expected 2 or 3)")]
    UnsupportedRank(usize),

    /// MAT v7.3 (HDF5-backed) or unknown container version
    #[error("Unsupported MAT file version 0x{version:04x} (only level 5 is supported)")]
    UnsupportedMatVersion {
        /// Version word from the MAT header
        version: u16,
    },

    /// Pages of a multi-page TIFF disagree on geometry
    #[error(
        "TIFF page {page} is {}x{}, expected {}x{}",
        .actual.0, .actual.1, .expected.0, .expected.1
    )]
    InconsistentPageGeometry {
        /// Zero-based page index
        page: usize,
        /// (width, height) of the first page
        expected: (u32, u32),
        /// (width, height) of the offending page
        actual: (u32, u32),
    },

    /// Pixel payload length disagrees with the declared shape
    #[error("Size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        /// Byte count implied by the header
        expected: usize,
        /// Byte count actually present
        actual: usize,
    },

    /// No MAT variable met the selection criteria
    #[error("No suitable variable found ({inspected} numeric variables inspected)")]
    NoSuitableVariable {
        /// Number of numeric matrices examined
        inspected: usize,
    },

    /// I/O error while reading an input file
    #[error("IO error reading {path:?}: {source}")]
    IoFailure {
        /// File being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Create an invalid header error.
    pub fn invalid_header(format: FileFormat, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            format,
            reason: reason.into(),
        }
    }

    /// Create a missing header field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingHeaderField(field.into())
    }

    /// Create an unsupported element type error.
    pub fn unsupported_type(format: FileFormat, code: impl fmt::Display) -> Self {
        Self::UnsupportedElementType {
            format,
            code: code.to_string(),
        }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::SizeMismatch { expected, actual }
    }

    /// Wrap an I/O error with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoFailure {
            path: path.into(),
            source,
        }
    }
}

//! Format-independent header metadata.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::data::error::{FileFormat, LoadError};
use crate::data::layout::{Dims, SourceLayout};
use crate::data::validate;

/// Parsed header of any supported format.
///
/// Holds the logical dimensions, how the payload is physically stored and,
/// for formats with free-form headers, the raw textual fields.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMetadata {
    /// Format the header was read from
    pub format: FileFormat,
    /// Logical `(H, W, C)` dimensions
    pub dims: Dims,
    /// Physical order, element type and byte order of the payload
    pub layout: SourceLayout,
    /// Byte offset of the first pixel in the file that holds the payload
    pub data_offset: usize,
    /// Raw header fields (ENVI keys, TIFF page summary)
    pub fields: BTreeMap<String, String>,
    /// Selected variable (MAT only)
    pub variable: Option<String>,
}

impl HeaderMetadata {
    /// Create header metadata, rejecting empty dimensions.
    pub fn new(
        format: FileFormat,
        dims: Dims,
        layout: SourceLayout,
        data_offset: usize,
    ) -> Result<Self, LoadError> {
        if dims.is_degenerate() {
            return Err(LoadError::invalid_header(
                format,
                format!("dimensions must be positive, got {dims}"),
            ));
        }
        if dims.element_count().is_none() {
            return Err(LoadError::invalid_header(
                format,
                format!("dimensions {dims} overflow"),
            ));
        }
        Ok(Self {
            format,
            dims,
            layout,
            data_offset,
            fields: BTreeMap::new(),
            variable: None,
        })
    }

    /// Attach raw header fields.
    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = fields;
        self
    }

    /// Record the selected variable name.
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    /// Payload size implied by dimensions and element type.
    pub fn expected_bytes(&self) -> Result<usize, LoadError> {
        validate::expected_payload_bytes(self.dims, self.layout.element_type)
    }
}

/// Header plus the exact pixel payload it describes.
///
/// Formats whose payload is contiguous in the source file borrow it; TIFF
/// strips and MAT (possibly compressed) elements are gathered into an owned
/// buffer.
#[derive(Debug)]
pub struct PreparedPayload<'a> {
    pub header: HeaderMetadata,
    pub payload: Cow<'a, [u8]>,
}

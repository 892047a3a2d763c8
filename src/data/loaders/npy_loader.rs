//! Loader for NumPy `.npy` files.
//!
//! Supports 2D `(H, W)` and 3D `(H, W, C)` arrays in C or Fortran order,
//! with either byte order, in format versions 1.0, 2.0 and 3.0.

use std::borrow::Cow;

use crate::data::element::{ByteOrder, ElementType};
use crate::data::error::{FileFormat, LoadError};
use crate::data::header::{HeaderMetadata, PreparedPayload};
use crate::data::layout::{Dims, SourceLayout, StorageOrder};
use crate::data::loader::HyperspectralLoader;
use crate::data::sniff::NPY_MAGIC;
use crate::data::source::LoadSources;

/// Parsed `.npy` preamble.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyHeader {
    /// Format version `(major, minor)`
    pub version: (u8, u8),
    /// The `descr` string as written, e.g. `<f4`
    pub descr: String,
    pub element_type: ElementType,
    pub byte_order: ByteOrder,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// Offset of the first data byte
    pub data_offset: usize,
}

impl NpyHeader {
    /// Parse magic, version and the header dictionary.
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        if !bytes.starts_with(NPY_MAGIC) {
            return Err(invalid("missing \\x93NUMPY magic"));
        }
        let (major, minor) = match bytes.get(6..8) {
            Some(&[major, minor]) => (major, minor),
            _ => return Err(invalid("truncated version")),
        };

        let (header_len, header_start) = match major {
            1 => {
                let raw = bytes.get(8..10).ok_or_else(|| invalid("truncated header length"))?;
                (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
            }
            2 | 3 => {
                let raw = bytes.get(8..12).ok_or_else(|| invalid("truncated header length"))?;
                (
                    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                    12,
                )
            }
            other => return Err(invalid(format!("unknown format version {other}.{minor}"))),
        };

        let data_offset = header_start + header_len;
        let text = bytes
            .get(header_start..data_offset)
            .ok_or_else(|| invalid(format!("header of {header_len} bytes is truncated")))?;
        let text = String::from_utf8_lossy(text);
        log::trace!("NpyLoader: header dict {}", text.trim_end());

        let descr = dict_value(&text, "descr")
            .and_then(quoted)
            .ok_or_else(|| LoadError::missing_field("descr"))?;
        let fortran_order = match dict_value(&text, "fortran_order") {
            Some(v) if v.starts_with("True") => true,
            Some(v) if v.starts_with("False") => false,
            Some(_) => return Err(invalid("fortran_order must be True or False")),
            None => return Err(LoadError::missing_field("fortran_order")),
        };
        let shape = dict_value(&text, "shape")
            .ok_or_else(|| LoadError::missing_field("shape"))
            .and_then(parse_shape)?;

        let (element_type, byte_order) = parse_descr(descr)?;

        Ok(Self {
            version: (major, minor),
            descr: descr.to_string(),
            element_type,
            byte_order,
            fortran_order,
            shape,
            data_offset,
        })
    }

    /// Logical dimensions: `(H, W)` becomes `(H, W, 1)`.
    pub fn dims(&self) -> Result<Dims, LoadError> {
        match self.shape.as_slice() {
            &[h, w] => Ok(Dims::new(h, w, 1)),
            &[h, w, c] => Ok(Dims::new(h, w, c)),
            other => Err(LoadError::UnsupportedRank(other.len())),
        }
    }

    pub fn storage_order(&self) -> StorageOrder {
        if self.fortran_order {
            StorageOrder::ColumnMajorHwc
        } else {
            StorageOrder::RowMajorHwc
        }
    }

    /// Convert to format-independent metadata.
    pub fn to_metadata(&self) -> Result<HeaderMetadata, LoadError> {
        let layout = SourceLayout::new(self.storage_order(), self.element_type, self.byte_order);
        HeaderMetadata::new(FileFormat::Npy, self.dims()?, layout, self.data_offset)
    }
}

fn invalid(reason: impl Into<String>) -> LoadError {
    LoadError::invalid_header(FileFormat::Npy, reason)
}

/// Text following `'key':` in a Python dict literal.
fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let start = [format!("'{key}'"), format!("\"{key}\"")]
        .iter()
        .find_map(|quoted| dict.find(quoted.as_str()).map(|pos| pos + quoted.len()))?;
    dict[start..].trim_start().strip_prefix(':').map(str::trim_start)
}

/// Contents of a leading single- or double-quoted string.
fn quoted(value: &str) -> Option<&str> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let rest = &value[1..];
    rest.find(quote).map(|end| &rest[..end])
}

fn parse_shape(value: &str) -> Result<Vec<usize>, LoadError> {
    let inner = value
        .strip_prefix('(')
        .and_then(|rest| rest.find(')').map(|end| &rest[..end]))
        .ok_or_else(|| invalid(format!("malformed shape '{value}'")))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| invalid(format!("malformed shape entry '{dim}'")))
        })
        .collect()
}

/// Split a dtype descriptor like `<f4` into element type and byte order.
fn parse_descr(descr: &str) -> Result<(ElementType, ByteOrder), LoadError> {
    let unsupported = || LoadError::unsupported_type(FileFormat::Npy, descr);

    let (byte_order, kind) = match descr.split_at_checked(1) {
        Some(("<" | "|" | "=", kind)) => (ByteOrder::Little, kind),
        Some((">", kind)) => (ByteOrder::Big, kind),
        _ => return Err(unsupported()),
    };

    let element_type = match kind {
        "i1" => ElementType::Int8,
        "u1" => ElementType::Uint8,
        "i2" => ElementType::Int16,
        "u2" => ElementType::Uint16,
        "i4" => ElementType::Int32,
        "u4" => ElementType::Uint32,
        "f4" => ElementType::Float32,
        "f8" => ElementType::Float64,
        _ => return Err(unsupported()),
    };

    Ok((element_type, byte_order))
}

/// Loader for NumPy `.npy` files.
pub struct NpyLoader;

impl HyperspectralLoader for NpyLoader {
    fn format(&self) -> FileFormat {
        FileFormat::Npy
    }

    fn display_name(&self) -> &'static str {
        "NumPy Array (.npy)"
    }

    fn prepare<'a>(&self, sources: &'a LoadSources) -> Result<PreparedPayload<'a>, LoadError> {
        let npy = NpyHeader::parse(sources.primary.bytes())?;
        log::debug!(
            "NpyLoader: v{}.{} descr={} fortran_order={} shape={:?}",
            npy.version.0,
            npy.version.1,
            npy.descr,
            npy.fortran_order,
            npy.shape
        );

        let header = npy.to_metadata()?;
        let payload = sources.primary.tail_from(npy.data_offset)?;

        Ok(PreparedPayload {
            header,
            payload: Cow::Borrowed(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, Array3, ShapeBuilder};
    use ndarray_npy::WriteNpyExt;

    use super::*;
    use crate::data::source::ByteSource;

    fn sources(bytes: Vec<u8>) -> LoadSources {
        LoadSources::single(ByteSource::from_bytes("cube.npy", bytes))
    }

    /// Hand-built `.npy` with an arbitrary header dict.
    fn npy_bytes(major: u8, dict: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = NPY_MAGIC.to_vec();
        out.extend([major, 0]);
        if major == 1 {
            out.extend((dict.len() as u16).to_le_bytes());
        } else {
            out.extend((dict.len() as u32).to_le_bytes());
        }
        out.extend(dict.as_bytes());
        out.extend(payload);
        out
    }

    #[test]
    fn test_loader_metadata() {
        let loader = NpyLoader;
        assert_eq!(loader.id(), "npy");
        assert!(loader.extensions().contains(&"npy"));

        let valid_magic = [0x93, b'N', b'U', b'M', b'P', b'Y', 0x01, 0x00];
        assert!(loader.can_load(&valid_magic));
        assert!(!loader.can_load(&[0x89, 0x50, 0x4E, 0x47]));
    }

    #[test]
    fn test_c_order_matches_ndarray() {
        let array = Array3::from_shape_fn((2, 3, 4), |(h, w, c)| (h * 100 + w * 10 + c) as f32);
        let mut bytes = Vec::new();
        array.write_npy(&mut bytes).unwrap();

        let loaded = NpyLoader.load(&sources(bytes)).unwrap();
        assert_eq!(loaded.header.layout.order, StorageOrder::RowMajorHwc);
        assert_eq!(loaded.cube.view::<f32>().unwrap(), array.view());
    }

    #[test]
    fn test_fortran_order_matches_ndarray() {
        let array = Array3::from_shape_fn((2, 3, 4).f(), |(h, w, c)| (h * 100 + w * 10 + c) as u16);
        let mut bytes = Vec::new();
        array.write_npy(&mut bytes).unwrap();

        let loaded = NpyLoader.load(&sources(bytes)).unwrap();
        assert_eq!(loaded.header.layout.order, StorageOrder::ColumnMajorHwc);
        assert_eq!(loaded.cube.get(1, 2, 3), Some(123.0));
        assert_eq!(loaded.cube.view::<u16>().unwrap(), array.view());
    }

    #[test]
    fn test_two_dimensional_is_single_band() {
        let array = Array2::from_shape_fn((3, 5), |(h, w)| (h * 5 + w) as f64);
        let mut bytes = Vec::new();
        array.write_npy(&mut bytes).unwrap();

        let loaded = NpyLoader.load(&sources(bytes)).unwrap();
        assert_eq!(loaded.cube.dims(), Dims::new(3, 5, 1));
        assert_eq!(loaded.cube.get(2, 4, 0), Some(14.0));
    }

    #[test]
    fn test_big_endian_version_three() {
        let payload: Vec<u8> = (0..6i16).flat_map(|v| (v - 3).to_be_bytes()).collect();
        let dict = "{'descr': '>i2', 'fortran_order': False, 'shape': (1, 2, 3), }\n";
        let loaded = NpyLoader.load(&sources(npy_bytes(3, dict, &payload))).unwrap();

        assert_eq!(loaded.cube.element_type(), ElementType::Int16);
        assert_eq!(loaded.cube.as_slice::<i16>().unwrap(), &[-3, -2, -1, 0, 1, 2]);
    }

    #[test]
    fn test_header_parse_details() {
        let dict = "{\"descr\": \"|u1\", \"fortran_order\": True, \"shape\": (4, 2), }";
        let header = NpyHeader::parse(&npy_bytes(2, dict, &[])).unwrap();
        assert_eq!(header.version, (2, 0));
        assert_eq!(header.element_type, ElementType::Uint8);
        assert!(header.fortran_order);
        assert_eq!(header.shape, vec![4, 2]);
        assert_eq!(header.data_offset, 12 + dict.len());
    }

    #[test]
    fn test_unsupported_rank() {
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (2, 2, 2, 2), }";
        let err = NpyLoader.load(&sources(npy_bytes(1, dict, &[0; 64]))).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedRank(4)));

        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (5,), }";
        let err = NpyLoader.load(&sources(npy_bytes(1, dict, &[0; 20]))).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedRank(1)));
    }

    #[test]
    fn test_unsupported_descr() {
        for descr in ["<c8", "|b1", "<i8", "<U4", "f4"] {
            let dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': (1, 1), }}");
            let err = NpyHeader::parse(&npy_bytes(1, &dict, &[])).unwrap_err();
            assert!(
                matches!(err, LoadError::UnsupportedElementType { format: FileFormat::Npy, .. }),
                "{descr}"
            );
        }
    }

    #[test]
    fn test_payload_size_is_exact() {
        let dict = "{'descr': '<u2', 'fortran_order': False, 'shape': (2, 2, 1), }";
        let err = NpyLoader.load(&sources(npy_bytes(1, dict, &[0; 6]))).unwrap_err();
        assert!(matches!(err, LoadError::SizeMismatch { expected: 8, actual: 6 }));

        let err = NpyLoader.load(&sources(npy_bytes(1, dict, &[0; 10]))).unwrap_err();
        assert!(matches!(err, LoadError::SizeMismatch { expected: 8, actual: 10 }));
    }

    #[test]
    fn test_zero_extent_is_invalid() {
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (0, 3, 2), }";
        let err = NpyLoader.load(&sources(npy_bytes(1, dict, &[]))).unwrap_err();
        assert!(matches!(err, LoadError::InvalidHeader { format: FileFormat::Npy, .. }));
    }

    #[test]
    fn test_missing_shape() {
        let dict = "{'descr': '<f4', 'fortran_order': False, }";
        let err = NpyHeader::parse(&npy_bytes(1, dict, &[])).unwrap_err();
        assert!(matches!(err, LoadError::MissingHeaderField(ref f) if f == "shape"));
    }
}

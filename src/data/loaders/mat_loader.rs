//! Loader for MATLAB level-5 `.mat` containers.
//!
//! A level-5 file is a 128-byte text header followed by tagged data
//! elements. Arrays are `miMATRIX` elements, possibly wrapped in a
//! zlib-compressed `miCOMPRESSED` element. Arrays are stored in column-major
//! (Fortran) order, so `[H, W, C]` dimensions map directly onto
//! [`StorageOrder::ColumnMajorHwc`].
//!
//! v7.3 files are HDF5 containers and are rejected.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

use crate::data::element::{ByteOrder, ElementType, Sample, convert_payload};
use crate::data::error::{FileFormat, LoadError};
use crate::data::header::{HeaderMetadata, PreparedPayload};
use crate::data::layout::{Dims, SourceLayout, StorageOrder};
use crate::data::loader::HyperspectralLoader;
use crate::data::source::LoadSources;

/// Length of the fixed file header.
pub(crate) const MAT_HEADER_LEN: usize = 128;
/// Length of the descriptive text at the start of the header.
pub(crate) const MAT_TEXT_LEN: usize = 116;
/// Version word of a level-5 file.
pub(crate) const MAT_VERSION_5: u16 = 0x0100;
const MAT_VERSION_73: u16 = 0x0200;

pub(crate) const MI_INT8: u32 = 1;
pub(crate) const MI_UINT8: u32 = 2;
pub(crate) const MI_INT16: u32 = 3;
pub(crate) const MI_UINT16: u32 = 4;
pub(crate) const MI_INT32: u32 = 5;
pub(crate) const MI_UINT32: u32 = 6;
pub(crate) const MI_SINGLE: u32 = 7;
pub(crate) const MI_DOUBLE: u32 = 9;
pub(crate) const MI_INT64: u32 = 12;
pub(crate) const MI_UINT64: u32 = 13;
pub(crate) const MI_MATRIX: u32 = 14;
pub(crate) const MI_COMPRESSED: u32 = 15;

const FLAG_COMPLEX: u32 = 0x0800;

/// Element type of a numeric array class id (`mxDOUBLE_CLASS` = 6, ...).
pub(crate) fn class_element_type(class: u8) -> Option<ElementType> {
    match class {
        6 => Some(ElementType::Float64),
        7 => Some(ElementType::Float32),
        8 => Some(ElementType::Int8),
        9 => Some(ElementType::Uint8),
        10 => Some(ElementType::Int16),
        11 => Some(ElementType::Uint16),
        12 => Some(ElementType::Int32),
        13 => Some(ElementType::Uint32),
        _ => None,
    }
}

pub(crate) fn class_id(element_type: ElementType) -> u8 {
    match element_type {
        ElementType::Float64 => 6,
        ElementType::Float32 => 7,
        ElementType::Int8 => 8,
        ElementType::Uint8 => 9,
        ElementType::Int16 => 10,
        ElementType::Uint16 => 11,
        ElementType::Int32 => 12,
        ElementType::Uint32 => 13,
    }
}

/// Element type of a data element storage code (`miDOUBLE` = 9, ...).
pub(crate) fn storage_element_type(mi: u32) -> Option<ElementType> {
    match mi {
        MI_INT8 => Some(ElementType::Int8),
        MI_UINT8 => Some(ElementType::Uint8),
        MI_INT16 => Some(ElementType::Int16),
        MI_UINT16 => Some(ElementType::Uint16),
        MI_INT32 => Some(ElementType::Int32),
        MI_UINT32 => Some(ElementType::Uint32),
        MI_SINGLE => Some(ElementType::Float32),
        MI_DOUBLE => Some(ElementType::Float64),
        _ => None,
    }
}

pub(crate) fn storage_code(element_type: ElementType) -> u32 {
    match element_type {
        ElementType::Int8 => MI_INT8,
        ElementType::Uint8 => MI_UINT8,
        ElementType::Int16 => MI_INT16,
        ElementType::Uint16 => MI_UINT16,
        ElementType::Int32 => MI_INT32,
        ElementType::Uint32 => MI_UINT32,
        ElementType::Float32 => MI_SINGLE,
        ElementType::Float64 => MI_DOUBLE,
    }
}

fn invalid(reason: impl Into<String>) -> LoadError {
    LoadError::invalid_header(FileFormat::Mat, reason)
}

/// The fixed 128-byte file header.
#[derive(Debug, Clone, PartialEq)]
pub struct MatHeader {
    /// Descriptive text, trailing padding removed
    pub text: String,
    pub version: u16,
    pub byte_order: ByteOrder,
}

impl MatHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        let header = bytes
            .get(..MAT_HEADER_LEN)
            .ok_or_else(|| invalid(format!("file is shorter than the {MAT_HEADER_LEN}-byte header")))?;

        let text = String::from_utf8_lossy(&header[..MAT_TEXT_LEN])
            .trim_end_matches(['\0', ' '])
            .to_string();
        if text.starts_with("MATLAB 7.3") {
            return Err(LoadError::UnsupportedMatVersion {
                version: MAT_VERSION_73,
            });
        }

        let byte_order = match &header[126..128] {
            b"IM" => ByteOrder::Little,
            b"MI" => ByteOrder::Big,
            other => {
                return Err(invalid(format!("unknown endian indicator {other:?}")));
            }
        };

        let version = u16::decode(&header[124..126], byte_order);
        if version != MAT_VERSION_5 {
            return Err(LoadError::UnsupportedMatVersion { version });
        }

        Ok(Self {
            text,
            version,
            byte_order,
        })
    }
}

/// Location of one data element inside a buffer.
#[derive(Debug, Clone, Copy)]
struct Tag {
    data_type: u32,
    start: usize,
    len: usize,
    /// Position of the following element
    next: usize,
}

/// Read the element tag at `pos`. A tail shorter than a tag is ignored.
fn read_tag(bytes: &[u8], pos: usize, order: ByteOrder) -> Result<Option<Tag>, LoadError> {
    let Some(word) = pos.checked_add(8).and_then(|end| bytes.get(pos..end)) else {
        return Ok(None);
    };
    let first = u32::decode(&word[..4], order);

    // Small data element: type and length share the first word
    if first >> 16 != 0 {
        let len = (first >> 16) as usize;
        if len > 4 {
            return Err(invalid(format!(
                "small data element at offset {pos} claims {len} bytes"
            )));
        }
        return Ok(Some(Tag {
            data_type: first & 0xFFFF,
            start: pos + 4,
            len,
            next: pos + 8,
        }));
    }

    let len = u32::decode(&word[4..], order) as usize;
    let start = pos + 8;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| LoadError::size_mismatch(start.saturating_add(len), bytes.len()))?;

    // Compressed elements are not padded
    let next = if first == MI_COMPRESSED {
        end
    } else {
        end.next_multiple_of(8).min(bytes.len())
    };

    Ok(Some(Tag {
        data_type: first,
        start,
        len,
        next,
    }))
}

/// Read the next sub-element of a matrix, advancing `pos`.
fn next_subelement<'a>(
    data: &'a [u8],
    pos: &mut usize,
    order: ByteOrder,
) -> Result<Option<(u32, &'a [u8])>, LoadError> {
    let Some(tag) = read_tag(data, *pos, order)? else {
        return Ok(None);
    };
    *pos = tag.next;
    Ok(Some((tag.data_type, &data[tag.start..tag.start + tag.len])))
}

fn decode_dims(data_type: u32, bytes: &[u8], order: ByteOrder) -> Result<Vec<usize>, LoadError> {
    let negative = || invalid("negative array dimension");
    match data_type {
        MI_INT32 => bytes
            .chunks_exact(4)
            .map(|c| usize::try_from(i32::decode(c, order)).map_err(|_| negative()))
            .collect(),
        MI_UINT32 => Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::decode(c, order) as usize)
            .collect()),
        MI_INT64 | MI_UINT64 => bytes
            .chunks_exact(8)
            .map(|c| {
                let mut word = [0u8; 8];
                word.copy_from_slice(c);
                let value = match order {
                    ByteOrder::Little => u64::from_le_bytes(word),
                    ByteOrder::Big => u64::from_be_bytes(word),
                };
                if data_type == MI_INT64 && (value as i64) < 0 {
                    return Err(negative());
                }
                usize::try_from(value).map_err(|_| invalid("array dimension overflows"))
            })
            .collect(),
        other => Err(invalid(format!("dimensions stored as element type {other}"))),
    }
}

/// One `miMATRIX` element, borrowing its real-part data.
#[derive(Debug, Clone)]
struct MatMatrix<'a> {
    /// Offset of the top-level element that holds this matrix
    offset: usize,
    name: String,
    class: u8,
    /// Numeric class, `None` for cells, structs, chars, sparse, 64-bit ints
    element_type: Option<ElementType>,
    complex: bool,
    dims: Vec<usize>,
    storage_code: u32,
    real: &'a [u8],
}

impl<'a> MatMatrix<'a> {
    fn parse(data: &'a [u8], order: ByteOrder, offset: usize) -> Result<Option<Self>, LoadError> {
        let mut pos = 0;

        // Empty placeholder matrices carry no sub-elements
        let Some((flags_type, flags)) = next_subelement(data, &mut pos, order)? else {
            return Ok(None);
        };
        if flags_type != MI_UINT32 || flags.len() < 8 {
            return Err(invalid(format!("array flags at offset {offset} are malformed")));
        }
        let flags = u32::decode(flags, order);
        let class = (flags & 0xFF) as u8;

        let (dims_type, dims) = next_subelement(data, &mut pos, order)?
            .ok_or_else(|| invalid(format!("matrix at offset {offset} has no dimensions")))?;
        let dims = decode_dims(dims_type, dims, order)?;

        let (_, name) = next_subelement(data, &mut pos, order)?
            .ok_or_else(|| invalid(format!("matrix at offset {offset} has no name")))?;
        let name = String::from_utf8_lossy(name).trim_end_matches('\0').to_string();

        let element_type = class_element_type(class);
        let (storage_code, real) = if element_type.is_some() {
            next_subelement(data, &mut pos, order)?
                .ok_or_else(|| invalid(format!("variable '{name}' has no data")))?
        } else {
            (0, &[][..])
        };

        Ok(Some(Self {
            offset,
            name,
            class,
            element_type,
            complex: flags & FLAG_COMPLEX != 0,
            dims,
            storage_code,
            real,
        }))
    }
}

/// Visit every matrix in `bytes` from `start`, descending into compressed
/// elements. Stops early when `visit` breaks.
///
/// `enclosing` is the file offset of the compressed element being scanned;
/// compressed elements never nest.
fn scan<B>(
    bytes: &[u8],
    start: usize,
    order: ByteOrder,
    enclosing: Option<usize>,
    visit: &mut dyn FnMut(&MatMatrix<'_>) -> ControlFlow<B>,
) -> Result<ControlFlow<B>, LoadError> {
    let mut pos = start;
    while let Some(tag) = read_tag(bytes, pos, order)? {
        let content = &bytes[tag.start..tag.start + tag.len];
        let offset = enclosing.unwrap_or(pos);

        match tag.data_type {
            MI_MATRIX => {
                if let Some(matrix) = MatMatrix::parse(content, order, offset)? {
                    log::trace!(
                        "MatLoader: '{}' class={} dims={:?} at offset {}",
                        matrix.name,
                        matrix.class,
                        matrix.dims,
                        offset
                    );
                    if let ControlFlow::Break(found) = visit(&matrix) {
                        return Ok(ControlFlow::Break(found));
                    }
                }
            }
            MI_COMPRESSED if enclosing.is_some() => {
                return Err(invalid(format!("nested compressed element inside element at offset {offset}")));
            }
            MI_COMPRESSED => {
                let inflated = miniz_oxide::inflate::decompress_to_vec_zlib(content).map_err(|e| {
                    invalid(format!("cannot inflate element at offset {offset}: {:?}", e.status))
                })?;
                if let ControlFlow::Break(found) = scan(&inflated, 0, order, Some(offset), visit)? {
                    return Ok(ControlFlow::Break(found));
                }
            }
            other => log::trace!("MatLoader: skipping element type {} at offset {}", other, pos),
        }

        pos = tag.next;
    }
    Ok(ControlFlow::Continue(()))
}

/// Summary of one numeric variable in a `.mat` file.
#[derive(Debug, Clone, PartialEq)]
pub struct MatVariableInfo {
    pub name: String,
    pub dims: Vec<usize>,
    pub element_type: ElementType,
    pub complex: bool,
}

/// The variable picked for loading, with its payload widened to its class.
struct Selected {
    name: String,
    offset: usize,
    dims: Dims,
    element_type: ElementType,
    payload: Vec<u8>,
}

impl Selected {
    fn take(matrix: &MatMatrix<'_>, element_type: ElementType, order: ByteOrder) -> Result<Self, LoadError> {
        let dims = match matrix.dims.as_slice() {
            &[h, w] => Dims::new(h, w, 1),
            &[h, w, c] => Dims::new(h, w, c),
            other => return Err(LoadError::UnsupportedRank(other.len())),
        };

        let storage = storage_element_type(matrix.storage_code).ok_or_else(|| {
            LoadError::unsupported_type(FileFormat::Mat, format!("storage type {}", matrix.storage_code))
        })?;
        let expected = dims
            .element_count()
            .and_then(|count| count.checked_mul(storage.size()))
            .ok_or_else(|| invalid(format!("dimensions {dims} overflow")))?;
        if matrix.real.len() != expected {
            return Err(LoadError::size_mismatch(expected, matrix.real.len()));
        }

        if storage != element_type {
            log::debug!(
                "MatLoader: widening '{}' from {} storage to {}",
                matrix.name,
                storage,
                element_type
            );
        }

        Ok(Self {
            name: matrix.name.clone(),
            offset: matrix.offset,
            dims,
            element_type,
            payload: convert_payload(matrix.real, storage, element_type, order),
        })
    }
}

/// Loader for MATLAB level-5 `.mat` files.
///
/// Without a configured variable name the first real 3D array whose class
/// is in `element_types` is loaded. With a name, that variable is loaded if
/// it is a real numeric 2D or 3D array.
pub struct MatLoader {
    variable: Option<String>,
    element_types: Vec<ElementType>,
}

impl MatLoader {
    pub fn new(variable: Option<String>, element_types: Vec<ElementType>) -> Self {
        Self {
            variable,
            element_types,
        }
    }

    /// List the numeric variables of a `.mat` file in file order.
    pub fn list_variables(bytes: &[u8]) -> Result<Vec<MatVariableInfo>, LoadError> {
        let header = MatHeader::parse(bytes)?;
        let mut variables = Vec::new();
        scan::<()>(bytes, MAT_HEADER_LEN, header.byte_order, None, &mut |matrix| {
            if let Some(element_type) = matrix.element_type {
                variables.push(MatVariableInfo {
                    name: matrix.name.clone(),
                    dims: matrix.dims.clone(),
                    element_type,
                    complex: matrix.complex,
                });
            }
            ControlFlow::Continue(())
        })?;
        Ok(variables)
    }

    /// Whether `matrix` (of numeric class `element_type`) should be loaded.
    fn wants(&self, matrix: &MatMatrix<'_>, element_type: ElementType) -> Result<bool, LoadError> {
        if matrix.complex {
            if self.variable.as_deref().is_none_or(|name| name == matrix.name) {
                log::warn!("MatLoader: skipping complex variable '{}'", matrix.name);
            }
            return Ok(false);
        }
        match &self.variable {
            Some(name) if matrix.name == *name => match matrix.dims.len() {
                2 | 3 => Ok(true),
                rank => Err(LoadError::UnsupportedRank(rank)),
            },
            Some(_) => Ok(false),
            None => Ok(matrix.dims.len() == 3 && self.element_types.contains(&element_type)),
        }
    }
}

impl Default for MatLoader {
    fn default() -> Self {
        Self::new(None, vec![ElementType::Float32, ElementType::Float64])
    }
}

impl HyperspectralLoader for MatLoader {
    fn format(&self) -> FileFormat {
        FileFormat::Mat
    }

    fn display_name(&self) -> &'static str {
        "MATLAB Level 5 (.mat)"
    }

    fn prepare<'a>(&self, sources: &'a LoadSources) -> Result<PreparedPayload<'a>, LoadError> {
        let bytes = sources.primary.bytes();
        let mat = MatHeader::parse(bytes)?;
        let order = mat.byte_order;
        log::debug!("MatLoader: '{}' ({})", mat.text, order);

        let mut inspected = 0usize;
        let flow = scan(bytes, MAT_HEADER_LEN, order, None, &mut |matrix| {
            let Some(element_type) = matrix.element_type else {
                return ControlFlow::Continue(());
            };
            inspected += 1;
            match self.wants(matrix, element_type) {
                Ok(false) => ControlFlow::Continue(()),
                Ok(true) => ControlFlow::Break(Selected::take(matrix, element_type, order)),
                Err(e) => ControlFlow::Break(Err(e)),
            }
        })?;

        let selected = match flow {
            ControlFlow::Break(selected) => selected?,
            ControlFlow::Continue(()) => return Err(LoadError::NoSuitableVariable { inspected }),
        };
        log::debug!(
            "MatLoader: selected '{}' ({}, {}) after {} numeric variable(s)",
            selected.name,
            selected.dims,
            selected.element_type,
            inspected
        );

        let mut fields = BTreeMap::new();
        fields.insert("description".to_string(), mat.text.clone());
        fields.insert("class".to_string(), selected.element_type.to_string());

        let layout = SourceLayout::new(StorageOrder::ColumnMajorHwc, selected.element_type, order);
        let header = HeaderMetadata::new(FileFormat::Mat, selected.dims, layout, selected.offset)?
            .with_fields(fields)
            .with_variable(selected.name);

        Ok(PreparedPayload {
            header,
            payload: Cow::Owned(selected.payload),
        })
    }
}

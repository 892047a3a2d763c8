//! Loader for ENVI header + raw binary pairs.
//!
//! The `.hdr` file is a text header of `key = value` lines. Values opened with
//! `{` may continue over several lines until a `}` closes them; such values
//! are folded into one space-joined string. The pixel data lives in a sibling
//! file (`.dat`, `.img`, ...) stored as BSQ, BIL or BIP.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::data::element::{ByteOrder, ElementType};
use crate::data::error::{FileFormat, LoadError};
use crate::data::header::{HeaderMetadata, PreparedPayload};
use crate::data::layout::{Dims, SourceLayout, StorageOrder};
use crate::data::loader::HyperspectralLoader;
use crate::data::loaders::{parse_number_list, parse_string_list};
use crate::data::sniff::ENVI_DATA_EXTENSIONS;
use crate::data::source::LoadSources;

/// Keys every header must carry, in the order they are checked.
const REQUIRED_KEYS: [&str; 7] = [
    "samples",
    "lines",
    "bands",
    "data type",
    "interleave",
    "byte order",
    "header offset",
];

/// Map an ENVI `data type` code to an element type.
///
/// Code 1 is ENVI's unsigned byte.
pub fn element_type_for_code(code: u32) -> Option<ElementType> {
    match code {
        1 => Some(ElementType::Uint8),
        2 => Some(ElementType::Int16),
        3 => Some(ElementType::Int32),
        4 => Some(ElementType::Float32),
        5 => Some(ElementType::Float64),
        12 => Some(ElementType::Uint16),
        13 => Some(ElementType::Uint32),
        _ => None,
    }
}

/// ENVI `data type` code for an element type, if ENVI has one.
pub fn code_for_element_type(element_type: ElementType) -> Option<u32> {
    match element_type {
        ElementType::Uint8 => Some(1),
        ElementType::Int16 => Some(2),
        ElementType::Int32 => Some(3),
        ElementType::Float32 => Some(4),
        ElementType::Float64 => Some(5),
        ElementType::Uint16 => Some(12),
        ElementType::Uint32 => Some(13),
        ElementType::Int8 => None,
    }
}

/// Split header text into lowercased keys and raw values.
///
/// Fails with `InvalidHeader` if the first non-empty line is not `ENVI` or a
/// braced value is never closed.
pub fn parse_header_fields(text: &str) -> Result<BTreeMap<String, String>, LoadError> {
    let mut lines = text.lines().map(str::trim).skip_while(|line| line.is_empty());

    match lines.next() {
        Some(first) if first.eq_ignore_ascii_case("ENVI") => {}
        Some(first) => {
            return Err(LoadError::invalid_header(
                FileFormat::Envi,
                format!("first line must be 'ENVI', found '{first}'"),
            ));
        }
        None => return Err(LoadError::invalid_header(FileFormat::Envi, "empty header")),
    }

    let mut fields = BTreeMap::new();
    let mut open: Option<(String, String)> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }

        if let Some((key, mut value)) = open.take() {
            value.push(' ');
            value.push_str(line);
            if line.contains('}') {
                fields.insert(key, value);
            } else {
                open = Some((key, value));
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            log::trace!("EnviLoader: ignoring header line '{}'", line);
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_string();

        if value.contains('{') && !value.contains('}') {
            open = Some((key, value));
        } else {
            fields.insert(key, value);
        }
    }

    if let Some((key, _)) = open {
        return Err(LoadError::invalid_header(
            FileFormat::Envi,
            format!("unterminated '{{' in field '{key}'"),
        ));
    }

    Ok(fields)
}

/// Parsed ENVI header.
#[derive(Debug, Clone, PartialEq)]
pub struct EnviHeader {
    /// Width (`samples`)
    pub samples: usize,
    /// Height (`lines`)
    pub lines: usize,
    pub bands: usize,
    pub element_type: ElementType,
    pub interleave: StorageOrder,
    pub byte_order: ByteOrder,
    /// Bytes to skip in the data file before the first pixel
    pub header_offset: usize,
    /// Every field of the header, folded and verbatim
    pub fields: BTreeMap<String, String>,
}

impl EnviHeader {
    /// Parse header text.
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let fields = parse_header_fields(text)?;

        if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !fields.contains_key(**key)) {
            return Err(LoadError::missing_field(*missing));
        }

        let samples = parse_count(&fields, "samples")?;
        let lines = parse_count(&fields, "lines")?;
        let bands = parse_count(&fields, "bands")?;

        let code = parse_count(&fields, "data type")?;
        let element_type = u32::try_from(code)
            .ok()
            .and_then(element_type_for_code)
            .ok_or_else(|| LoadError::unsupported_type(FileFormat::Envi, code))?;

        let interleave = match unbraced(&fields["interleave"]).to_lowercase().as_str() {
            "bsq" => StorageOrder::Bsq,
            "bil" => StorageOrder::Bil,
            "bip" => StorageOrder::Bip,
            other => {
                return Err(LoadError::invalid_header(
                    FileFormat::Envi,
                    format!("unknown interleave '{other}'"),
                ));
            }
        };

        let byte_order = match parse_count(&fields, "byte order")? {
            0 => ByteOrder::Little,
            1 => ByteOrder::Big,
            other => {
                return Err(LoadError::invalid_header(
                    FileFormat::Envi,
                    format!("byte order must be 0 or 1, found {other}"),
                ));
            }
        };

        let header_offset = parse_count(&fields, "header offset")?;

        Ok(Self {
            samples,
            lines,
            bands,
            element_type,
            interleave,
            byte_order,
            header_offset,
            fields,
        })
    }

    pub fn dims(&self) -> Dims {
        Dims::new(self.lines, self.samples, self.bands)
    }

    /// `wavelength` list, if present and numeric.
    pub fn wavelengths(&self) -> Option<Vec<f64>> {
        parse_number_list(self.fields.get("wavelength")?)
    }

    /// `fwhm` list, if present and numeric.
    pub fn fwhm(&self) -> Option<Vec<f64>> {
        parse_number_list(self.fields.get("fwhm")?)
    }

    /// `band names` list, if present.
    pub fn band_names(&self) -> Option<Vec<String>> {
        Some(parse_string_list(self.fields.get("band names")?))
    }

    /// Convert to format-independent metadata.
    pub fn to_metadata(&self) -> Result<HeaderMetadata, LoadError> {
        let layout = SourceLayout::new(self.interleave, self.element_type, self.byte_order);
        Ok(
            HeaderMetadata::new(FileFormat::Envi, self.dims(), layout, self.header_offset)?
                .with_fields(self.fields.clone()),
        )
    }
}

fn unbraced(value: &str) -> &str {
    value.trim().trim_start_matches('{').trim_end_matches('}').trim()
}

fn parse_count(fields: &BTreeMap<String, String>, key: &str) -> Result<usize, LoadError> {
    let raw = fields.get(key).ok_or_else(|| LoadError::missing_field(key))?;
    unbraced(raw).parse::<usize>().map_err(|_| {
        LoadError::invalid_header(
            FileFormat::Envi,
            format!("field '{key}' is not a non-negative integer: '{raw}'"),
        )
    })
}

/// Loader for ENVI `.hdr` + binary pairs.
pub struct EnviLoader {
    data_extensions: Vec<String>,
}

impl EnviLoader {
    pub fn new(data_extensions: Vec<String>) -> Self {
        Self { data_extensions }
    }
}

impl Default for EnviLoader {
    fn default() -> Self {
        Self::new(ENVI_DATA_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }
}

impl HyperspectralLoader for EnviLoader {
    fn format(&self) -> FileFormat {
        FileFormat::Envi
    }

    fn display_name(&self) -> &'static str {
        "ENVI Raster (.hdr + binary)"
    }

    fn companion_extensions(&self) -> &[String] {
        &self.data_extensions
    }

    fn prepare<'a>(&self, sources: &'a LoadSources) -> Result<PreparedPayload<'a>, LoadError> {
        let text = String::from_utf8_lossy(sources.primary.bytes());
        let envi = EnviHeader::parse(&text)?;

        log::debug!(
            "EnviLoader: samples={} lines={} bands={} type={} interleave={} {} offset={}",
            envi.samples,
            envi.lines,
            envi.bands,
            envi.element_type,
            envi.interleave,
            envi.byte_order,
            envi.header_offset
        );

        let data = sources
            .companion
            .as_ref()
            .ok_or_else(|| LoadError::MissingDataFile {
                header: sources
                    .primary
                    .path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| sources.primary.name().into()),
                tried: self.data_extensions.clone(),
            })?;

        let header = envi.to_metadata()?;
        let payload = data.tail_from(envi.header_offset).map_err(|_| {
            LoadError::size_mismatch(
                envi.header_offset.saturating_add(header.expected_bytes().unwrap_or(0)),
                data.len(),
            )
        })?;

        Ok(PreparedPayload {
            header,
            payload: Cow::Borrowed(payload),
        })
    }
}

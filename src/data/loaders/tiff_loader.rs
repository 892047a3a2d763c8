//! Loader for baseline uncompressed 8-bit TIFF cubes.
//!
//! Three arrangements are understood:
//! - one page with several samples per pixel, planar-separate (`PlanarConfiguration = 2`)
//! - one page with several samples per pixel, contiguous (`PlanarConfiguration = 1`)
//! - several single-sample pages, one band per page
//!
//! Only classic TIFF (version 42) is supported.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use crate::data::element::{ByteOrder, ElementType, Sample};
use crate::data::error::{FileFormat, LoadError};
use crate::data::header::{HeaderMetadata, PreparedPayload};
use crate::data::layout::{Dims, SourceLayout, StorageOrder};
use crate::data::loader::HyperspectralLoader;
use crate::data::source::{ByteSource, LoadSources};

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_SAMPLE_FORMAT: u16 = 339;

const TYPE_BYTE: u16 = 1;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

const PLANAR_CONTIGUOUS: u32 = 1;
const PLANAR_SEPARATE: u32 = 2;

fn invalid(reason: impl Into<String>) -> LoadError {
    LoadError::invalid_header(FileFormat::Tiff, reason)
}

/// Bounds-checked reads of header structures.
struct TiffReader<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> TiffReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, LoadError> {
        let order = match bytes.get(0..2) {
            Some(b"II") => ByteOrder::Little,
            Some(b"MM") => ByteOrder::Big,
            _ => return Err(invalid("missing II/MM byte order mark")),
        };
        let reader = Self { bytes, order };
        match reader.u16(2)? {
            42 => Ok(reader),
            43 => Err(invalid("BigTIFF is not supported")),
            other => Err(invalid(format!("unknown version {other}"))),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], LoadError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| invalid(format!("structure at offset {offset} runs past end of file")))
    }

    fn u16(&self, offset: usize) -> Result<u16, LoadError> {
        Ok(u16::decode(self.slice(offset, 2)?, self.order))
    }

    fn u32(&self, offset: usize) -> Result<u32, LoadError> {
        Ok(u32::decode(self.slice(offset, 4)?, self.order))
    }

    /// Read one 12-byte directory entry. Values of types other than
    /// BYTE, SHORT and LONG are not needed and come back as `None`.
    fn entry(&self, at: usize) -> Result<(u16, Option<Vec<u32>>), LoadError> {
        let tag = self.u16(at)?;
        let field_type = self.u16(at + 2)?;
        let count = self.u32(at + 4)? as usize;

        let size = match field_type {
            TYPE_BYTE => 1,
            TYPE_SHORT => 2,
            TYPE_LONG => 4,
            _ => return Ok((tag, None)),
        };
        let total = count
            .checked_mul(size)
            .ok_or_else(|| invalid(format!("tag {tag} has too many values")))?;
        let data_at = if total <= 4 {
            at + 8
        } else {
            self.u32(at + 8)? as usize
        };

        let values = self
            .slice(data_at, total)?
            .chunks_exact(size)
            .map(|chunk| match size {
                1 => u32::from(chunk[0]),
                2 => u32::from(u16::decode(chunk, self.order)),
                _ => u32::decode(chunk, self.order),
            })
            .collect();
        Ok((tag, Some(values)))
    }

    /// Walk the IFD chain, returning each directory's tags.
    fn directories(&self) -> Result<Vec<BTreeMap<u16, Vec<u32>>>, LoadError> {
        let mut directories = Vec::new();
        let mut visited = HashSet::new();
        let mut offset = self.u32(4)? as usize;

        while offset != 0 {
            if !visited.insert(offset) {
                return Err(invalid(format!("IFD chain loops back to offset {offset}")));
            }
            let count = self.u16(offset)? as usize;
            let mut tags = BTreeMap::new();
            for i in 0..count {
                if let (tag, Some(values)) = self.entry(offset + 2 + 12 * i)? {
                    tags.insert(tag, values);
                }
            }
            directories.push(tags);
            offset = self.u32(offset + 2 + 12 * count)? as usize;
        }

        if directories.is_empty() {
            return Err(invalid("no image directories"));
        }
        Ok(directories)
    }
}

/// Geometry and strip table of one page.
#[derive(Debug, Clone)]
struct Page {
    width: usize,
    height: usize,
    samples_per_pixel: usize,
    planar: u32,
    rows_per_strip: usize,
    photometric: Option<u32>,
    strip_offsets: Vec<u32>,
    strip_byte_counts: Vec<u32>,
}

impl Page {
    fn from_tags(tags: &BTreeMap<u16, Vec<u32>>) -> Result<Self, LoadError> {
        let first = |tag: u16| tags.get(&tag).and_then(|values| values.first().copied());

        let width = first(TAG_IMAGE_WIDTH).ok_or_else(|| LoadError::missing_field("ImageWidth"))? as usize;
        let height = first(TAG_IMAGE_LENGTH).ok_or_else(|| LoadError::missing_field("ImageLength"))? as usize;

        let compression = first(TAG_COMPRESSION).unwrap_or(1);
        if compression != 1 {
            return Err(LoadError::UnsupportedCompression(compression));
        }

        let samples_per_pixel = first(TAG_SAMPLES_PER_PIXEL).unwrap_or(1) as usize;
        let bits = tags.get(&TAG_BITS_PER_SAMPLE).map(Vec::as_slice).unwrap_or(&[1]);
        if let Some(&depth) = bits.iter().find(|&&b| b != 8) {
            return Err(LoadError::UnsupportedBitDepth(depth));
        }

        let sample_format = first(TAG_SAMPLE_FORMAT).unwrap_or(1);
        if sample_format != 1 {
            return Err(LoadError::unsupported_type(
                FileFormat::Tiff,
                format!("SampleFormat {sample_format}"),
            ));
        }

        let planar = first(TAG_PLANAR_CONFIGURATION).unwrap_or(PLANAR_CONTIGUOUS);
        if planar != PLANAR_CONTIGUOUS && planar != PLANAR_SEPARATE {
            return Err(invalid(format!("unknown PlanarConfiguration {planar}")));
        }

        let rows_per_strip = first(TAG_ROWS_PER_STRIP)
            .map(|rows| (rows as usize).min(height))
            .unwrap_or(height);
        if rows_per_strip == 0 && height > 0 {
            return Err(invalid("RowsPerStrip is zero"));
        }

        let strip_offsets = tags
            .get(&TAG_STRIP_OFFSETS)
            .cloned()
            .ok_or_else(|| LoadError::missing_field("StripOffsets"))?;
        let strip_byte_counts = tags
            .get(&TAG_STRIP_BYTE_COUNTS)
            .cloned()
            .ok_or_else(|| LoadError::missing_field("StripByteCounts"))?;
        if strip_offsets.len() != strip_byte_counts.len() {
            return Err(invalid(format!(
                "{} strip offsets but {} strip byte counts",
                strip_offsets.len(),
                strip_byte_counts.len()
            )));
        }

        Ok(Self {
            width,
            height,
            samples_per_pixel,
            planar,
            rows_per_strip,
            photometric: first(TAG_PHOTOMETRIC),
            strip_offsets,
            strip_byte_counts,
        })
    }

    fn geometry(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }

    fn plane_bytes(&self) -> Result<usize, LoadError> {
        self.width
            .checked_mul(self.height)
            .ok_or_else(|| invalid(format!("page of {}x{} overflows", self.width, self.height)))
    }

    /// Append the bytes of strips `range` to `out`.
    fn gather(&self, source: &ByteSource, range: Range<usize>, out: &mut Vec<u8>) -> Result<(), LoadError> {
        for strip in range {
            let offset = self.strip_offsets[strip] as usize;
            let count = self.strip_byte_counts[strip] as usize;
            out.extend_from_slice(source.read_range(offset, count)?);
        }
        Ok(())
    }

    /// Append one band plane made of strips `range`, checking its size.
    fn gather_plane(&self, source: &ByteSource, range: Range<usize>, out: &mut Vec<u8>) -> Result<(), LoadError> {
        let expected = self.plane_bytes()?;
        let start = out.len();
        self.gather(source, range, out)?;
        let actual = out.len() - start;
        if actual != expected {
            return Err(LoadError::size_mismatch(expected, actual));
        }
        Ok(())
    }
}

/// Loader for uncompressed 8-bit TIFF files.
pub struct TiffLoader;

impl TiffLoader {
    fn single_page(page: &Page, source: &ByteSource) -> Result<(Dims, StorageOrder, Vec<u8>), LoadError> {
        let dims = Dims::new(page.height, page.width, page.samples_per_pixel);
        let mut payload = Vec::new();

        if page.samples_per_pixel > 1 && page.planar == PLANAR_SEPARATE {
            let strips_per_plane = page.height.div_ceil(page.rows_per_strip.max(1));
            let expected = strips_per_plane * page.samples_per_pixel;
            if page.strip_offsets.len() != expected {
                return Err(invalid(format!(
                    "expected {} strips ({} per plane), found {}",
                    expected,
                    strips_per_plane,
                    page.strip_offsets.len()
                )));
            }
            for band in 0..page.samples_per_pixel {
                let first = band * strips_per_plane;
                page.gather_plane(source, first..first + strips_per_plane, &mut payload)?;
            }
            Ok((dims, StorageOrder::PlanarChw, payload))
        } else {
            page.gather(source, 0..page.strip_offsets.len(), &mut payload)?;
            Ok((dims, StorageOrder::Bip, payload))
        }
    }

    fn multi_page(pages: &[Page], source: &ByteSource) -> Result<(Dims, StorageOrder, Vec<u8>), LoadError> {
        let first = &pages[0];
        let mut payload = Vec::new();

        for (index, page) in pages.iter().enumerate() {
            if page.samples_per_pixel != 1 {
                return Err(invalid(format!(
                    "page {index} has {} samples per pixel; multi-page cubes need one band per page",
                    page.samples_per_pixel
                )));
            }
            if page.geometry() != first.geometry() {
                return Err(LoadError::InconsistentPageGeometry {
                    page: index,
                    expected: first.geometry(),
                    actual: page.geometry(),
                });
            }
            page.gather_plane(source, 0..page.strip_offsets.len(), &mut payload)?;
        }

        let dims = Dims::new(first.height, first.width, pages.len());
        Ok((dims, StorageOrder::PlanarChw, payload))
    }
}

impl HyperspectralLoader for TiffLoader {
    fn format(&self) -> FileFormat {
        FileFormat::Tiff
    }

    fn display_name(&self) -> &'static str {
        "TIFF Image (.tif, .tiff)"
    }

    fn prepare<'a>(&self, sources: &'a LoadSources) -> Result<PreparedPayload<'a>, LoadError> {
        let source = &sources.primary;
        let reader = TiffReader::new(source.bytes())?;
        let pages = reader
            .directories()?
            .iter()
            .map(Page::from_tags)
            .collect::<Result<Vec<_>, _>>()?;

        let first = &pages[0];
        log::debug!(
            "TiffLoader: {} page(s), first {}x{} spp={} planar={} rows/strip={}",
            pages.len(),
            first.width,
            first.height,
            first.samples_per_pixel,
            first.planar,
            first.rows_per_strip
        );

        let (dims, order, payload) = if pages.len() == 1 {
            Self::single_page(first, source)?
        } else {
            Self::multi_page(&pages, source)?
        };

        let mut fields = BTreeMap::new();
        fields.insert("pages".to_string(), pages.len().to_string());
        fields.insert("samples per pixel".to_string(), first.samples_per_pixel.to_string());
        fields.insert("planar configuration".to_string(), first.planar.to_string());
        if let Some(photometric) = first.photometric {
            fields.insert("photometric".to_string(), photometric.to_string());
        }

        let offset = first.strip_offsets.first().copied().unwrap_or(0) as usize;
        let layout = SourceLayout::new(order, ElementType::Uint8, reader.order);
        let header = HeaderMetadata::new(FileFormat::Tiff, dims, layout, offset)?.with_fields(fields);

        Ok(PreparedPayload {
            header,
            payload: Cow::Owned(payload),
        })
    }
}

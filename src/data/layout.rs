//! Source storage orders and the layout normalizer.
//!
//! Every supported format stores the same logical `(H, W, C)` cube with a
//! different physical axis order. Each [`StorageOrder`] is described by the
//! element stride of its three logical axes; normalizing is a single gather
//! pass that walks the canonical order and reads
//! `source[h * s_h + w * s_w + c * s_c]`.
//!
//! | order | physical axes | source index of `(h, w, c)` |
//! |---|---|---|
//! | `RowMajorHwc`, `Bip` | H, W, C | `c + C*(w + W*h)` |
//! | `ColumnMajorHwc` | C, W, H (Fortran) | `h + H*(w + W*c)` |
//! | `Bsq`, `PlanarChw` | C, H, W | `c*H*W + h*W + w` |
//! | `Bil` | H, C, W | `h*C*W + c*W + w` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::cube::Cube;
use crate::data::element::{ByteOrder, ElementType, Sample, decode_all, with_sample_type};
use crate::data::error::LoadError;
use crate::data::validate;

/// Logical cube dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dims {
    pub height: usize,
    pub width: usize,
    pub bands: usize,
}

impl Dims {
    pub fn new(height: usize, width: usize, bands: usize) -> Self {
        Self {
            height,
            width,
            bands,
        }
    }

    /// `H * W * C`, or `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.height.checked_mul(self.width)?.checked_mul(self.bands)
    }

    /// True if any axis is zero.
    pub fn is_degenerate(&self) -> bool {
        self.height == 0 || self.width == 0 || self.bands == 0
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.bands)
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.bands)
    }
}

/// Element strides of the logical axes within a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strides {
    pub height: usize,
    pub width: usize,
    pub band: usize,
}

impl Strides {
    #[inline]
    pub fn offset(&self, h: usize, w: usize, c: usize) -> usize {
        h * self.height + w * self.width + c * self.band
    }
}

/// Physical order of the three logical axes in a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageOrder {
    /// C order over `(H, W, C)` (NumPy default)
    RowMajorHwc,
    /// Fortran order over `(H, W, C)` (MATLAB, NumPy `fortran_order`)
    ColumnMajorHwc,
    /// TIFF planar-separate: one contiguous `H x W` plane per band
    PlanarChw,
    /// ENVI band sequential
    Bsq,
    /// ENVI band interleaved by line
    Bil,
    /// ENVI band interleaved by pixel
    Bip,
}

impl StorageOrder {
    pub const ALL: [StorageOrder; 6] = [
        StorageOrder::RowMajorHwc,
        StorageOrder::ColumnMajorHwc,
        StorageOrder::PlanarChw,
        StorageOrder::Bsq,
        StorageOrder::Bil,
        StorageOrder::Bip,
    ];

    /// Strides of `(h, w, c)` in the source buffer.
    pub fn strides(self, dims: Dims) -> Strides {
        let Dims {
            height: h,
            width: w,
            bands: c,
        } = dims;
        match self {
            StorageOrder::RowMajorHwc | StorageOrder::Bip => Strides {
                height: w * c,
                width: c,
                band: 1,
            },
            StorageOrder::ColumnMajorHwc => Strides {
                height: 1,
                width: h,
                band: h * w,
            },
            StorageOrder::Bsq | StorageOrder::PlanarChw => Strides {
                height: w,
                width: 1,
                band: h * w,
            },
            StorageOrder::Bil => Strides {
                height: c * w,
                width: 1,
                band: w,
            },
        }
    }

    /// Source index of logical element `(h, w, c)`.
    pub fn source_index(self, dims: Dims, h: usize, w: usize, c: usize) -> usize {
        self.strides(dims).offset(h, w, c)
    }

    /// True if source order already equals canonical order.
    pub fn is_canonical(self) -> bool {
        matches!(self, StorageOrder::RowMajorHwc | StorageOrder::Bip)
    }

    pub fn name(self) -> &'static str {
        match self {
            StorageOrder::RowMajorHwc => "row-major hwc",
            StorageOrder::ColumnMajorHwc => "column-major hwc",
            StorageOrder::PlanarChw => "planar chw",
            StorageOrder::Bsq => "bsq",
            StorageOrder::Bil => "bil",
            StorageOrder::Bip => "bip",
        }
    }
}

impl fmt::Display for StorageOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything needed to decode a raw source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLayout {
    pub order: StorageOrder,
    pub element_type: ElementType,
    pub byte_order: ByteOrder,
}

impl SourceLayout {
    pub fn new(order: StorageOrder, element_type: ElementType, byte_order: ByteOrder) -> Self {
        Self {
            order,
            element_type,
            byte_order,
        }
    }
}

/// Decode `raw` (already positioned at the first pixel byte) into a canonical
/// cube.
///
/// Fails with `SizeMismatch` unless `raw` holds exactly
/// `H * W * C * element_size` bytes.
pub fn normalize(raw: &[u8], dims: Dims, layout: SourceLayout) -> Result<Cube, LoadError> {
    let expected = validate::expected_payload_bytes(dims, layout.element_type)?;
    if raw.len() != expected {
        return Err(LoadError::size_mismatch(expected, raw.len()));
    }
    validate::check_strides(layout.order, dims)?;

    log::trace!(
        "normalize: {} {} {} ({} bytes)",
        dims,
        layout.element_type,
        layout.order,
        raw.len()
    );

    let data = with_sample_type!(layout.element_type, T => {
        let source = decode_all::<T>(raw, layout.byte_order);
        T::into_data(reorder(source, dims, layout.order))
    });

    Cube::new(dims, data).ok_or_else(|| LoadError::size_mismatch(expected, raw.len()))
}

/// Permute decoded source values into canonical order.
fn reorder<T: Copy>(source: Vec<T>, dims: Dims, order: StorageOrder) -> Vec<T> {
    if order.is_canonical() {
        return source;
    }

    let strides = order.strides(dims);
    let mut canonical = Vec::with_capacity(source.len());
    for h in 0..dims.height {
        for w in 0..dims.width {
            let base = h * strides.height + w * strides.width;
            for c in 0..dims.bands {
                canonical.push(source[base + c * strides.band]);
            }
        }
    }
    canonical
}

/// Inverse of [`normalize`]: serialize a cube into `order` with the given
/// byte order. Used by the export writers.
pub fn encode(cube: &Cube, order: StorageOrder, byte_order: ByteOrder) -> Vec<u8> {
    with_sample_type!(cube.element_type(), T => {
        match T::slice_of(cube.data()) {
            Some(values) => encode_values(values, cube.dims(), order, byte_order),
            None => Vec::new(),
        }
    })
}

fn encode_values<T: Sample>(
    values: &[T],
    dims: Dims,
    order: StorageOrder,
    byte_order: ByteOrder,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::ELEMENT_TYPE.size());
    if order.is_canonical() {
        for value in values {
            value.encode(byte_order, &mut out);
        }
        return out;
    }

    let strides = order.strides(dims);
    let mut physical = vec![T::default(); values.len()];
    for h in 0..dims.height {
        for w in 0..dims.width {
            for c in 0..dims.bands {
                let canonical = c + dims.bands * (w + dims.width * h);
                physical[strides.offset(h, w, c)] = values[canonical];
            }
        }
    }
    for value in physical {
        value.encode(byte_order, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
        values.into_iter().flat_map(f32::to_le_bytes).collect()
    }

    #[test]
    fn test_source_index_formulas() {
        let dims = Dims::new(2, 3, 4);
        let (h, w, c) = (1, 2, 3);
        assert_eq!(
            StorageOrder::RowMajorHwc.source_index(dims, h, w, c),
            c + 4 * (w + 3 * h)
        );
        assert_eq!(
            StorageOrder::ColumnMajorHwc.source_index(dims, h, w, c),
            h + 2 * (w + 3 * c)
        );
        assert_eq!(
            StorageOrder::Bsq.source_index(dims, h, w, c),
            c * 2 * 3 + h * 3 + w
        );
        assert_eq!(
            StorageOrder::Bil.source_index(dims, h, w, c),
            h * 4 * 3 + c * 3 + w
        );
        assert_eq!(
            StorageOrder::PlanarChw.source_index(dims, h, w, c),
            c * 2 * 3 + h * 3 + w
        );
        assert_eq!(
            StorageOrder::Bip.source_index(dims, h, w, c),
            StorageOrder::RowMajorHwc.source_index(dims, h, w, c)
        );
    }

    #[test]
    fn test_bsq_normalizes_band_blocks() {
        // float32 0..23 stored as BSQ, H=2 W=3 C=4
        let raw = f32_bytes((0..24).map(|v| v as f32));
        let layout = SourceLayout::new(StorageOrder::Bsq, ElementType::Float32, ByteOrder::Little);
        let cube = normalize(&raw, Dims::new(2, 3, 4), layout).unwrap();

        assert_eq!(cube.get(0, 0, 0), Some(0.0));
        assert_eq!(cube.get(0, 1, 0), Some(1.0));
        assert_eq!(cube.get(0, 2, 0), Some(2.0));
        assert_eq!(cube.get(1, 0, 0), Some(3.0));
        assert_eq!(cube.get(0, 0, 1), Some(6.0));
        assert_eq!(cube.get(1, 2, 3), Some(23.0));
    }

    #[test]
    fn test_bil_normalizes_line_blocks() {
        // BIL: each line holds C runs of W samples
        let raw = f32_bytes((0..24).map(|v| v as f32));
        let layout = SourceLayout::new(StorageOrder::Bil, ElementType::Float32, ByteOrder::Little);
        let cube = normalize(&raw, Dims::new(2, 3, 4), layout).unwrap();

        assert_eq!(cube.get(0, 0, 0), Some(0.0));
        assert_eq!(cube.get(0, 1, 0), Some(1.0));
        assert_eq!(cube.get(0, 0, 1), Some(3.0));
        assert_eq!(cube.get(1, 0, 0), Some(12.0));
        assert_eq!(cube.get(1, 2, 3), Some(23.0));
    }

    #[test]
    fn test_column_major_normalizes() {
        let raw: Vec<u8> = (0..24u8).collect();
        let layout = SourceLayout::new(StorageOrder::ColumnMajorHwc, ElementType::Uint8, ByteOrder::Little);
        let cube = normalize(&raw, Dims::new(2, 3, 4), layout).unwrap();

        assert_eq!(cube.get(1, 0, 0), Some(1.0));
        assert_eq!(cube.get(0, 1, 0), Some(2.0));
        assert_eq!(cube.get(0, 0, 1), Some(6.0));
        assert_eq!(cube.get(1, 2, 3), Some(23.0));
    }

    #[test]
    fn test_big_endian_decode() {
        let raw: Vec<u8> = (0..6u16).flat_map(u16::to_be_bytes).collect();
        let layout = SourceLayout::new(StorageOrder::Bip, ElementType::Uint16, ByteOrder::Big);
        let cube = normalize(&raw, Dims::new(1, 2, 3), layout).unwrap();
        assert_eq!(cube.as_slice::<u16>(), Some(&[0u16, 1, 2, 3, 4, 5][..]));
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let layout = SourceLayout::new(StorageOrder::Bsq, ElementType::Float32, ByteOrder::Little);
        let err = normalize(&[0u8; 92], Dims::new(2, 3, 4), layout).unwrap_err();
        assert!(matches!(
            err,
            LoadError::SizeMismatch {
                expected: 96,
                actual: 92
            }
        ));

        let err = normalize(&[0u8; 100], Dims::new(2, 3, 4), layout).unwrap_err();
        assert!(matches!(err, LoadError::SizeMismatch { expected: 96, actual: 100 }));
    }

    #[test]
    fn test_encode_inverts_normalize() {
        let dims = Dims::new(3, 2, 5);
        let values: Vec<i16> = (0..30).map(|v| v * 7 - 100).collect();
        let cube = Cube::from_values(dims, values).unwrap();

        for order in StorageOrder::ALL {
            for byte_order in [ByteOrder::Little, ByteOrder::Big] {
                let raw = encode(&cube, order, byte_order);
                let layout = SourceLayout::new(order, ElementType::Int16, byte_order);
                let back = normalize(&raw, dims, layout).unwrap();
                assert_eq!(back, cube, "{order} {byte_order}");
            }
        }
    }
}

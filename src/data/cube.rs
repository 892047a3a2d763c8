//! Canonical in-memory hyperspectral cube.

use ndarray::ArrayView3;

use crate::data::element::{ElementType, Sample, with_sample_type};
use crate::data::header::HeaderMetadata;
use crate::data::layout::Dims;

/// Owned, typed element buffer of a cube.
#[derive(Debug, Clone, PartialEq)]
pub enum CubeData {
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

impl CubeData {
    pub fn element_type(&self) -> ElementType {
        match self {
            CubeData::Int8(_) => ElementType::Int8,
            CubeData::Uint8(_) => ElementType::Uint8,
            CubeData::Int16(_) => ElementType::Int16,
            CubeData::Uint16(_) => ElementType::Uint16,
            CubeData::Int32(_) => ElementType::Int32,
            CubeData::Uint32(_) => ElementType::Uint32,
            CubeData::Float32(_) => ElementType::Float32,
            CubeData::Float64(_) => ElementType::Float64,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            CubeData::Int8(v) => v.len(),
            CubeData::Uint8(v) => v.len(),
            CubeData::Int16(v) => v.len(),
            CubeData::Uint16(v) => v.len(),
            CubeData::Int32(v) => v.len(),
            CubeData::Uint32(v) => v.len(),
            CubeData::Float32(v) => v.len(),
            CubeData::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at flat position `index`, widened to `f64`.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        with_sample_type!(self.element_type(), T => {
            T::slice_of(self).and_then(|s| s.get(index)).map(|v| v.to_f64())
        })
    }
}

/// A normalized hyperspectral cube.
///
/// Elements are stored in canonical `(height, width, band)` row-major order:
/// `index(h, w, c) = c + C * (w + W * h)`, so the band axis varies fastest.
/// The buffer always holds exactly `H * W * C` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    dims: Dims,
    data: CubeData,
}

impl Cube {
    /// Build a cube from a canonical buffer.
    ///
    /// Returns `None` if any dimension is zero or the buffer length differs
    /// from `H * W * C`.
    pub fn new(dims: Dims, data: CubeData) -> Option<Self> {
        if dims.is_degenerate() || dims.element_count()? != data.len() {
            return None;
        }
        Some(Self { dims, data })
    }

    /// Build a cube from typed canonical values.
    pub fn from_values<T: Sample>(dims: Dims, values: Vec<T>) -> Option<Self> {
        Self::new(dims, T::into_data(values))
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn height(&self) -> usize {
        self.dims.height
    }

    pub fn width(&self) -> usize {
        self.dims.width
    }

    pub fn bands(&self) -> usize {
        self.dims.bands
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn data(&self) -> &CubeData {
        &self.data
    }

    /// Consume the cube, returning its buffer.
    pub fn into_data(self) -> CubeData {
        self.data
    }

    /// Size of the element buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len() * self.element_type().size()
    }

    /// Canonical flat index of `(row, col, band)`, or `None` if out of range.
    pub fn index(&self, row: usize, col: usize, band: usize) -> Option<usize> {
        let Dims {
            height,
            width,
            bands,
        } = self.dims;
        if row >= height || col >= width || band >= bands {
            return None;
        }
        Some(band + bands * (col + width * row))
    }

    /// Value at `(row, col, band)` widened to `f64`.
    pub fn get(&self, row: usize, col: usize, band: usize) -> Option<f64> {
        self.data.value_at(self.index(row, col, band)?)
    }

    /// Typed view of the buffer, if `T` matches the element type.
    pub fn as_slice<T: Sample>(&self) -> Option<&[T]> {
        T::slice_of(&self.data)
    }

    /// `(H, W, C)` ndarray view over the canonical buffer.
    pub fn view<T: Sample>(&self) -> Option<ArrayView3<'_, T>> {
        let slice = self.as_slice::<T>()?;
        ArrayView3::from_shape(self.dims.shape(), slice).ok()
    }

    /// One band as a row-major `H * W` plane.
    pub fn band(&self, band: usize) -> Option<Vec<f64>> {
        if band >= self.dims.bands {
            return None;
        }
        let plane = self.dims.height * self.dims.width;
        let values = (0..plane)
            .filter_map(|pixel| self.data.value_at(pixel * self.dims.bands + band))
            .collect();
        Some(values)
    }

    /// All band values of a single pixel.
    pub fn spectrum(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        let start = self.index(row, col, 0)?;
        Some(
            (start..start + self.dims.bands)
                .filter_map(|i| self.data.value_at(i))
                .collect(),
        )
    }

    /// Minimum and maximum value, ignoring NaNs.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        with_sample_type!(self.element_type(), T => {
            let values = T::slice_of(&self.data)?;
            values
                .iter()
                .map(|v| v.to_f64())
                .filter(|v| !v.is_nan())
                .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                    None => Some((v, v)),
                    Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                })
        })
    }
}

/// A cube together with the header it was decoded from.
#[derive(Debug, Clone)]
pub struct LoadedCube {
    pub cube: Cube,
    pub header: HeaderMetadata,
}

impl LoadedCube {
    /// Band centre wavelengths, when the source header lists them.
    pub fn wavelengths(&self) -> Option<Vec<f64>> {
        crate::data::loaders::parse_number_list(self.header.fields.get("wavelength")?)
    }

    /// Name of the MAT variable the cube came from.
    pub fn variable_name(&self) -> Option<&str> {
        self.header.variable.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cube() -> Cube {
        // H=2, W=3, C=4 with value == canonical index
        let values: Vec<f32> = (0..24).map(|v| v as f32).collect();
        Cube::from_values(Dims::new(2, 3, 4), values).unwrap()
    }

    #[test]
    fn test_index_formula() {
        let cube = sample_cube();
        assert_eq!(cube.index(0, 0, 0), Some(0));
        assert_eq!(cube.index(0, 0, 3), Some(3));
        assert_eq!(cube.index(0, 1, 0), Some(4));
        assert_eq!(cube.index(1, 0, 0), Some(12));
        assert_eq!(cube.index(1, 2, 3), Some(23));
        assert_eq!(cube.index(2, 0, 0), None);
        assert_eq!(cube.index(0, 3, 0), None);
        assert_eq!(cube.index(0, 0, 4), None);
    }

    #[test]
    fn test_rejects_partial_buffer() {
        assert!(Cube::from_values(Dims::new(2, 2, 2), vec![0u8; 7]).is_none());
        assert!(Cube::from_values(Dims::new(0, 2, 2), Vec::<u8>::new()).is_none());
    }

    #[test]
    fn test_accessors() {
        let cube = sample_cube();
        assert_eq!(cube.get(1, 2, 3), Some(23.0));
        assert_eq!(cube.element_type(), ElementType::Float32);
        assert_eq!(cube.byte_len(), 96);
        assert_eq!(cube.spectrum(0, 1), Some(vec![4.0, 5.0, 6.0, 7.0]));
        assert_eq!(cube.band(1), Some(vec![1.0, 5.0, 9.0, 13.0, 17.0, 21.0]));
        assert_eq!(cube.value_range(), Some((0.0, 23.0)));
        assert!(cube.as_slice::<f64>().is_none());
    }

    #[test]
    fn test_ndarray_view_matches_index() {
        let cube = sample_cube();
        let view = cube.view::<f32>().unwrap();
        assert_eq!(view.shape(), &[2, 3, 4]);
        assert_eq!(view[[1, 2, 3]], 23.0);
        assert_eq!(view[[0, 1, 2]], 6.0);
    }
}

//! Writing cubes back out as NPY, MAT level-5 and ENVI files.
//!
//! Every writer produces files the loaders in this crate read back to the
//! same cube.

use std::path::{Path, PathBuf};

use ndarray::{Array3, ShapeBuilder};
use ndarray_npy::WriteNpyExt;
use thiserror::Error;

use crate::data::cube::Cube;
use crate::data::element::{ByteOrder, ElementType, Sample, with_sample_type};
use crate::data::layout::{StorageOrder, encode};
use crate::data::loaders::code_for_element_type;
use crate::data::loaders::mat_loader::{
    MAT_HEADER_LEN, MAT_TEXT_LEN, MAT_VERSION_5, MI_COMPRESSED, MI_INT8, MI_INT32, MI_MATRIX, MI_UINT32,
    class_id, storage_code,
};

/// Errors that can occur while exporting a cube.
#[derive(Error, Debug)]
pub enum ExportError {
    /// I/O error while writing a file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// NPY serialization error
    #[error("NPY error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    /// Values do not fill the declared dimensions
    #[error("Shape mismatch: dimensions hold {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Element count implied by the dimensions
        expected: usize,
        /// Number of values supplied
        actual: usize,
    },

    /// Dimension does not fit the 32-bit MAT dimension field
    #[error("Dimension {0} is too large for a MAT file")]
    DimensionTooLarge(usize),

    /// Storage order is not one of ENVI's interleaves
    #[error("'{0}' is not an ENVI interleave (expected bsq, bil or bip)")]
    UnsupportedInterleave(StorageOrder),

    /// Element type has no ENVI data type code
    #[error("ENVI has no data type for {0}")]
    UnsupportedElementType(ElementType),
}

fn shape_mismatch(cube: &Cube) -> ExportError {
    ExportError::ShapeMismatch {
        expected: cube.dims().element_count().unwrap_or(usize::MAX),
        actual: cube.data().len(),
    }
}

/// Serialize a cube as a `.npy` array of shape `(H, W, C)`.
///
/// With `fortran_order` the data is written column-major and the header
/// says so.
pub fn write_npy(cube: &Cube, fortran_order: bool) -> Result<Vec<u8>, ExportError> {
    let mut out = Vec::new();
    with_sample_type!(cube.element_type(), T => {
        let view = cube.view::<T>().ok_or_else(|| shape_mismatch(cube))?;
        if fortran_order {
            // the transposed view iterates the first axis fastest
            let values: Vec<T> = view.t().iter().copied().collect();
            let array = Array3::from_shape_vec(cube.dims().shape().f(), values)
                .map_err(|_| shape_mismatch(cube))?;
            array.write_npy(&mut out)?;
        } else {
            view.write_npy(&mut out)?;
        }
    });
    Ok(out)
}

/// Write a cube to a `.npy` file.
pub fn save_npy(path: impl AsRef<Path>, cube: &Cube, fortran_order: bool) -> Result<(), ExportError> {
    let path = path.as_ref();
    std::fs::write(path, write_npy(cube, fortran_order)?)?;
    log::info!("Exported {} cube to {}", cube.dims(), path.display());
    Ok(())
}

/// Options for ENVI export.
#[derive(Debug, Clone, PartialEq)]
pub struct EnviExport {
    /// One of `Bsq`, `Bil` or `Bip`
    pub interleave: StorageOrder,
    pub byte_order: ByteOrder,
    pub wavelengths: Option<Vec<f64>>,
    pub band_names: Option<Vec<String>>,
}

impl Default for EnviExport {
    fn default() -> Self {
        Self {
            interleave: StorageOrder::Bsq,
            byte_order: ByteOrder::Little,
            wavelengths: None,
            band_names: None,
        }
    }
}

/// Produce ENVI header text and the matching binary payload.
pub fn write_envi(cube: &Cube, options: &EnviExport) -> Result<(String, Vec<u8>), ExportError> {
    let interleave = match options.interleave {
        StorageOrder::Bsq => "bsq",
        StorageOrder::Bil => "bil",
        StorageOrder::Bip => "bip",
        other => return Err(ExportError::UnsupportedInterleave(other)),
    };
    let data_type = code_for_element_type(cube.element_type())
        .ok_or(ExportError::UnsupportedElementType(cube.element_type()))?;
    let byte_order = match options.byte_order {
        ByteOrder::Little => 0,
        ByteOrder::Big => 1,
    };

    let mut header = format!(
        "ENVI\ndescription = {{Exported by hsicube}}\nsamples = {}\nlines = {}\nbands = {}\n\
         header offset = 0\nfile type = ENVI Standard\ndata type = {}\ninterleave = {}\nbyte order = {}\n",
        cube.width(),
        cube.height(),
        cube.bands(),
        data_type,
        interleave,
        byte_order
    );
    if let Some(wavelengths) = &options.wavelengths {
        let list: Vec<String> = wavelengths.iter().map(f64::to_string).collect();
        header.push_str(&format!("wavelength = {{{}}}\n", list.join(", ")));
    }
    if let Some(names) = &options.band_names {
        header.push_str(&format!("band names = {{{}}}\n", names.join(", ")));
    }

    Ok((header, encode(cube, options.interleave, options.byte_order)))
}

/// Write `header_path` and a `.dat` companion next to it. Returns the data
/// file path.
pub fn save_envi(header_path: impl AsRef<Path>, cube: &Cube, options: &EnviExport) -> Result<PathBuf, ExportError> {
    let header_path = header_path.as_ref();
    let data_path = header_path.with_extension("dat");
    let (header, data) = write_envi(cube, options)?;
    std::fs::write(header_path, header)?;
    std::fs::write(&data_path, data)?;
    log::info!(
        "Exported {} cube to {} + {}",
        cube.dims(),
        header_path.display(),
        data_path.display()
    );
    Ok(data_path)
}

/// Append a tagged data element, padded to an 8-byte boundary.
fn push_tagged(out: &mut Vec<u8>, data_type: u32, payload: &[u8], order: ByteOrder) {
    data_type.encode(order, out);
    (payload.len() as u32).encode(order, out);
    out.extend_from_slice(payload);
    out.resize(out.len().next_multiple_of(8), 0);
}

/// Build a complete `miMATRIX` element for a real numeric array.
///
/// `data` is the column-major payload encoded as storage type `storage`,
/// which need not match `class`.
pub(crate) fn matrix_element(
    name: &str,
    class: u8,
    dims: &[i32],
    storage: u32,
    data: &[u8],
    order: ByteOrder,
) -> Vec<u8> {
    let mut body = Vec::new();

    let mut flags = Vec::with_capacity(8);
    u32::from(class).encode(order, &mut flags);
    0u32.encode(order, &mut flags);
    push_tagged(&mut body, MI_UINT32, &flags, order);

    let mut dim_bytes = Vec::with_capacity(dims.len() * 4);
    for &dim in dims {
        dim.encode(order, &mut dim_bytes);
    }
    push_tagged(&mut body, MI_INT32, &dim_bytes, order);
    push_tagged(&mut body, MI_INT8, name.as_bytes(), order);
    push_tagged(&mut body, storage, data, order);

    let mut element = Vec::with_capacity(body.len() + 8);
    push_tagged(&mut element, MI_MATRIX, &body, order);
    element
}

/// Builds MATLAB level-5 files.
///
/// ```rust,ignore
/// let mut writer = MatWriter::new().compressed(true);
/// writer.push_cube("cube", &cube)?;
/// std::fs::write("cube.mat", writer.finish())?;
/// ```
#[derive(Debug, Clone)]
pub struct MatWriter {
    order: ByteOrder,
    compress: bool,
    elements: Vec<u8>,
}

impl MatWriter {
    /// Little-endian, uncompressed.
    pub fn new() -> Self {
        Self {
            order: ByteOrder::Little,
            compress: false,
            elements: Vec::new(),
        }
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Wrap each variable in a zlib `miCOMPRESSED` element.
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Add a variable from column-major `values`.
    pub fn push_array<T: Sample>(&mut self, name: &str, dims: &[usize], values: &[T]) -> Result<&mut Self, ExportError> {
        let expected = dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)).unwrap_or(usize::MAX);
        if expected != values.len() {
            return Err(ExportError::ShapeMismatch {
                expected,
                actual: values.len(),
            });
        }

        let mut data = Vec::with_capacity(values.len() * T::ELEMENT_TYPE.size());
        for &value in values {
            value.encode(self.order, &mut data);
        }
        self.push_encoded(name, T::ELEMENT_TYPE, dims, &data)
    }

    /// Add a cube as an `[H, W, C]` variable.
    pub fn push_cube(&mut self, name: &str, cube: &Cube) -> Result<&mut Self, ExportError> {
        let (h, w, c) = cube.dims().shape();
        let data = encode(cube, StorageOrder::ColumnMajorHwc, self.order);
        self.push_encoded(name, cube.element_type(), &[h, w, c], &data)
    }

    fn push_encoded(
        &mut self,
        name: &str,
        element_type: ElementType,
        dims: &[usize],
        data: &[u8],
    ) -> Result<&mut Self, ExportError> {
        let dims = dims
            .iter()
            .map(|&d| i32::try_from(d).map_err(|_| ExportError::DimensionTooLarge(d)))
            .collect::<Result<Vec<_>, _>>()?;
        let element = matrix_element(
            name,
            class_id(element_type),
            &dims,
            storage_code(element_type),
            data,
            self.order,
        );
        self.push_element(element);
        Ok(self)
    }

    /// Append a pre-built top-level element.
    pub(crate) fn push_element(&mut self, element: Vec<u8>) {
        if self.compress {
            let deflated = miniz_oxide::deflate::compress_to_vec_zlib(&element, 6);
            MI_COMPRESSED.encode(self.order, &mut self.elements);
            (deflated.len() as u32).encode(self.order, &mut self.elements);
            self.elements.extend(deflated);
        } else {
            self.elements.extend(element);
        }
    }

    /// The complete file.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAT_HEADER_LEN + self.elements.len());
        let mut text = format!(
            "MATLAB 5.0 MAT-file, Platform: {}, Created by: hsicube",
            std::env::consts::OS
        )
        .into_bytes();
        text.resize(MAT_TEXT_LEN, b' ');
        out.extend(text);
        out.extend([0u8; 8]);
        MAT_VERSION_5.encode(self.order, &mut out);
        u16::from_be_bytes([b'M', b'I']).encode(self.order, &mut out);
        out.extend_from_slice(&self.elements);
        out
    }

    /// Write the file to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        std::fs::write(path, self.finish())?;
        Ok(())
    }
}

impl Default for MatWriter {
    fn default() -> Self {
        Self::new()
    }
}

//! hsicube - hyperspectral cube loading
//!
//! Reads hyperspectral cubes from NumPy, TIFF, MATLAB level-5 and ENVI files
//! and normalizes them to a single `(height, width, band)` row-major layout.
//!
//! ```rust,ignore
//! let cube = hsicube::load("scene.hdr")?;
//! println!("{} ({})", cube.dims(), cube.element_type());
//! ```

pub mod config;
pub mod data;

pub use config::{ConfigError, LoaderConfig, LogLevel};
pub use data::{
    ByteOrder, Cube, CubeData, Dims, ElementType, FileFormat, HeaderMetadata, LoadError, LoadedCube,
    LoaderRegistry, StorageOrder, load,
};

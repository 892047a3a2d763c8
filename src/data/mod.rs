//! Hyperspectral cube loading and normalization.
//!
//! This module provides:
//! - `Cube`: a typed `(H, W, C)` array in canonical row-major order
//! - `LoaderRegistry`: format detection and a unified loading interface
//! - Built-in loaders for NumPy, TIFF, MATLAB level-5 and ENVI files
//! - Writers that export cubes back to NPY, MAT and ENVI
//!
//! Every loader parses its header into [`HeaderMetadata`] and extracts the
//! exact pixel payload. The payload is then validated against the header and
//! reordered from its [`StorageOrder`] into the canonical layout by
//! [`layout::normalize`].
//!
//! ## Adding New Formats
//!
//! 1. Create a new loader in `loaders/` implementing `HyperspectralLoader`
//! 2. Register it in `LoaderRegistry::with_config()`
//!
//! ```rust,ignore
//! use hsicube::data::{HyperspectralLoader, LoadError, LoadSources, PreparedPayload};
//!
//! pub struct MyFormatLoader;
//!
//! impl HyperspectralLoader for MyFormatLoader {
//!     fn format(&self) -> FileFormat { /* ... */ }
//!     fn display_name(&self) -> &'static str { "My Format" }
//!     fn prepare<'a>(&self, sources: &'a LoadSources) -> Result<PreparedPayload<'a>, LoadError> {
//!         /* parse header, slice payload */
//!     }
//! }
//! ```

use std::path::Path;

mod cube;
pub(crate) mod element;
mod error;
pub mod export;
mod header;
pub mod layout;
mod loader;
pub mod loaders;
pub mod sniff;
mod source;
pub mod validate;

#[cfg(test)]
pub(crate) mod tests;

pub use cube::{Cube, CubeData, LoadedCube};
pub use element::{ByteOrder, ElementType, Sample};
pub use error::{FileFormat, LoadError};
pub use export::{EnviExport, ExportError, MatWriter};
pub use header::{HeaderMetadata, PreparedPayload};
pub use layout::{Dims, SourceLayout, StorageOrder};
pub use loader::{HyperspectralLoader, LoaderRegistry, decode_prepared};
pub use loaders::{EnviLoader, MatLoader, MatVariableInfo, NpyLoader, TiffLoader};
pub use source::{ByteSource, LoadSources};

/// Load a cube from `path` with the default configuration.
pub fn load(path: impl AsRef<Path>) -> Result<Cube, LoadError> {
    LoaderRegistry::new().load_path(path).map(|loaded| loaded.cube)
}

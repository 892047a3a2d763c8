//! Trait-based hyperspectral cube loading.
//!
//! Each container format implements [`HyperspectralLoader`]. A loader only
//! parses its header and locates the pixel payload; decoding into the
//! canonical cube is shared by all formats through
//! [`normalize`](crate::data::layout::normalize).
//!
//! ## Supported Formats
//!
//! - **NumPy**: `.npy` 2D/3D arrays, C or Fortran order
//! - **TIFF**: uncompressed 8-bit, planar-separate, contiguous or one band per page
//! - **MATLAB**: level-5 `.mat` containers (compressed elements included)
//! - **ENVI**: `.hdr` text header + raw BSQ/BIL/BIP binary
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hsicube::data::LoaderRegistry;
//!
//! let registry = LoaderRegistry::new();
//! let loaded = registry.load_path("scene.hdr")?;
//! println!("{}", loaded.cube.dims());
//! ```

use std::path::Path;

use crate::config::LoaderConfig;
use crate::data::cube::LoadedCube;
use crate::data::error::{FileFormat, LoadError};
use crate::data::header::PreparedPayload;
use crate::data::layout::normalize;
use crate::data::sniff::{self, SNIFF_LEN};
use crate::data::source::{ByteSource, LoadSources};
use crate::data::validate;

/// Trait for hyperspectral container format loaders.
pub trait HyperspectralLoader: Send + Sync {
    /// Format handled by this loader.
    fn format(&self) -> FileFormat;

    /// Unique identifier for this loader (e.g., "npy", "envi").
    fn id(&self) -> &'static str {
        self.format().name()
    }

    /// Human-readable name.
    fn display_name(&self) -> &'static str;

    /// File extensions this loader handles (lowercase, without dots).
    fn extensions(&self) -> &'static [&'static str] {
        self.format().extensions()
    }

    /// Extensions of a companion data file that must sit next to the named
    /// file. Empty for single-file formats.
    fn companion_extensions(&self) -> &[String] {
        &[]
    }

    /// Check the leading bytes for this format's signature.
    fn can_load(&self, head: &[u8]) -> bool {
        sniff::matches_format(self.format(), head)
    }

    /// Parse the header and extract exactly the pixel payload it describes.
    fn prepare<'a>(&self, sources: &'a LoadSources) -> Result<PreparedPayload<'a>, LoadError>;

    /// Parse, validate and normalize into a canonical cube.
    fn load(&self, sources: &LoadSources) -> Result<LoadedCube, LoadError> {
        decode_prepared(self.id(), self.prepare(sources)?)
    }
}

/// Validate a prepared payload against its header and normalize it.
pub fn decode_prepared(loader_id: &str, prepared: PreparedPayload<'_>) -> Result<LoadedCube, LoadError> {
    let PreparedPayload { header, payload } = prepared;
    validate::check_payload(&header, payload.len())?;

    let cube = normalize(&payload, header.dims, header.layout)?;
    validate::validate_cube(&cube)?;

    log::info!(
        "{}: loaded {}x{} with {} bands ({}, {})",
        loader_id,
        cube.width(),
        cube.height(),
        cube.bands(),
        cube.element_type(),
        header.layout.order
    );

    Ok(LoadedCube { cube, header })
}

/// Registry of available cube loaders.
///
/// Provides format detection and a unified loading interface.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn HyperspectralLoader>>,
    max_cube_bytes: Option<u64>,
}

impl LoaderRegistry {
    /// Create a registry with all built-in loaders and default settings.
    pub fn new() -> Self {
        Self::with_config(&LoaderConfig::default())
    }

    /// Create a registry with all built-in loaders configured from `config`.
    pub fn with_config(config: &LoaderConfig) -> Self {
        let mut registry = Self {
            loaders: Vec::new(),
            max_cube_bytes: config.max_cube_bytes,
        };

        registry.register(Box::new(super::loaders::NpyLoader));
        registry.register(Box::new(super::loaders::TiffLoader));
        registry.register(Box::new(super::loaders::MatLoader::new(
            config.mat_variable.clone(),
            config.mat_element_types.clone(),
        )));
        registry.register(Box::new(super::loaders::EnviLoader::new(
            config.envi_data_extensions.clone(),
        )));

        registry
    }

    /// Register a loader, replacing any existing loader for the same format.
    pub fn register(&mut self, loader: Box<dyn HyperspectralLoader>) {
        self.loaders.retain(|l| l.format() != loader.format());
        self.loaders.push(loader);
    }

    /// Get all supported file extensions (for file filtering).
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .loaders
            .iter()
            .flat_map(|l| l.extensions().iter().copied())
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    /// Check if a filename has a supported extension.
    pub fn is_supported_file(&self, filename: &str) -> bool {
        let ext = sniff::extension_of(Path::new(filename));
        self.supported_extensions().iter().any(|e| *e == ext)
    }

    /// Get all registered loaders.
    pub fn loaders(&self) -> &[Box<dyn HyperspectralLoader>] {
        &self.loaders
    }

    /// Loader registered for `format`.
    pub fn loader_for(&self, format: FileFormat) -> Option<&dyn HyperspectralLoader> {
        self.loaders
            .iter()
            .find(|l| l.format() == format)
            .map(|l| l.as_ref())
    }

    /// Load a cube from a file on disk.
    ///
    /// The format is chosen by extension and confirmed by content. ENVI
    /// headers pull in their binary companion.
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<LoadedCube, LoadError> {
        let path = path.as_ref();
        let primary = ByteSource::open(path)?;
        let format = sniff::sniff(path, primary.head(SNIFF_LEN))?;
        let loader = self.loader_or_mismatch(format, path)?;

        let sources = if loader.companion_extensions().is_empty() {
            LoadSources::single(primary)
        } else {
            let data_path = sniff::find_companion(path, loader.companion_extensions())?;
            LoadSources::pair(primary, ByteSource::open(&data_path)?)
        };

        self.run(loader, &sources)
    }

    /// Load a single-file format from memory.
    ///
    /// `filename` is only used for its extension; without one the content
    /// decides. ENVI needs two files and goes through [`Self::load_sources`].
    pub fn load_bytes(&self, data: Vec<u8>, filename: Option<&str>) -> Result<LoadedCube, LoadError> {
        let name = filename.unwrap_or_default();
        let primary = ByteSource::from_bytes(name, data);
        let format = sniff::sniff(Path::new(name), primary.head(SNIFF_LEN))?;
        self.load_sources(format, &LoadSources::single(primary))
    }

    /// Load already-opened sources with an explicit format.
    pub fn load_sources(&self, format: FileFormat, sources: &LoadSources) -> Result<LoadedCube, LoadError> {
        let loader = self.loader_or_mismatch(format, Path::new(sources.primary.name()))?;
        self.run(loader, sources)
    }

    fn loader_or_mismatch(&self, format: FileFormat, path: &Path) -> Result<&dyn HyperspectralLoader, LoadError> {
        self.loader_for(format).ok_or_else(|| LoadError::FormatMismatch {
            extension: sniff::extension_of(path),
            detected: Some(format),
        })
    }

    fn run(&self, loader: &dyn HyperspectralLoader, sources: &LoadSources) -> Result<LoadedCube, LoadError> {
        if !loader.can_load(sources.primary.head(SNIFF_LEN)) {
            return Err(LoadError::FormatMismatch {
                extension: sniff::extension_of(Path::new(sources.primary.name())),
                detected: sniff::detect_format(sources.primary.head(SNIFF_LEN)),
            });
        }
        log::debug!("Loading {} with {} loader", sources.primary.name(), loader.id());

        let prepared = loader.prepare(sources)?;
        validate::check_budget(
            prepared.header.dims,
            prepared.header.layout.element_type,
            self.max_cube_bytes,
        )?;
        decode_prepared(loader.id(), prepared)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_loaders() {
        let registry = LoaderRegistry::new();
        assert_eq!(registry.loaders().len(), 4);
        for format in [FileFormat::Npy, FileFormat::Tiff, FileFormat::Mat, FileFormat::Envi] {
            assert!(registry.loader_for(format).is_some(), "{format}");
        }
    }

    #[test]
    fn test_supported_extensions() {
        let registry = LoaderRegistry::new();
        let extensions = registry.supported_extensions();

        assert_eq!(extensions, vec!["hdr", "mat", "npy", "tif", "tiff"]);
    }

    #[test]
    fn test_is_supported_file() {
        let registry = LoaderRegistry::new();

        assert!(registry.is_supported_file("scene.hdr"));
        assert!(registry.is_supported_file("cube.npy"));
        assert!(registry.is_supported_file("CUBE.TIF")); // case insensitive
        assert!(!registry.is_supported_file("scene.dat"));
        assert!(!registry.is_supported_file("document.pdf"));
    }

    #[test]
    fn test_only_envi_needs_a_companion() {
        let registry = LoaderRegistry::new();
        for loader in registry.loaders() {
            let needs_pair = !loader.companion_extensions().is_empty();
            assert_eq!(needs_pair, loader.format() == FileFormat::Envi, "{}", loader.id());
        }
    }

    #[test]
    fn test_load_bytes_rejects_unknown_content() {
        let registry = LoaderRegistry::new();
        let err = registry.load_bytes(vec![0x89, 0x50, 0x4E, 0x47], Some("image.png")).unwrap_err();
        assert!(matches!(err, LoadError::FormatMismatch { detected: None, .. }));
    }
}

//! Loader configuration.
//!
//! Settings are plain serde structs that can be exported to and imported
//! from JSON. Every field has a default, so a partial file (or `{}`) is a
//! valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::ElementType;
use crate::data::sniff::ENVI_DATA_EXTENSIONS;

/// Log level setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Show only errors
    Error,
    /// Show errors and warnings
    Warn,
    /// Show errors, warnings, and info messages
    #[default]
    Info,
    /// Show debug-level logging
    Debug,
    /// Show all log messages including trace
    Trace,
}

impl LogLevel {
    /// Get the display name for this log level.
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warn => "Warn",
            LogLevel::Info => "Info",
            LogLevel::Debug => "Debug",
            LogLevel::Trace => "Trace",
        }
    }

    /// Get all log levels in order from least to most verbose.
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ]
    }

    /// Parse a level name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|level| level.name().eq_ignore_ascii_case(name))
    }

    /// Convert to log crate's LevelFilter.
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Settings that shape how cubes are located, selected and bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Extensions tried, in order, when looking for the binary file next
    /// to an ENVI header
    pub envi_data_extensions: Vec<String>,

    /// Load this MAT variable instead of the first suitable one
    pub mat_variable: Option<String>,

    /// Element types a MAT variable may have to be picked automatically
    pub mat_element_types: Vec<ElementType>,

    /// Refuse cubes whose decoded size exceeds this many bytes
    pub max_cube_bytes: Option<u64>,

    /// Log verbosity for the command-line tool
    pub log_level: LogLevel,
}

impl LoaderConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            envi_data_extensions: ENVI_DATA_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            mat_variable: None,
            mat_element_types: vec![ElementType::Float32, ElementType::Float64],
            max_cube_bytes: None,
            log_level: LogLevel::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        // Validate version compatibility
        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        if config.envi_data_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "envi_data_extensions must not be empty".to_string(),
            ));
        }

        Ok(config)
    }

    /// Read configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get the default filename for config export.
    pub fn default_filename() -> &'static str {
        "hsicube.json"
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// A setting has an unusable value
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

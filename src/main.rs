//! `hsicube-info`: print the shape and layout of hyperspectral cube files.
//!
//! ```text
//! hsicube-info [--config FILE] [--variable NAME] [--log LEVEL] [--list] FILE...
//! ```

#[cfg(not(target_arch = "wasm32"))]
use std::path::PathBuf;

#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;
#[cfg(not(target_arch = "wasm32"))]
use hsicube::{LoadedCube, LoaderConfig, LoaderRegistry, LogLevel, data::MatLoader};

/// Print the shape and layout of hyperspectral cube files.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug)]
#[command(name = "hsicube-info", author, version, about, long_about = None)]
struct Cli {
    /// Loader configuration (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MAT variable to load instead of the first 3-D float array
    #[arg(long, value_name = "NAME")]
    variable: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", value_parser = parse_log_level)]
    log: Option<LogLevel>,

    /// List the numeric variables of .mat files instead of loading them
    #[arg(long)]
    list: bool,

    /// Cube files to inspect
    #[arg(value_name = "FILE", required = true)]
    paths: Vec<String>,
}

#[cfg(not(target_arch = "wasm32"))]
fn parse_log_level(name: &str) -> Result<LogLevel, String> {
    LogLevel::from_name(name).ok_or_else(|| format!("unknown log level '{name}'"))
}

#[cfg(not(target_arch = "wasm32"))]
impl Cli {
    /// Loader configuration with command-line overrides applied.
    fn loader_config(&self) -> Result<LoaderConfig, String> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_file(path).map_err(|e| format!("{}: {e}", path.display()))?,
            None => LoaderConfig::default(),
        };
        if self.variable.is_some() {
            config.mat_variable.clone_from(&self.variable);
        }
        if let Some(level) = self.log {
            config.log_level = level;
        }
        Ok(config)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn describe(path: &str, loaded: &LoadedCube) {
    let cube = &loaded.cube;
    let header = &loaded.header;
    println!("{path}");
    println!("  format:   {}", header.format);
    println!("  shape:    {} (H x W x C)", cube.dims());
    println!("  type:     {}", cube.element_type());
    println!("  stored:   {} ({})", header.layout.order, header.layout.byte_order);
    if let Some(name) = loaded.variable_name() {
        println!("  variable: {name}");
    }
    if let Some((min, max)) = cube.value_range() {
        println!("  range:    {min} .. {max}");
    }
    if let Some(wavelengths) = loaded.wavelengths() {
        if let (Some(first), Some(last)) = (wavelengths.first(), wavelengths.last()) {
            println!("  spectrum: {first} .. {last} ({} bands)", wavelengths.len());
        }
    }
}

/// Command-line entry point for native builds
#[cfg(not(target_arch = "wasm32"))]
fn main() {
    let cli = Cli::parse();
    let config = match cli.loader_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    env_logger::Builder::new()
        .filter_level(config.log_level.to_level_filter())
        .parse_default_env()
        .init();

    let registry = LoaderRegistry::with_config(&config);
    let mut failed = false;

    for path in &cli.paths {
        if cli.list && path.to_ascii_lowercase().ends_with(".mat") {
            match std::fs::read(path).map_err(|e| e.to_string()).and_then(|bytes| {
                MatLoader::list_variables(&bytes).map_err(|e| e.to_string())
            }) {
                Ok(variables) => {
                    println!("{path}");
                    for variable in variables {
                        println!(
                            "  {:<16} {:?} {}{}",
                            variable.name,
                            variable.dims,
                            variable.element_type,
                            if variable.complex { " (complex)" } else { "" }
                        );
                    }
                }
                Err(e) => {
                    log::error!("{}: {}", path, e);
                    failed = true;
                }
            }
            continue;
        }

        match registry.load_path(path) {
            Ok(loaded) => describe(path, &loaded),
            Err(e) => {
                log::error!("{}: {}", path, e);
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}

// The loader library has no command-line front end on WASM
#[cfg(target_arch = "wasm32")]
fn main() {}

//! Built-in hyperspectral cube loaders.
//!
//! This module contains implementations of the `HyperspectralLoader` trait
//! for NumPy, TIFF, MATLAB level-5 and ENVI files.

mod envi_loader;
pub(crate) mod mat_loader;
mod npy_loader;
mod tiff_loader;

pub use envi_loader::{EnviHeader, EnviLoader, code_for_element_type, element_type_for_code};
pub use mat_loader::{MatHeader, MatLoader, MatVariableInfo};
pub use npy_loader::{NpyHeader, NpyLoader};
pub use tiff_loader::TiffLoader;

/// Parse a braced, comma-separated list of numbers such as
/// `{400.0, 500.0, 600.0}`. Returns `None` if any item is not a number.
pub fn parse_number_list(value: &str) -> Option<Vec<f64>> {
    parse_string_list(value)
        .iter()
        .map(|item| item.parse::<f64>().ok())
        .collect()
}

/// Split a braced, comma-separated list into trimmed, non-empty items.
pub fn parse_string_list(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_list() {
        assert_eq!(parse_number_list("{400, 500.5, 6e2}"), Some(vec![400.0, 500.5, 600.0]));
        assert_eq!(parse_number_list("{ }"), Some(vec![]));
        assert_eq!(parse_number_list("{400, red}"), None);
    }

    #[test]
    fn test_parse_string_list() {
        assert_eq!(parse_string_list("{Band 1, Band 2,}"), vec!["Band 1", "Band 2"]);
    }
}

//! Format detection from file extension and leading bytes.

use std::path::{Path, PathBuf};

use crate::data::error::{FileFormat, LoadError};

/// NumPy magic bytes: \x93NUMPY
pub const NPY_MAGIC: &[u8] = &[0x93, b'N', b'U', b'M', b'P', b'Y'];

/// Descriptive text every MAT container starts with.
pub const MAT_MAGIC: &[u8] = b"MATLAB";

/// Default ENVI companion extensions, in search order.
pub const ENVI_DATA_EXTENSIONS: &[&str] = &["dat", "img", "bsq", "bil", "bip", "raw"];

/// Number of leading bytes the magic checks look at.
pub const SNIFF_LEN: usize = 512;

pub fn is_npy(head: &[u8]) -> bool {
    head.starts_with(NPY_MAGIC)
}

/// `II` + 42 (little endian) or `MM` + 42 (big endian). BigTIFF (43) is
/// recognised here so the TIFF loader can reject it with a precise error.
pub fn is_tiff(head: &[u8]) -> bool {
    matches!(
        head,
        [b'I', b'I', 42 | 43, 0, ..] | [b'M', b'M', 0, 42 | 43, ..]
    )
}

pub fn is_mat(head: &[u8]) -> bool {
    head.starts_with(MAT_MAGIC)
}

/// First non-empty line equals `ENVI`, ignoring case and surrounding
/// whitespace.
pub fn is_envi(head: &[u8]) -> bool {
    String::from_utf8_lossy(head)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.eq_ignore_ascii_case("ENVI"))
}

/// Identify a format from content alone.
pub fn detect_format(head: &[u8]) -> Option<FileFormat> {
    if is_npy(head) {
        Some(FileFormat::Npy)
    } else if is_tiff(head) {
        Some(FileFormat::Tiff)
    } else if is_mat(head) {
        Some(FileFormat::Mat)
    } else if is_envi(head) {
        Some(FileFormat::Envi)
    } else {
        None
    }
}

/// Content check for a specific format.
pub fn matches_format(format: FileFormat, head: &[u8]) -> bool {
    match format {
        FileFormat::Npy => is_npy(head),
        FileFormat::Tiff => is_tiff(head),
        FileFormat::Mat => is_mat(head),
        FileFormat::Envi => is_envi(head),
    }
}

/// Lowercased extension of `path`, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Pick the format of `path` whose first bytes are `head`.
///
/// The extension decides; the content must then agree. Without a known
/// extension the content alone decides.
pub fn sniff(path: &Path, head: &[u8]) -> Result<FileFormat, LoadError> {
    let extension = extension_of(path);
    let detected = detect_format(head);

    match FileFormat::from_extension(&extension) {
        Some(format) if matches_format(format, head) => {
            log::debug!("sniff: {} is {} (by extension)", path.display(), format);
            Ok(format)
        }
        Some(_) => Err(LoadError::FormatMismatch {
            extension,
            detected,
        }),
        None => match detected {
            Some(format) => {
                log::debug!("sniff: {} is {} (by content)", path.display(), format);
                Ok(format)
            }
            None => Err(LoadError::FormatMismatch {
                extension,
                detected: None,
            }),
        },
    }
}

/// Find the binary file paired with an ENVI header: `<base>.<ext>` for the
/// first `ext` in `extensions` that exists.
pub fn find_companion(header: &Path, extensions: &[String]) -> Result<PathBuf, LoadError> {
    extensions
        .iter()
        .map(|ext| header.with_extension(ext))
        .find(|candidate| candidate.is_file())
        .inspect(|found| log::debug!("sniff: data file for {} is {}", header.display(), found.display()))
        .ok_or_else(|| LoadError::MissingDataFile {
            header: header.to_path_buf(),
            tried: extensions.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_detection() {
        assert_eq!(
            detect_format(&[0x93, b'N', b'U', b'M', b'P', b'Y', 1, 0]),
            Some(FileFormat::Npy)
        );
        assert_eq!(detect_format(b"II*\0\x08\0\0\0"), Some(FileFormat::Tiff));
        assert_eq!(detect_format(b"MM\0*\0\0\0\x08"), Some(FileFormat::Tiff));
        assert_eq!(
            detect_format(b"MATLAB 5.0 MAT-file, Platform: GLNXA64"),
            Some(FileFormat::Mat)
        );
        assert_eq!(detect_format(b"\n  envi \nsamples = 3\n"), Some(FileFormat::Envi));
        assert_eq!(detect_format(b"ENVIRONMENT\n"), None);
        assert_eq!(detect_format(&[0x89, 0x50, 0x4E, 0x47]), None);
    }

    #[test]
    fn test_sniff_extension_must_agree_with_content() {
        let head = b"II*\0\x08\0\0\0";
        assert_eq!(sniff(Path::new("cube.TIF"), head).unwrap(), FileFormat::Tiff);

        let err = sniff(Path::new("cube.npy"), head).unwrap_err();
        assert!(matches!(
            err,
            LoadError::FormatMismatch {
                ref extension,
                detected: Some(FileFormat::Tiff)
            } if extension == "npy"
        ));
    }

    #[test]
    fn test_sniff_unknown_extension_falls_back_to_content() {
        assert_eq!(
            sniff(Path::new("cube.bin"), NPY_MAGIC).unwrap(),
            FileFormat::Npy
        );
        assert!(matches!(
            sniff(Path::new("notes.txt"), b"hello"),
            Err(LoadError::FormatMismatch { detected: None, .. })
        ));
    }

    #[test]
    fn test_find_companion_order() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("scene.hdr");
        std::fs::write(&header, "ENVI\n").unwrap();
        std::fs::write(dir.path().join("scene.raw"), [0u8]).unwrap();
        std::fs::write(dir.path().join("scene.img"), [0u8]).unwrap();

        let extensions: Vec<String> = ENVI_DATA_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        let found = find_companion(&header, &extensions).unwrap();
        assert_eq!(found, dir.path().join("scene.img"));
    }

    #[test]
    fn test_find_companion_missing() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("scene.hdr");
        let err = find_companion(&header, &["dat".to_string()]).unwrap_err();
        assert!(matches!(err, LoadError::MissingDataFile { ref tried, .. } if tried == &["dat"]));
    }
}

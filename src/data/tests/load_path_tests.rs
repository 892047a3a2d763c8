//! Loading from disk: format sniffing, ENVI companions, configuration and
//! error reporting.

use ndarray::Array3;
use ndarray_npy::WriteNpyExt;

use super::fixtures::{TiffBuilder, TiffPage, envi_header, le_bytes, write_envi_pair};
use crate::config::LoaderConfig;
use crate::data::export::MatWriter;
use crate::data::{ByteOrder, Dims, ElementType, FileFormat, LoadError, LoaderRegistry, StorageOrder};

fn scene_data() -> Vec<u8> {
    le_bytes((0..24).map(|v| v as f32))
}

#[test]
fn test_envi_bsq_scene() {
    let dir = tempfile::tempdir().unwrap();
    let header = write_envi_pair(dir.path(), "scene", &envi_header(3, 2, 4, 4, "bsq"), "dat", &scene_data());

    let loaded = LoaderRegistry::new().load_path(&header).unwrap();
    let cube = &loaded.cube;
    assert_eq!(cube.dims(), Dims::new(2, 3, 4));
    assert_eq!(cube.element_type(), ElementType::Float32);
    assert_eq!(cube.get(0, 0, 0), Some(0.0));
    assert_eq!(cube.get(0, 1, 0), Some(1.0));
    assert_eq!(cube.get(0, 2, 0), Some(2.0));
    assert_eq!(cube.get(1, 0, 0), Some(3.0));
    assert_eq!(cube.get(0, 0, 1), Some(6.0));
    assert_eq!(loaded.header.format, FileFormat::Envi);
    assert_eq!(loaded.header.layout.order, StorageOrder::Bsq);
}

#[test]
fn test_envi_bil_and_bip_scenes() {
    let dir = tempfile::tempdir().unwrap();
    let registry = LoaderRegistry::new();

    // BIL: for each line, each band, each sample
    let header = write_envi_pair(dir.path(), "bil", &envi_header(3, 2, 4, 4, "bil"), "img", &scene_data());
    let cube = registry.load_path(&header).unwrap().cube;
    assert_eq!(cube.get(0, 1, 0), Some(1.0));
    assert_eq!(cube.get(0, 0, 1), Some(3.0));
    assert_eq!(cube.get(1, 0, 0), Some(12.0));

    // BIP is already canonical
    let header = write_envi_pair(dir.path(), "bip", &envi_header(3, 2, 4, 4, "bip"), "bip", &scene_data());
    let cube = registry.load_path(&header).unwrap().cube;
    assert_eq!(cube.as_slice::<f32>().unwrap(), (0..24).map(|v| v as f32).collect::<Vec<_>>().as_slice());
}

#[test]
fn test_envi_wavelengths_reach_the_loaded_cube() {
    let dir = tempfile::tempdir().unwrap();
    let text = envi_header(3, 2, 4, 4, "bsq") + "wavelength = {\n 450.0, 550.0,\n 650.0, 750.0 }\n";
    let header = write_envi_pair(dir.path(), "scene", &text, "dat", &scene_data());

    let loaded = LoaderRegistry::new().load_path(&header).unwrap();
    assert_eq!(loaded.wavelengths(), Some(vec![450.0, 550.0, 650.0, 750.0]));
}

#[test]
fn test_envi_missing_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("scene.hdr");
    std::fs::write(&header, envi_header(3, 2, 4, 4, "bsq")).unwrap();

    let err = LoaderRegistry::new().load_path(&header).unwrap_err();
    match err {
        LoadError::MissingDataFile { header: h, tried } => {
            assert_eq!(h, header);
            assert_eq!(tried, vec!["dat", "img", "bsq", "bil", "bip", "raw"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_envi_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let header = write_envi_pair(
        dir.path(),
        "scene",
        &envi_header(3, 2, 4, 4, "bsq"),
        "dat",
        &scene_data()[..92],
    );
    let err = LoaderRegistry::new().load_path(&header).unwrap_err();
    assert!(matches!(err, LoadError::SizeMismatch { expected: 96, actual: 92 }));
}

#[test]
fn test_configured_companion_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let header = write_envi_pair(dir.path(), "scene", &envi_header(3, 2, 4, 4, "bsq"), "cube", &scene_data());

    let err = LoaderRegistry::new().load_path(&header).unwrap_err();
    assert!(matches!(err, LoadError::MissingDataFile { .. }));

    let config = LoaderConfig {
        envi_data_extensions: vec!["cube".to_string()],
        ..LoaderConfig::default()
    };
    let loaded = LoaderRegistry::with_config(&config).load_path(&header).unwrap();
    assert_eq!(loaded.cube.get(1, 0, 0), Some(3.0));
}

#[test]
fn test_extension_and_content_must_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.npy");
    let tiff = TiffBuilder::new(ByteOrder::Little)
        .page(TiffPage::gray(2, 2, vec![1, 2, 3, 4]))
        .finish();
    std::fs::write(&path, &tiff).unwrap();

    let err = LoaderRegistry::new().load_path(&path).unwrap_err();
    assert!(matches!(
        err,
        LoadError::FormatMismatch {
            ref extension,
            detected: Some(FileFormat::Tiff)
        } if extension == "npy"
    ));

    // Unknown extension: content decides
    let path = dir.path().join("cube.bin");
    std::fs::write(&path, &tiff).unwrap();
    let loaded = LoaderRegistry::new().load_path(&path).unwrap();
    assert_eq!(loaded.header.format, FileFormat::Tiff);
    assert_eq!(loaded.cube.get(1, 1, 0), Some(4.0));
}

#[test]
fn test_missing_file_is_io_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.npy");
    let err = LoaderRegistry::new().load_path(&path).unwrap_err();
    assert!(matches!(err, LoadError::IoFailure { path: ref p, .. } if *p == path));
}

#[test]
fn test_size_budget() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.npy");
    let mut bytes = Vec::new();
    Array3::<f64>::zeros((4, 4, 4)).write_npy(&mut bytes).unwrap();
    std::fs::write(&path, bytes).unwrap();

    let config = LoaderConfig {
        max_cube_bytes: Some(256),
        ..LoaderConfig::default()
    };
    let err = LoaderRegistry::with_config(&config).load_path(&path).unwrap_err();
    assert!(matches!(err, LoadError::SizeMismatch { expected: 256, actual: 512 }));

    assert!(LoaderRegistry::new().load_path(&path).is_ok());
}

#[test]
fn test_configured_mat_variable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.mat");
    let mut writer = MatWriter::new().compressed(true);
    writer.push_array("radiance", &[2, 2, 2], &[1.0f32; 8]).unwrap();
    writer.push_array("mask", &[2, 2, 2], &[0u8, 1, 0, 1, 0, 1, 0, 1]).unwrap();
    writer.save(&path).unwrap();

    let loaded = LoaderRegistry::new().load_path(&path).unwrap();
    assert_eq!(loaded.variable_name(), Some("radiance"));

    let config = LoaderConfig {
        mat_variable: Some("mask".to_string()),
        ..LoaderConfig::default()
    };
    let loaded = LoaderRegistry::with_config(&config).load_path(&path).unwrap();
    assert_eq!(loaded.variable_name(), Some("mask"));
    assert_eq!(loaded.cube.element_type(), ElementType::Uint8);
    // column-major (i, j, k) -> i + 2j + 4k, so each band plane is [[0, 0], [1, 1]]
    assert_eq!(loaded.cube.band(1), Some(vec![0.0, 0.0, 1.0, 1.0]));
}

#[test]
fn test_load_convenience() {
    let dir = tempfile::tempdir().unwrap();
    let header = write_envi_pair(dir.path(), "scene", &envi_header(3, 2, 4, 4, "bsq"), "raw", &scene_data());
    let cube = crate::data::load(&header).unwrap();
    assert_eq!(cube.dims(), Dims::new(2, 3, 4));
}

#[test]
fn test_concurrent_loads_share_a_registry() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<_> = (0..8)
        .map(|i| {
            let data = le_bytes((0..24).map(|v| (v + i * 100) as f32));
            write_envi_pair(dir.path(), &format!("scene{i}"), &envi_header(3, 2, 4, 4, "bsq"), "dat", &data)
        })
        .collect();
    let registry = LoaderRegistry::new();
    let registry = &registry;

    let firsts: Vec<f64> = std::thread::scope(|scope| {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| scope.spawn(move || registry.load_path(path).map(|l| l.cube.get(0, 0, 0))))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap().unwrap())
            .collect()
    });

    let expected: Vec<f64> = (0..8).map(|i| (i * 100) as f64).collect();
    assert_eq!(firsts, expected);
}

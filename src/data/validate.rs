//! Consistency checks shared by the loaders, the normalizer and tests.

use crate::data::cube::Cube;
use crate::data::element::{ElementType, Sample, with_sample_type};
use crate::data::error::LoadError;
use crate::data::header::HeaderMetadata;
use crate::data::layout::{Dims, StorageOrder};

/// Bytes a payload of `dims` elements of `element_type` must occupy.
///
/// A shape whose byte size overflows `usize` reports `expected: usize::MAX`.
pub fn expected_payload_bytes(dims: Dims, element_type: ElementType) -> Result<usize, LoadError> {
    dims.element_count()
        .and_then(|count| count.checked_mul(element_type.size()))
        .ok_or(LoadError::SizeMismatch {
            expected: usize::MAX,
            actual: 0,
        })
}

/// Check that `actual` payload bytes match what `header` declares.
pub fn check_payload(header: &HeaderMetadata, actual: usize) -> Result<(), LoadError> {
    let expected = header.expected_bytes()?;
    if expected != actual {
        return Err(LoadError::size_mismatch(expected, actual));
    }
    Ok(())
}

/// Check that a storage order's strides address every element of `dims`
/// exactly once.
///
/// Sorting the axes by stride, the innermost stride must be 1 and every
/// next stride must equal the previous stride times its extent.
pub fn check_strides(order: StorageOrder, dims: Dims) -> Result<(), LoadError> {
    let strides = order.strides(dims);
    let mut axes = [
        (strides.height, dims.height),
        (strides.width, dims.width),
        (strides.band, dims.bands),
    ];
    axes.sort_by_key(|&(stride, extent)| (stride, extent));

    let mut expected = 1usize;
    for (stride, extent) in axes {
        // unit axes may share a stride with their neighbour
        if extent > 1 && stride != expected {
            return Err(stride_error(order, dims));
        }
        expected = expected
            .checked_mul(extent)
            .ok_or_else(|| stride_error(order, dims))?;
    }

    match dims.element_count() {
        Some(total) if total == expected => Ok(()),
        _ => Err(stride_error(order, dims)),
    }
}

fn stride_error(order: StorageOrder, dims: Dims) -> LoadError {
    LoadError::SizeMismatch {
        expected: dims.element_count().unwrap_or(usize::MAX),
        actual: {
            let s = order.strides(dims);
            s.offset(
                dims.height.saturating_sub(1),
                dims.width.saturating_sub(1),
                dims.bands.saturating_sub(1),
            ) + 1
        },
    }
}

/// Check a cube's buffer invariant: exactly `H * W * C` elements.
pub fn validate_cube(cube: &Cube) -> Result<(), LoadError> {
    let dims = cube.dims();
    let expected = expected_payload_bytes(dims, cube.element_type())?;
    if dims.is_degenerate() || cube.byte_len() != expected {
        return Err(LoadError::size_mismatch(expected, cube.byte_len()));
    }
    Ok(())
}

/// Reject canonical buffers larger than `limit` bytes before they are
/// allocated.
pub fn check_budget(dims: Dims, element_type: ElementType, limit: Option<u64>) -> Result<(), LoadError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let bytes = expected_payload_bytes(dims, element_type)?;
    if bytes as u64 > limit {
        return Err(LoadError::size_mismatch(
            usize::try_from(limit).unwrap_or(usize::MAX),
            bytes,
        ));
    }
    Ok(())
}

/// First `(row, col, band)` at which two cubes disagree.
///
/// Cubes with different dimensions or element types differ at `(0, 0, 0)`.
/// NaNs compare equal to NaNs at the same position.
pub fn first_difference(a: &Cube, b: &Cube) -> Option<(usize, usize, usize)> {
    if a.dims() != b.dims() || a.element_type() != b.element_type() {
        return Some((0, 0, 0));
    }
    let dims = a.dims();
    let position = with_sample_type!(a.element_type(), T => {
        let (lhs, rhs) = (a.as_slice::<T>()?, b.as_slice::<T>()?);
        lhs.iter().zip(rhs).position(|(x, y)| {
            let (x, y) = (x.to_f64(), y.to_f64());
            !(x == y || (x.is_nan() && y.is_nan()))
        })
    })?;

    let band = position % dims.bands;
    let pixel = position / dims.bands;
    Some((pixel / dims.width, pixel % dims.width, band))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_order_tiles_the_cube() {
        for dims in [
            Dims::new(2, 3, 4),
            Dims::new(1, 1, 1),
            Dims::new(1, 5, 1),
            Dims::new(7, 1, 3),
            Dims::new(4, 4, 1),
        ] {
            for order in StorageOrder::ALL {
                assert!(check_strides(order, dims).is_ok(), "{order} {dims}");
            }
        }
    }

    #[test]
    fn test_expected_payload_bytes() {
        assert_eq!(
            expected_payload_bytes(Dims::new(2, 3, 4), ElementType::Float32).unwrap(),
            96
        );
        assert!(expected_payload_bytes(Dims::new(usize::MAX, 2, 2), ElementType::Uint8).is_err());
    }

    #[test]
    fn test_budget() {
        let dims = Dims::new(10, 10, 10);
        assert!(check_budget(dims, ElementType::Float64, None).is_ok());
        assert!(check_budget(dims, ElementType::Float64, Some(8000)).is_ok());
        assert!(matches!(
            check_budget(dims, ElementType::Float64, Some(7999)),
            Err(LoadError::SizeMismatch { actual: 8000, .. })
        ));
    }

    #[test]
    fn test_first_difference_reports_position() {
        let dims = Dims::new(2, 2, 3);
        let a = Cube::from_values(dims, (0..12).collect::<Vec<u16>>()).unwrap();
        let mut values: Vec<u16> = (0..12).collect();
        values[7] = 99; // h=1 w=0 c=1
        let b = Cube::from_values(dims, values).unwrap();

        assert_eq!(first_difference(&a, &a), None);
        assert_eq!(first_difference(&a, &b), Some((1, 0, 1)));
    }
}

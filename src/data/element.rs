//! Element types, byte order and typed sample decoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::cube::CubeData;

/// Numeric element type of a cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// NumPy-style name (`float32`, `uint16`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte order of multi-byte elements in a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Little => f.write_str("little-endian"),
            ByteOrder::Big => f.write_str("big-endian"),
        }
    }
}

/// A primitive that can live in a [`CubeData`] buffer.
///
/// Implemented for the eight element types the loader supports. `decode`
/// expects at least `ELEMENT_TYPE.size()` bytes.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The runtime tag for this type.
    const ELEMENT_TYPE: ElementType;

    /// Decode one value from the front of `bytes`.
    fn decode(bytes: &[u8], order: ByteOrder) -> Self;

    /// Append the encoded value to `out`.
    fn encode(self, order: ByteOrder, out: &mut Vec<u8>);

    /// Lossless widening.
    fn to_f64(self) -> f64;

    /// Saturating conversion from `f64`.
    fn from_f64(value: f64) -> Self;

    /// Wrap an owned buffer in the matching [`CubeData`] variant.
    fn into_data(values: Vec<Self>) -> CubeData;

    /// Borrow the buffer if `data` holds this type.
    fn slice_of(data: &CubeData) -> Option<&[Self]>;
}

macro_rules! impl_sample {
    ($t:ty, $variant:ident, $size:expr) => {
        impl_sample!($t, $variant, $size, value => value as $t);
    };
    ($t:ty, $variant:ident, $size:expr, $value:ident => $from_f64:expr) => {
        impl Sample for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            #[inline]
            fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                let mut buf = [0u8; $size];
                buf.copy_from_slice(&bytes[..$size]);
                match order {
                    ByteOrder::Little => <$t>::from_le_bytes(buf),
                    ByteOrder::Big => <$t>::from_be_bytes(buf),
                }
            }

            #[inline]
            fn encode(self, order: ByteOrder, out: &mut Vec<u8>) {
                match order {
                    ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                    ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                }
            }

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            #[inline]
            fn from_f64($value: f64) -> Self {
                $from_f64
            }

            fn into_data(values: Vec<Self>) -> CubeData {
                CubeData::$variant(values)
            }

            fn slice_of(data: &CubeData) -> Option<&[Self]> {
                match data {
                    CubeData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

impl_sample!(i8, Int8, 1);
impl_sample!(u8, Uint8, 1);
impl_sample!(i16, Int16, 2);
impl_sample!(u16, Uint16, 2);
impl_sample!(i32, Int32, 4);
impl_sample!(u32, Uint32, 4);
impl_sample!(f32, Float32, 4);
impl_sample!(f64, Float64, 8, value => value);

/// Run `$body` with `$T` bound to the Rust type behind an [`ElementType`].
macro_rules! with_sample_type {
    ($element_type:expr, $T:ident => $body:expr) => {
        match $element_type {
            $crate::data::ElementType::Int8 => {
                type $T = i8;
                $body
            }
            $crate::data::ElementType::Uint8 => {
                type $T = u8;
                $body
            }
            $crate::data::ElementType::Int16 => {
                type $T = i16;
                $body
            }
            $crate::data::ElementType::Uint16 => {
                type $T = u16;
                $body
            }
            $crate::data::ElementType::Int32 => {
                type $T = i32;
                $body
            }
            $crate::data::ElementType::Uint32 => {
                type $T = u32;
                $body
            }
            $crate::data::ElementType::Float32 => {
                type $T = f32;
                $body
            }
            $crate::data::ElementType::Float64 => {
                type $T = f64;
                $body
            }
        }
    };
}

pub(crate) use with_sample_type;

/// Decode a whole buffer of `T` values. `bytes.len()` must be a multiple of
/// the element size; any remainder is ignored.
pub fn decode_all<T: Sample>(bytes: &[u8], order: ByteOrder) -> Vec<T> {
    bytes
        .chunks_exact(T::ELEMENT_TYPE.size())
        .map(|chunk| T::decode(chunk, order))
        .collect()
}

/// Re-encode a raw buffer stored as `from` into `to`, keeping the byte order.
///
/// MAT files may store a double array with a narrower storage type; this
/// widens such payloads to the declared class before normalization.
pub fn convert_payload(bytes: &[u8], from: ElementType, to: ElementType, order: ByteOrder) -> Vec<u8> {
    if from == to {
        return bytes.to_vec();
    }
    let count = bytes.len() / from.size();
    let mut out = Vec::with_capacity(count * to.size());
    with_sample_type!(from, S => {
        for chunk in bytes.chunks_exact(from.size()) {
            let value = S::decode(chunk, order).to_f64();
            with_sample_type!(to, D => D::from_f64(value).encode(order, &mut out));
        }
    });
    out
}

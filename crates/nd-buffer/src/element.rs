//! Fixed-width element types and the per-type conversion table.
//!
//! Every numeric width a buffer can hold implements [`Element`]. The trait
//! fixes the runtime tag and byte width at compile time, and provides the
//! little-endian codec plus the widening/narrowing rules used whenever data
//! crosses from one representation to another:
//!
//! - float -> integer truncates toward zero and saturates (NaN becomes 0)
//! - integer -> integer wraps (two's complement truncation)
//! - anything -> bool is `value != 0`; bool -> number is 0 or 1
//! - float -> half/bfloat16 rounds to nearest even

use std::fmt::Debug;

use half::{bf16, f16};

use crate::array::NumericArray;
use crate::dtype::ElementType;

/// A fixed-width value that can be stored in a typed buffer.
pub trait Element: Copy + PartialEq + Debug + Send + Sync + 'static {
    /// Runtime tag for this width.
    const ELEMENT_TYPE: ElementType;
    /// Size of one encoded element in bytes.
    const WIDTH: usize;

    /// Decode from exactly `WIDTH` little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Encode into exactly `WIDTH` bytes, little-endian.
    fn write_le(self, out: &mut [u8]);

    fn to_f64(self) -> f64;

    fn to_i128(self) -> i128;

    fn from_f64(v: f64) -> Self;

    fn from_i128(v: i128) -> Self;

    /// Wrap a vector of this type in the matching [`NumericArray`] variant.
    fn wrap(values: Vec<Self>) -> NumericArray;

    /// Borrow the values if `array` holds exactly this type.
    fn unwrap(array: &NumericArray) -> Option<&[Self]>;

    /// Convert one value into another element type.
    fn cast<T: Element>(self) -> T {
        if Self::ELEMENT_TYPE.is_float() || T::ELEMENT_TYPE.is_float() {
            T::from_f64(self.to_f64())
        } else {
            T::from_i128(self.to_i128())
        }
    }
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:ident) => {
        impl Element for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$dtype;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i128(self) -> i128 {
                self as i128
            }

            fn from_f64(v: f64) -> Self {
                v as $t
            }

            fn from_i128(v: i128) -> Self {
                v as $t
            }

            fn wrap(values: Vec<Self>) -> NumericArray {
                NumericArray::$dtype(values)
            }

            fn unwrap(array: &NumericArray) -> Option<&[Self]> {
                match array {
                    NumericArray::$dtype(v) => Some(v.as_slice()),
                    _ => None,
                }
            }
        }
    };
}

impl_int_element!(i8, Int8);
impl_int_element!(i16, Int16);
impl_int_element!(i32, Int32);
impl_int_element!(i64, Int64);
impl_int_element!(u8, UInt8);
impl_int_element!(u16, UInt16);
impl_int_element!(u32, UInt32);
impl_int_element!(u64, UInt64);

macro_rules! impl_float_element {
    ($t:ty, $dtype:ident, |$v:ident| $from_f64:expr, |$s:ident| $to_f64:expr) => {
        impl Element for $t {
            const ELEMENT_TYPE: ElementType = ElementType::$dtype;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn to_f64(self) -> f64 {
                let $s = self;
                $to_f64
            }

            fn to_i128(self) -> i128 {
                self.to_f64() as i128
            }

            fn from_f64($v: f64) -> Self {
                $from_f64
            }

            fn from_i128(v: i128) -> Self {
                Self::from_f64(v as f64)
            }

            fn wrap(values: Vec<Self>) -> NumericArray {
                NumericArray::$dtype(values)
            }

            fn unwrap(array: &NumericArray) -> Option<&[Self]> {
                match array {
                    NumericArray::$dtype(v) => Some(v.as_slice()),
                    _ => None,
                }
            }
        }
    };
}

impl_float_element!(f16, Half, |v| f16::from_f64(v), |s| s.to_f64());
impl_float_element!(bf16, BFloat16, |v| bf16::from_f64(v), |s| s.to_f64());
impl_float_element!(f32, Float, |v| v as f32, |s| s as f64);
impl_float_element!(f64, Double, |v| v, |s| s);

impl Element for bool {
    const ELEMENT_TYPE: ElementType = ElementType::Bool;
    const WIDTH: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn to_i128(self) -> i128 {
        i128::from(self)
    }

    fn from_f64(v: f64) -> Self {
        v != 0.0
    }

    fn from_i128(v: i128) -> Self {
        v != 0
    }

    fn wrap(values: Vec<Self>) -> NumericArray {
        NumericArray::Bool(values)
    }

    fn unwrap(array: &NumericArray) -> Option<&[Self]> {
        match array {
            NumericArray::Bool(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// Run `$body` with `$t` bound to the Rust type behind a runtime
/// [`ElementType`]; non-numeric tags fall through to `$fallback`.
macro_rules! with_element_type {
    ($dtype:expr, $t:ident => $body:expr, $other:ident => $fallback:expr) => {
        match $dtype {
            $crate::dtype::ElementType::Bool => {
                type $t = bool;
                $body
            }
            $crate::dtype::ElementType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::dtype::ElementType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::dtype::ElementType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::dtype::ElementType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::dtype::ElementType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::dtype::ElementType::UInt16 => {
                type $t = u16;
                $body
            }
            $crate::dtype::ElementType::UInt32 => {
                type $t = u32;
                $body
            }
            $crate::dtype::ElementType::UInt64 => {
                type $t = u64;
                $body
            }
            $crate::dtype::ElementType::Half => {
                type $t = half::f16;
                $body
            }
            $crate::dtype::ElementType::BFloat16 => {
                type $t = half::bf16;
                $body
            }
            $crate::dtype::ElementType::Float => {
                type $t = f32;
                $body
            }
            $crate::dtype::ElementType::Double => {
                type $t = f64;
                $body
            }
            $other => $fallback,
        }
    };
}

pub(crate) use with_element_type;

/// Element-wise conversion between two widths.
pub fn cast_slice<S: Element, T: Element>(values: &[S]) -> Vec<T> {
    values.iter().map(|v| v.cast::<T>()).collect()
}

/// Decode contiguous little-endian bytes; a trailing partial element is ignored.
pub fn decode_slice<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::WIDTH).map(T::read_le).collect()
}

/// Encode values as contiguous little-endian bytes.
pub fn encode_slice<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * T::WIDTH];
    for (chunk, v) in out.chunks_exact_mut(T::WIDTH).zip(values) {
        v.write_le(chunk);
    }
    out
}

use half::{bf16, f16};

use crate::dtype::ElementType;
use crate::element::{cast_slice, decode_slice, encode_slice, with_element_type, Element};
use crate::error::{BufferError, Result};

/// A materialized host array of one fixed-width element type.
///
/// This is what buffers are built from (`from_array`) and what they produce
/// when asked for a particular numeric representation (`as_type`).
#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Half(Vec<f16>),
    BFloat16(Vec<bf16>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

macro_rules! dispatch {
    ($array:expr, $v:ident => $body:expr) => {
        match $array {
            NumericArray::Bool($v) => $body,
            NumericArray::Int8($v) => $body,
            NumericArray::Int16($v) => $body,
            NumericArray::Int32($v) => $body,
            NumericArray::Int64($v) => $body,
            NumericArray::UInt8($v) => $body,
            NumericArray::UInt16($v) => $body,
            NumericArray::UInt32($v) => $body,
            NumericArray::UInt64($v) => $body,
            NumericArray::Half($v) => $body,
            NumericArray::BFloat16($v) => $body,
            NumericArray::Float($v) => $body,
            NumericArray::Double($v) => $body,
        }
    };
}

impl NumericArray {
    /// Returns the element type held by this array.
    pub fn element_type(&self) -> ElementType {
        match self {
            NumericArray::Bool(_) => ElementType::Bool,
            NumericArray::Int8(_) => ElementType::Int8,
            NumericArray::Int16(_) => ElementType::Int16,
            NumericArray::Int32(_) => ElementType::Int32,
            NumericArray::Int64(_) => ElementType::Int64,
            NumericArray::UInt8(_) => ElementType::UInt8,
            NumericArray::UInt16(_) => ElementType::UInt16,
            NumericArray::UInt32(_) => ElementType::UInt32,
            NumericArray::UInt64(_) => ElementType::UInt64,
            NumericArray::Half(_) => ElementType::Half,
            NumericArray::BFloat16(_) => ElementType::BFloat16,
            NumericArray::Float(_) => ElementType::Float,
            NumericArray::Double(_) => ElementType::Double,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert every element into `target`, producing a fresh array.
    ///
    /// # Errors
    /// Returns `UnsupportedConversion` if `target` is not a fixed-width
    /// numeric type.
    pub fn cast(&self, target: ElementType) -> Result<NumericArray> {
        dispatch!(self, v => cast_into(v.as_slice(), target))
    }

    /// Encode as contiguous little-endian bytes at the native width.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        dispatch!(self, v => encode_slice(v.as_slice()))
    }

    /// Decode contiguous little-endian bytes of the given element type.
    ///
    /// # Errors
    /// Returns an error for non-numeric types or a byte count that is not a
    /// multiple of the element width.
    pub fn from_le_bytes(dtype: ElementType, bytes: &[u8]) -> Result<NumericArray> {
        let width = dtype.size_in_bytes();
        if width == 0 {
            return Err(BufferError::UnsupportedDType(dtype));
        }
        if bytes.len() % width != 0 {
            return Err(BufferError::InvalidArgument(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }
        with_element_type!(
            dtype,
            T => Ok(T::wrap(decode_slice::<T>(bytes))),
            other => Err(BufferError::UnsupportedDType(other))
        )
    }

    /// Materialize as a `Vec` of the requested element type, converting
    /// element-wise when the held type differs.
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        match T::unwrap(self) {
            Some(values) => values.to_vec(),
            None => dispatch!(self, v => cast_slice::<_, T>(v.as_slice())),
        }
    }
}

impl<T: Element> From<Vec<T>> for NumericArray {
    fn from(values: Vec<T>) -> Self {
        T::wrap(values)
    }
}

fn cast_into<S: Element>(values: &[S], target: ElementType) -> Result<NumericArray> {
    with_element_type!(
        target,
        T => Ok(T::wrap(cast_slice::<S, T>(values))),
        other => Err(BufferError::UnsupportedConversion {
            from: S::ELEMENT_TYPE,
            to: other,
        })
    )
}

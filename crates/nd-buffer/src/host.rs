use std::marker::PhantomData;

use crate::array::NumericArray;
use crate::buffer::TypedBuffer;
use crate::data::DataBuffer;
use crate::dtype::ElementType;
use crate::element::{encode_slice, Element};
use crate::error::{BufferError, Result};
use crate::indexer::Indexer;
use crate::workspace::Workspace;

/// A host-resident buffer whose element type is fixed by `T`.
///
/// A thin typed shell over [`DataBuffer`]: the element type comes from
/// `T::ELEMENT_TYPE` and accessors speak `T` instead of a runtime tag.
#[derive(Debug)]
pub struct HostBuffer<T: Element> {
    inner: DataBuffer,
    _marker: PhantomData<T>,
}

pub type BoolBuffer = HostBuffer<bool>;
pub type Int8Buffer = HostBuffer<i8>;
pub type Int16Buffer = HostBuffer<i16>;
pub type Int32Buffer = HostBuffer<i32>;
pub type Int64Buffer = HostBuffer<i64>;
pub type UInt8Buffer = HostBuffer<u8>;
pub type UInt16Buffer = HostBuffer<u16>;
pub type UInt32Buffer = HostBuffer<u32>;
pub type UInt64Buffer = HostBuffer<u64>;
pub type HalfBuffer = HostBuffer<half::f16>;
pub type BFloat16Buffer = HostBuffer<half::bf16>;
pub type FloatBuffer = HostBuffer<f32>;
pub type DoubleBuffer = HostBuffer<f64>;

impl<T: Element> HostBuffer<T> {
    fn wrap(inner: DataBuffer) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Allocate `length` elements on the heap.
    pub fn with_length(length: usize, initialize: bool) -> Result<Self> {
        DataBuffer::allocate(T::ELEMENT_TYPE, length, initialize).map(Self::wrap)
    }

    /// Allocate `length` elements inside `workspace`.
    pub fn with_length_in(workspace: &Workspace, length: usize, initialize: bool) -> Result<Self> {
        DataBuffer::allocate_in(workspace, T::ELEMENT_TYPE, length, initialize).map(Self::wrap)
    }

    /// Copy `values` into a new buffer.
    pub fn from_slice(values: &[T]) -> Result<Self> {
        DataBuffer::from_le_bytes(T::ELEMENT_TYPE, values.len(), encode_slice(values))
            .map(Self::wrap)
    }

    /// Convert any numeric array element-wise into `T`.
    pub fn from_array(array: NumericArray) -> Result<Self> {
        DataBuffer::from_array(T::ELEMENT_TYPE, array, true).map(Self::wrap)
    }

    /// Take a runtime-typed buffer whose element type is `T`.
    ///
    /// # Errors
    /// `TypeMismatch` if the buffer holds a different element type.
    pub fn try_from_data(inner: DataBuffer) -> Result<Self> {
        if inner.element_type() != T::ELEMENT_TYPE {
            return Err(BufferError::TypeMismatch {
                expected: T::ELEMENT_TYPE,
                got: inner.element_type(),
            });
        }
        Ok(Self::wrap(inner))
    }

    /// A non-owning view over elements `[offset, offset + length)`.
    pub fn view(&self, offset: usize, length: usize) -> Result<Self> {
        self.inner.subview(offset, length).map(Self::wrap)
    }

    /// A non-owning view of `length` elements, `stride` elements apart,
    /// starting at element `offset`.
    pub fn strided_view(&self, offset: usize, stride: usize, length: usize) -> Result<Self> {
        let out_of_bounds = || BufferError::RangeOutOfBounds {
            offset,
            stride,
            count: length,
            len: self.len(),
        };
        let base = self.inner.indexer();
        let combined = stride.checked_mul(base.stride()).ok_or_else(out_of_bounds)?;
        let indexer = Indexer::strided(T::ELEMENT_TYPE, combined)?;
        let byte_offset = base.checked_byte_offset(offset).ok_or_else(out_of_bounds)?;
        DataBuffer::view(&self.inner, byte_offset, indexer, length).map(Self::wrap)
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.inner.get::<T>(index)
    }

    pub fn set(&self, index: usize, value: T) -> Result<()> {
        self.inner.set(index, value)
    }

    /// The stored element widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.inner.get_f64(index)
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.inner.materialize()?.to_vec())
    }

    pub fn as_f32(&self) -> Result<Vec<f32>> {
        self.inner.as_f32()
    }

    pub fn as_f64(&self) -> Result<Vec<f64>> {
        self.inner.as_f64()
    }

    pub fn as_i32(&self) -> Result<Vec<i32>> {
        self.inner.as_i32()
    }

    pub fn get_range(&self, offset: usize, stride: usize, count: usize) -> Result<Vec<T>> {
        Ok(self.inner.get_range(offset, stride, count)?.to_vec())
    }

    pub fn as_data(&self) -> &DataBuffer {
        &self.inner
    }

    pub fn into_data(self) -> DataBuffer {
        self.inner
    }
}

impl<T: Element> TypedBuffer for HostBuffer<T> {
    fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn owns_memory(&self) -> bool {
        self.inner.owns_memory()
    }

    fn is_attached(&self) -> bool {
        self.inner.is_attached()
    }

    fn as_type(&self, target: ElementType) -> Result<NumericArray> {
        self.inner.as_type(target)
    }

    fn to_le_bytes(&self) -> Result<Vec<u8>> {
        self.inner.to_le_bytes()
    }

    fn duplicate(&self) -> Result<Self> {
        self.inner.duplicate().map(Self::wrap)
    }
}

use std::sync::Arc;

use tracing::{debug, trace};

use crate::array::NumericArray;
use crate::buffer::TypedBuffer;
use crate::dtype::ElementType;
use crate::element::{with_element_type, Element};
use crate::error::{BufferError, Result};
use crate::indexer::Indexer;
use crate::region::Region;
use crate::tracker::MemoryTracker;
use crate::workspace::Workspace;

/// A fixed-width buffer whose element type is chosen at runtime.
///
/// This carries the logic shared by every numeric width: allocation, views,
/// duplication, bounds-checked element access and conversion. The element
/// type and width are fixed at construction; re-typing means building a new
/// buffer, optionally a [`view`](DataBuffer::view) over the same memory.
///
/// Writes take `&self`: they go through the region's exclusive lock, so a
/// buffer and its views can be shared across threads.
#[derive(Debug)]
pub struct DataBuffer {
    region: Region,
    indexer: Indexer,
    length: usize,
}

/// Byte size of `length` dense elements, rejecting what cannot be allocated.
pub(crate) fn checked_byte_len(element_type: ElementType, length: usize) -> Result<usize> {
    let bytes = length
        .checked_mul(element_type.size_in_bytes())
        .ok_or(BufferError::AllocationFailed { bytes: usize::MAX })?;
    if bytes > isize::MAX as usize {
        return Err(BufferError::AllocationFailed { bytes });
    }
    Ok(bytes)
}

fn check_fixed(element_type: ElementType) -> Result<Indexer> {
    if !element_type.is_fixed_width() {
        return Err(BufferError::UnsupportedDType(element_type));
    }
    Indexer::contiguous(element_type)
}

fn check_length(length: usize) -> Result<()> {
    if length == 0 {
        return Err(BufferError::InvalidLength(length));
    }
    Ok(())
}

/// Decode `count` logical elements starting at `offset`, `stride` apart.
fn decode_indexed(
    bytes: &[u8],
    indexer: Indexer,
    offset: usize,
    stride: usize,
    count: usize,
) -> Result<NumericArray> {
    with_element_type!(
        indexer.element_type(),
        S => Ok(S::wrap(
            (0..count)
                .map(|k| S::read_le(&bytes[indexer.byte_offset(offset + k * stride)..]))
                .collect(),
        )),
        other => Err(BufferError::UnsupportedDType(other))
    )
}

fn encode_indexed(bytes: &mut [u8], indexer: Indexer, values: &NumericArray) -> Result<()> {
    let converted = values.cast(indexer.element_type())?;
    with_element_type!(
        indexer.element_type(),
        S => {
            let values = S::unwrap(&converted).ok_or(BufferError::TypeMismatch {
                expected: indexer.element_type(),
                got: converted.element_type(),
            })?;
            for (i, v) in values.iter().enumerate() {
                v.write_le(&mut bytes[indexer.byte_offset(i)..]);
            }
            Ok(())
        },
        other => Err(BufferError::UnsupportedDType(other))
    )
}

impl DataBuffer {
    /// Allocate `length` elements of `element_type` on the heap.
    ///
    /// Heap memory is always handed out zeroed; `initialize` only matters for
    /// workspace allocations, see [`allocate_in`](Self::allocate_in).
    ///
    /// # Errors
    /// `InvalidLength` for a zero length, `UnsupportedDType` for types without
    /// a fixed width, `AllocationFailed` if the byte size overflows or the
    /// allocator refuses.
    pub fn allocate(element_type: ElementType, length: usize, initialize: bool) -> Result<Self> {
        let indexer = check_fixed(element_type)?;
        check_length(length)?;
        let bytes = checked_byte_len(element_type, length)?;
        let region = Region::heap(bytes)?;
        debug!(%element_type, length, bytes, initialize, "heap buffer allocated");
        Ok(Self {
            region,
            indexer,
            length,
        })
    }

    /// Allocate on the heap and record the block in `tracker` until the
    /// buffer, and every view of it, is gone.
    pub fn allocate_tracked(
        element_type: ElementType,
        length: usize,
        tracker: &Arc<MemoryTracker>,
    ) -> Result<Self> {
        let indexer = check_fixed(element_type)?;
        check_length(length)?;
        let bytes = checked_byte_len(element_type, length)?;
        let region = Region::heap_tracked(bytes, Some(tracker))?;
        debug!(%element_type, length, bytes, "tracked heap buffer allocated");
        Ok(Self {
            region,
            indexer,
            length,
        })
    }

    /// Allocate `length` elements inside `workspace`.
    ///
    /// The buffer does not own its memory; the workspace's reset or teardown
    /// ends its life. With `initialize == false` the contents are whatever the
    /// arena held before.
    pub fn allocate_in(
        workspace: &Workspace,
        element_type: ElementType,
        length: usize,
        initialize: bool,
    ) -> Result<Self> {
        let indexer = check_fixed(element_type)?;
        check_length(length)?;
        let bytes = checked_byte_len(element_type, length)?;
        let region = Region::in_workspace(workspace, bytes, initialize)?;
        debug!(%element_type, length, bytes, initialize, "workspace buffer allocated");
        Ok(Self {
            region,
            indexer,
            length,
        })
    }

    /// A non-owning buffer over `length` elements of `source`'s memory,
    /// starting `byte_offset` bytes in and addressed through `indexer`.
    ///
    /// The indexer's element type becomes the view's element type, so a view
    /// can re-type memory as long as `byte_offset` is a multiple of its width.
    ///
    /// # Errors
    /// `InvalidLength`, `Misaligned`, or `ViewOutOfBounds` when the requested
    /// span does not fit inside `source`.
    pub fn view(
        source: &DataBuffer,
        byte_offset: usize,
        indexer: Indexer,
        length: usize,
    ) -> Result<Self> {
        check_length(length)?;
        let width = indexer.width();
        if byte_offset % width != 0 {
            return Err(BufferError::Misaligned {
                offset: byte_offset,
                width,
            });
        }
        let span = indexer
            .span_bytes(length)
            .ok_or(BufferError::ViewOutOfBounds {
                offset: byte_offset,
                len: usize::MAX,
                capacity: source.region.len(),
            })?;
        let region = source.region.view(byte_offset, span)?;
        trace!(byte_offset, length, element_type = %indexer.element_type(), "buffer view");
        Ok(Self {
            region,
            indexer,
            length,
        })
    }

    /// A view over elements `[offset, offset + length)` of this buffer,
    /// keeping its element type and stride.
    pub fn subview(&self, offset: usize, length: usize) -> Result<Self> {
        if offset.checked_add(length).map_or(true, |end| end > self.length) {
            return Err(BufferError::RangeOutOfBounds {
                offset,
                stride: 1,
                count: length,
                len: self.length,
            });
        }
        Self::view(self, self.indexer.byte_offset(offset), self.indexer, length)
    }

    /// Build a buffer of `target` from a host array, converting element-wise.
    ///
    /// `copy == false` asks to adopt the array's memory. That is only possible
    /// when the array already has the target's type and byte layout (a
    /// `UInt8` array into a `UInt8` buffer); every other combination copies.
    pub fn from_array(target: ElementType, array: NumericArray, copy: bool) -> Result<Self> {
        let indexer = check_fixed(target).map_err(|_| BufferError::UnsupportedConversion {
            from: array.element_type(),
            to: target,
        })?;
        check_length(array.len())?;
        let length = array.len();
        let region = match array {
            NumericArray::UInt8(bytes) if !copy && target == ElementType::UInt8 => {
                Region::from_vec(bytes)
            }
            array if array.element_type() == target => Region::copy_of(&array.to_le_bytes())?,
            array => Region::copy_of(&array.cast(target)?.to_le_bytes())?,
        };
        debug!(element_type = %target, length, copy, "buffer built from array");
        Ok(Self {
            region,
            indexer,
            length,
        })
    }

    /// Build a buffer of `target` inside `workspace` from a host array.
    pub fn from_array_in(
        workspace: &Workspace,
        target: ElementType,
        array: &NumericArray,
    ) -> Result<Self> {
        let buffer = Self::allocate_in(workspace, target, array.len(), false)?;
        buffer.assign(array)?;
        Ok(buffer)
    }

    /// Rebuild a buffer from its little-endian byte image.
    ///
    /// # Errors
    /// `InvalidArgument` if `bytes` is not exactly `length` elements wide.
    pub fn from_le_bytes(element_type: ElementType, length: usize, bytes: Vec<u8>) -> Result<Self> {
        let indexer = check_fixed(element_type)?;
        check_length(length)?;
        let expected = checked_byte_len(element_type, length)?;
        if bytes.len() != expected {
            return Err(BufferError::InvalidArgument(format!(
                "{} {} elements need {} bytes, got {}",
                length,
                element_type,
                expected,
                bytes.len()
            )));
        }
        Ok(Self {
            region: Region::from_vec(bytes),
            indexer,
            length,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn indexer(&self) -> Indexer {
        self.indexer
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.length {
            return Err(BufferError::IndexOutOfRange {
                index,
                len: self.length,
            });
        }
        Ok(())
    }

    /// Read element `index`, converted to `T`.
    pub fn get<T: Element>(&self, index: usize) -> Result<T> {
        self.check_index(index)?;
        let offset = self.indexer.byte_offset(index);
        self.region.read(|bytes| {
            with_element_type!(
                self.indexer.element_type(),
                S => Ok(S::read_le(&bytes[offset..]).cast::<T>()),
                other => Err(BufferError::UnsupportedDType(other))
            )
        })?
    }

    /// Write `value` into element `index`, converted to the stored type.
    pub fn set<T: Element>(&self, index: usize, value: T) -> Result<()> {
        self.check_index(index)?;
        let offset = self.indexer.byte_offset(index);
        self.region.write(|bytes| {
            with_element_type!(
                self.indexer.element_type(),
                S => {
                    value.cast::<S>().write_le(&mut bytes[offset..]);
                    Ok(())
                },
                other => Err(BufferError::UnsupportedDType(other))
            )
        })?
    }

    /// Element `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        self.get::<f64>(index)
    }

    pub fn set_f64(&self, index: usize, value: f64) -> Result<()> {
        self.set(index, value)
    }

    pub fn get_i64(&self, index: usize) -> Result<i64> {
        self.get::<i64>(index)
    }

    pub fn set_i64(&self, index: usize, value: i64) -> Result<()> {
        self.set(index, value)
    }

    /// Read `count` elements starting at `offset`, `stride` elements apart,
    /// in the stored type.
    ///
    /// # Errors
    /// `RangeOutOfBounds` when `offset + stride * count` exceeds the length.
    pub fn get_range(&self, offset: usize, stride: usize, count: usize) -> Result<NumericArray> {
        let out_of_bounds = || BufferError::RangeOutOfBounds {
            offset,
            stride,
            count,
            len: self.length,
        };
        if stride == 0 {
            return Err(out_of_bounds());
        }
        let end = stride
            .checked_mul(count)
            .and_then(|n| n.checked_add(offset))
            .ok_or_else(out_of_bounds)?;
        if end > self.length {
            return Err(out_of_bounds());
        }
        let indexer = self.indexer;
        self.region
            .read(|bytes| decode_indexed(bytes, indexer, offset, stride, count))?
    }

    /// Overwrite every element from `values`, converting to the stored type.
    ///
    /// # Errors
    /// `InvalidArgument` if `values` has a different length.
    pub fn assign(&self, values: &NumericArray) -> Result<()> {
        if values.len() != self.length {
            return Err(BufferError::InvalidArgument(format!(
                "cannot assign {} values to a buffer of length {}",
                values.len(),
                self.length
            )));
        }
        let indexer = self.indexer;
        self.region
            .write(|bytes| encode_indexed(bytes, indexer, values))?
    }

    /// All elements in the stored type.
    pub fn materialize(&self) -> Result<NumericArray> {
        let (indexer, length) = (self.indexer, self.length);
        self.region
            .read(|bytes| decode_indexed(bytes, indexer, 0, 1, length))?
    }

    pub fn as_f32(&self) -> Result<Vec<f32>> {
        Ok(self.materialize()?.to_vec())
    }

    pub fn as_f64(&self) -> Result<Vec<f64>> {
        Ok(self.materialize()?.to_vec())
    }

    pub fn as_i32(&self) -> Result<Vec<i32>> {
        Ok(self.materialize()?.to_vec())
    }

    pub fn as_i64(&self) -> Result<Vec<i64>> {
        Ok(self.materialize()?.to_vec())
    }
}

impl TypedBuffer for DataBuffer {
    fn element_type(&self) -> ElementType {
        self.indexer.element_type()
    }

    fn len(&self) -> usize {
        self.length
    }

    fn owns_memory(&self) -> bool {
        self.region.owns_memory()
    }

    fn is_attached(&self) -> bool {
        self.region.is_attached()
    }

    fn as_type(&self, target: ElementType) -> Result<NumericArray> {
        let native = self.materialize()?;
        if native.element_type() == target {
            return Ok(native);
        }
        native.cast(target)
    }

    fn to_le_bytes(&self) -> Result<Vec<u8>> {
        if self.indexer.is_contiguous() {
            return self.region.to_vec();
        }
        Ok(self.materialize()?.to_le_bytes())
    }

    /// Deep copy into fresh, densely packed heap memory.
    fn duplicate(&self) -> Result<Self> {
        let bytes = self.to_le_bytes()?;
        Ok(Self {
            region: Region::copy_of(&bytes)?,
            indexer: Indexer::contiguous(self.element_type())?,
            length: self.length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_allocate_length_and_width() {
        for dtype in ElementType::NUMERIC {
            let b = DataBuffer::allocate(dtype, 5, true).unwrap();
            assert_eq!(b.len(), 5);
            assert_eq!(b.element_size(), dtype.size_in_bytes());
            assert_eq!(b.region().len(), 5 * dtype.size_in_bytes());
            assert!(b.owns_memory());
        }
    }

    #[test]
    fn test_allocate_rejects_zero_and_utf8() {
        assert!(matches!(
            DataBuffer::allocate(ElementType::Float, 0, true),
            Err(BufferError::InvalidLength(0))
        ));
        assert!(matches!(
            DataBuffer::allocate(ElementType::Utf8, 3, true),
            Err(BufferError::UnsupportedDType(ElementType::Utf8))
        ));
    }

    #[test]
    fn test_allocate_overflow() {
        assert!(matches!(
            DataBuffer::allocate(ElementType::Double, usize::MAX / 2, false),
            Err(BufferError::AllocationFailed { .. })
        ));
    }

    #[test]
    fn test_get_set_bounds() {
        let b = DataBuffer::allocate(ElementType::Int32, 3, true).unwrap();
        b.set_i64(2, 7).unwrap();
        assert_eq!(b.get_i64(2).unwrap(), 7);
        assert!(matches!(
            b.get_i64(3),
            Err(BufferError::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert!(b.set_f64(10, 1.0).is_err());
    }

    #[test]
    fn test_from_array_narrows_to_short() {
        let b = DataBuffer::from_array(
            ElementType::Int16,
            NumericArray::Double(vec![1.0, 2.5, -3.7]),
            true,
        )
        .unwrap();
        assert_eq!(b.as_f64().unwrap(), vec![1.0, 2.0, -3.0]);
    }

    #[test]
    fn test_from_array_half_rounds() {
        let b = DataBuffer::from_array(ElementType::Half, NumericArray::Float(vec![0.1, 1.5]), true)
            .unwrap();
        let back = b.as_f64().unwrap();
        assert_relative_eq!(back[0], 0.1, epsilon = 1e-3);
        assert_eq!(back[1], 1.5);
    }

    #[test]
    fn test_from_array_adopts_bytes() {
        let b = DataBuffer::from_array(ElementType::UInt8, NumericArray::UInt8(vec![1, 2, 3]), false)
            .unwrap();
        assert_eq!(b.to_le_bytes().unwrap(), vec![1, 2, 3]);
        let converted =
            DataBuffer::from_array(ElementType::Int32, NumericArray::UInt8(vec![1, 2]), false)
                .unwrap();
        assert_eq!(converted.as_i32().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_from_array_empty_rejected() {
        assert!(DataBuffer::from_array(ElementType::Float, NumericArray::Float(vec![]), true).is_err());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let b = DataBuffer::from_array(ElementType::Float, NumericArray::Float(vec![1.0, 2.0]), true)
            .unwrap();
        let d = b.duplicate().unwrap();
        assert_eq!(d.element_type(), ElementType::Float);
        assert_eq!(d.len(), 2);
        assert_eq!(d.as_f32().unwrap(), vec![1.0, 2.0]);
        d.set_f64(0, 9.0).unwrap();
        assert_eq!(b.as_f32().unwrap(), vec![1.0, 2.0]);
        assert!(!d.region().shares_memory_with(b.region()));
    }

    #[test]
    fn test_view_shares_and_never_owns() {
        let b = DataBuffer::from_array(
            ElementType::Int32,
            NumericArray::Int32(vec![10, 20, 30, 40]),
            true,
        )
        .unwrap();
        let v = b.subview(1, 2).unwrap();
        assert!(!v.owns_memory());
        assert_eq!(v.as_i32().unwrap(), vec![20, 30]);
        v.set_i64(0, 99).unwrap();
        assert_eq!(b.get_i64(1).unwrap(), 99);
        drop(v);
        assert_eq!(b.as_i32().unwrap(), vec![10, 99, 30, 40]);
    }

    #[test]
    fn test_view_bounds_and_alignment() {
        let b = DataBuffer::allocate(ElementType::Int32, 4, true).unwrap();
        let ix = Indexer::contiguous(ElementType::Int32).unwrap();
        assert!(matches!(
            DataBuffer::view(&b, 8, ix, 3),
            Err(BufferError::ViewOutOfBounds { .. })
        ));
        assert!(matches!(
            DataBuffer::view(&b, 2, ix, 1),
            Err(BufferError::Misaligned { offset: 2, width: 4 })
        ));
        assert!(b.subview(3, 2).is_err());
    }

    #[test]
    fn test_retyping_view() {
        let b = DataBuffer::from_array(ElementType::Int32, NumericArray::Int32(vec![0x0001_0002]), true)
            .unwrap();
        let ix = Indexer::contiguous(ElementType::Int16).unwrap();
        let v = DataBuffer::view(&b, 0, ix, 2).unwrap();
        assert_eq!(v.element_type(), ElementType::Int16);
        assert_eq!(v.as_i32().unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_strided_view_duplicate_is_dense() {
        let b = DataBuffer::from_array(
            ElementType::Float,
            NumericArray::Float(vec![0.0, 1.0, 2.0, 3.0, 4.0]),
            true,
        )
        .unwrap();
        let ix = Indexer::strided(ElementType::Float, 2).unwrap();
        let v = DataBuffer::view(&b, 0, ix, 3).unwrap();
        assert_eq!(v.as_f32().unwrap(), vec![0.0, 2.0, 4.0]);
        let d = v.duplicate().unwrap();
        assert!(d.indexer().is_contiguous());
        assert_eq!(d.to_le_bytes().unwrap().len(), 12);
        assert!(d.owns_memory());
    }

    #[test]
    fn test_view_outliving_source() {
        let b = DataBuffer::allocate(ElementType::Int8, 4, true).unwrap();
        let v = b.subview(0, 4).unwrap();
        drop(b);
        assert!(matches!(v.as_i32(), Err(BufferError::SourceReleased)));
    }

    #[test]
    fn test_get_range() {
        let b = DataBuffer::from_array(
            ElementType::Int64,
            NumericArray::Int64(vec![0, 1, 2, 3, 4, 5]),
            true,
        )
        .unwrap();
        assert_eq!(b.get_range(1, 2, 2).unwrap(), NumericArray::Int64(vec![1, 3]));
        assert_eq!(b.get_range(0, 3, 2).unwrap(), NumericArray::Int64(vec![0, 3]));
        assert!(matches!(
            b.get_range(2, 2, 3),
            Err(BufferError::RangeOutOfBounds { .. })
        ));
        assert!(b.get_range(0, 0, 1).is_err());
    }

    #[test]
    fn test_as_type_converts() {
        let b = DataBuffer::from_array(ElementType::Float, NumericArray::Float(vec![1.9, -1.9]), true)
            .unwrap();
        assert_eq!(b.as_type(ElementType::Int8).unwrap(), NumericArray::Int8(vec![1, -1]));
        assert!(matches!(
            b.as_type(ElementType::Utf8),
            Err(BufferError::UnsupportedConversion { .. })
        ));
    }

    #[test]
    fn test_assign_length_checked() {
        let b = DataBuffer::allocate(ElementType::UInt16, 2, true).unwrap();
        b.assign(&NumericArray::Double(vec![3.0, 4.0])).unwrap();
        assert_eq!(b.as_i32().unwrap(), vec![3, 4]);
        assert!(b.assign(&NumericArray::Double(vec![1.0])).is_err());
    }

    #[test]
    fn test_workspace_buffer_lifecycle() {
        let ws = Workspace::new(WorkspaceConfig::new(4096)).unwrap();
        let b = DataBuffer::from_array_in(&ws, ElementType::Double, &NumericArray::Int32(vec![1, 2]))
            .unwrap();
        assert!(b.is_attached());
        assert!(!b.owns_memory());
        assert_eq!(b.as_f64().unwrap(), vec![1.0, 2.0]);
        let handle = b.region().workspace_handle().unwrap();
        assert_eq!(handle.len(), 16);
        assert!(ws.is_live(&handle));

        let d = b.duplicate().unwrap();
        ws.reset();
        assert!(matches!(b.as_f64(), Err(BufferError::StaleHandle { .. })));
        assert_eq!(d.as_f64().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_tracked_buffer_released_with_last_owner() {
        use crate::tracker::MemoryKind;
        let tracker = Arc::new(MemoryTracker::new());
        let b = DataBuffer::allocate_tracked(ElementType::Float, 4, &tracker).unwrap();
        let v = b.subview(0, 2).unwrap();
        assert_eq!(tracker.live_bytes(MemoryKind::Host), 16);
        drop(v);
        assert!(tracker.summarize().is_err());
        drop(b);
        assert!(tracker.summarize().is_ok());
    }

    #[test]
    fn test_from_le_bytes_checks_size() {
        let b = DataBuffer::from_le_bytes(ElementType::Int16, 2, vec![1, 0, 2, 0]).unwrap();
        assert_eq!(b.as_i32().unwrap(), vec![1, 2]);
        assert!(DataBuffer::from_le_bytes(ElementType::Int16, 3, vec![1, 0]).is_err());
    }
}

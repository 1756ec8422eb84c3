use crate::dtype::ElementType;
use crate::error::{BufferError, Result};

/// Maps a logical element index to a byte offset inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indexer {
    element_type: ElementType,
    stride: usize,
}

impl Indexer {
    /// Dense indexing: element `i` starts at byte `i * width`.
    ///
    /// # Errors
    /// Returns `UnsupportedDType` for types without a fixed width.
    pub fn contiguous(element_type: ElementType) -> Result<Self> {
        Self::strided(element_type, 1)
    }

    /// Element `i` starts at byte `i * stride * width`.
    pub fn strided(element_type: ElementType, stride: usize) -> Result<Self> {
        if !element_type.is_fixed_width() {
            return Err(BufferError::UnsupportedDType(element_type));
        }
        if stride == 0 {
            return Err(BufferError::InvalidArgument(
                "indexer stride must be positive".to_string(),
            ));
        }
        Ok(Self {
            element_type,
            stride,
        })
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Element width in bytes.
    pub fn width(&self) -> usize {
        self.element_type.size_in_bytes()
    }

    /// Distance between consecutive logical elements, in elements.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == 1
    }

    /// Byte offset of logical element `index`, which must lie inside a
    /// buffer already validated against this indexer.
    pub fn byte_offset(&self, index: usize) -> usize {
        index * self.stride * self.width()
    }

    /// Byte offset of an arbitrary logical index, or `None` on overflow.
    pub fn checked_byte_offset(&self, index: usize) -> Option<usize> {
        index.checked_mul(self.stride)?.checked_mul(self.width())
    }

    /// Bytes spanned by `length` logical elements, or `None` on overflow.
    pub fn span_bytes(&self, length: usize) -> Option<usize> {
        if length == 0 {
            return Some(0);
        }
        (length - 1)
            .checked_mul(self.stride)?
            .checked_mul(self.width())?
            .checked_add(self.width())
    }
}

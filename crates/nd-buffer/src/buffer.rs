use std::fmt;

use crate::array::NumericArray;
use crate::data::DataBuffer;
use crate::dtype::ElementType;
use crate::error::{BufferError, Result};
use crate::utf8::Utf8Buffer;
use crate::workspace::Workspace;

/// Common contract of every buffer: a homogeneous memory region with a fixed
/// element type and a length.
pub trait TypedBuffer: Send + Sync + fmt::Debug {
    fn element_type(&self) -> ElementType;

    /// Bytes per stored unit.
    fn element_size(&self) -> usize {
        self.element_type().size_in_bytes()
    }

    /// Element count; the word count for string buffers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether dropping this buffer releases its memory.
    fn owns_memory(&self) -> bool;

    /// Whether the memory belongs to a workspace arena.
    fn is_attached(&self) -> bool;

    /// Materialize every element as `target`.
    fn as_type(&self, target: ElementType) -> Result<NumericArray>;

    /// The buffer's byte image: little-endian at the native width, densely
    /// packed. For string buffers this is the header followed by the payload.
    fn to_le_bytes(&self) -> Result<Vec<u8>>;

    /// Deep copy into independent, owning memory.
    fn duplicate(&self) -> Result<Self>
    where
        Self: Sized;
}

/// A buffer of any element type.
#[derive(Debug)]
pub enum Buffer {
    Numeric(DataBuffer),
    Utf8(Utf8Buffer),
}

impl Buffer {
    /// Allocate `length` elements of `element_type` on the heap.
    ///
    /// For `Utf8`, `length` is the word count and every word starts empty.
    pub fn allocate(element_type: ElementType, length: usize, initialize: bool) -> Result<Self> {
        match element_type {
            ElementType::Utf8 => Ok(Buffer::Utf8(Utf8Buffer::with_words(length)?)),
            ElementType::Compressed | ElementType::Unknown => {
                Err(BufferError::UnsupportedDType(element_type))
            }
            _ => Ok(Buffer::Numeric(DataBuffer::allocate(
                element_type,
                length,
                initialize,
            )?)),
        }
    }

    /// Allocate inside `workspace`; see [`DataBuffer::allocate_in`].
    pub fn allocate_in(
        workspace: &Workspace,
        element_type: ElementType,
        length: usize,
        initialize: bool,
    ) -> Result<Self> {
        match element_type {
            ElementType::Utf8 => Ok(Buffer::Utf8(Utf8Buffer::with_words_in(workspace, length)?)),
            ElementType::Compressed | ElementType::Unknown => {
                Err(BufferError::UnsupportedDType(element_type))
            }
            _ => Ok(Buffer::Numeric(DataBuffer::allocate_in(
                workspace,
                element_type,
                length,
                initialize,
            )?)),
        }
    }

    pub fn as_numeric(&self) -> Option<&DataBuffer> {
        match self {
            Buffer::Numeric(b) => Some(b),
            Buffer::Utf8(_) => None,
        }
    }

    pub fn as_utf8(&self) -> Option<&Utf8Buffer> {
        match self {
            Buffer::Utf8(b) => Some(b),
            Buffer::Numeric(_) => None,
        }
    }
}

impl From<DataBuffer> for Buffer {
    fn from(buffer: DataBuffer) -> Self {
        Buffer::Numeric(buffer)
    }
}

impl From<Utf8Buffer> for Buffer {
    fn from(buffer: Utf8Buffer) -> Self {
        Buffer::Utf8(buffer)
    }
}

macro_rules! delegate {
    ($self:expr, $b:ident => $body:expr) => {
        match $self {
            Buffer::Numeric($b) => $body,
            Buffer::Utf8($b) => $body,
        }
    };
}

impl TypedBuffer for Buffer {
    fn element_type(&self) -> ElementType {
        delegate!(self, b => b.element_type())
    }

    fn element_size(&self) -> usize {
        delegate!(self, b => b.element_size())
    }

    fn len(&self) -> usize {
        delegate!(self, b => b.len())
    }

    fn owns_memory(&self) -> bool {
        delegate!(self, b => b.owns_memory())
    }

    fn is_attached(&self) -> bool {
        delegate!(self, b => b.is_attached())
    }

    fn as_type(&self, target: ElementType) -> Result<NumericArray> {
        delegate!(self, b => b.as_type(target))
    }

    fn to_le_bytes(&self) -> Result<Vec<u8>> {
        delegate!(self, b => b.to_le_bytes())
    }

    fn duplicate(&self) -> Result<Self> {
        Ok(match self {
            Buffer::Numeric(b) => Buffer::Numeric(b.duplicate()?),
            Buffer::Utf8(b) => Buffer::Utf8(b.duplicate()?),
        })
    }
}

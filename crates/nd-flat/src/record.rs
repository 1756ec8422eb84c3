use std::io::{Read, Write};

use tracing::debug;

use nd_buffer::utf8::OFFSET_WIDTH;
use nd_buffer::{Buffer, BufferError, DataBuffer, ElementType, TypedBuffer, Utf8Buffer};

use crate::error::{FlatError, Result};

/// The four-byte magic opening every record: ASCII "NDBF".
pub const RECORD_MAGIC: [u8; 4] = *b"NDBF";

/// Current record layout version.
pub const RECORD_VERSION: u32 = 1;

/// Bytes before the payload: magic, version, tag, length, byte count.
pub const RECORD_HEADER_LEN: usize = 4 + 4 + 1 + 8 + 8;

/// The persisted form of a buffer: element type, length and byte image.
///
/// For numeric types `bytes` is the little-endian elements at native width.
/// For `Utf8`, `length` is the word count and `bytes` is header plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferRecord {
    pub element_type: ElementType,
    pub length: u64,
    pub bytes: Vec<u8>,
}

/// Check a payload size against the record's type and length.
fn check_size(element_type: ElementType, length: u64, got: u64) -> Result<()> {
    if element_type == ElementType::Utf8 {
        let header = length
            .saturating_add(1)
            .saturating_mul(OFFSET_WIDTH as u64);
        if got < header {
            return Err(FlatError::LengthMismatch {
                expected: header,
                got,
            });
        }
        return Ok(());
    }
    let expected = length
        .checked_mul(element_type.size_in_bytes() as u64)
        .ok_or(BufferError::TooLarge { len: length })?;
    if expected != got {
        return Err(FlatError::LengthMismatch { expected, got });
    }
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

impl BufferRecord {
    /// Extract the record of any buffer. Device buffers are pulled first.
    pub fn from_buffer<B: TypedBuffer + ?Sized>(buffer: &B) -> Result<Self> {
        Ok(Self {
            element_type: buffer.element_type(),
            length: buffer.len() as u64,
            bytes: buffer.to_le_bytes()?,
        })
    }

    /// Rebuild an owning heap buffer equivalent to the one recorded.
    pub fn into_buffer(self) -> Result<Buffer> {
        check_size(self.element_type, self.length, self.bytes.len() as u64)?;
        let length = usize::try_from(self.length)
            .map_err(|_| BufferError::TooLarge { len: self.length })?;
        match self.element_type {
            ElementType::Utf8 => Ok(Utf8Buffer::from_raw_bytes(self.bytes, length)?.into()),
            dtype => Ok(DataBuffer::from_le_bytes(dtype, length, self.bytes)?.into()),
        }
    }

    /// Write the framed record.
    ///
    /// Layout, all little-endian: magic (4), version u32, type tag u8,
    /// length u64, byte count u64, then the payload.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        let tag = self
            .element_type
            .to_flat_tag()
            .ok_or(BufferError::UnsupportedDType(self.element_type))?;
        writer.write_all(&RECORD_MAGIC)?;
        writer.write_all(&RECORD_VERSION.to_le_bytes())?;
        writer.write_all(&[tag])?;
        writer.write_all(&self.length.to_le_bytes())?;
        writer.write_all(&(self.bytes.len() as u64).to_le_bytes())?;
        writer.write_all(&self.bytes)?;
        debug!(
            element_type = %self.element_type,
            length = self.length,
            bytes = self.bytes.len(),
            "buffer record written"
        );
        Ok(())
    }

    /// Read one framed record, validating the header before the payload
    /// is allocated.
    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != RECORD_MAGIC {
            return Err(FlatError::InvalidMagic(magic));
        }

        let version = read_u32(reader)?;
        if version != RECORD_VERSION {
            return Err(FlatError::UnsupportedVersion(version));
        }

        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        let element_type =
            ElementType::from_flat_tag(tag[0]).ok_or(FlatError::UnknownTypeTag(tag[0]))?;

        let length = read_u64(reader)?;
        let byte_count = read_u64(reader)?;
        check_size(element_type, length, byte_count)?;

        let size = usize::try_from(byte_count)
            .map_err(|_| BufferError::TooLarge { len: byte_count })?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| BufferError::AllocationFailed { bytes: size })?;
        bytes.resize(size, 0);
        reader.read_exact(&mut bytes)?;

        debug!(%element_type, length, bytes = size, "buffer record read");
        Ok(Self {
            element_type,
            length,
            bytes,
        })
    }

    /// Size of the framed record in bytes.
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.bytes.len()
    }
}

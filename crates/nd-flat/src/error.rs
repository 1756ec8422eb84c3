use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid buffer record magic: expected 'NDBF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported buffer record version: {0}")]
    UnsupportedVersion(u32),
    #[error("unknown element type tag: {0}")]
    UnknownTypeTag(u8),
    #[error("payload of {got} bytes does not match {expected} expected for the record")]
    LengthMismatch { expected: u64, got: u64 },
    #[error("buffer error: {0}")]
    Buffer(#[from] nd_buffer::BufferError),
}

pub type Result<T> = std::result::Result<T, FlatError>;

use thiserror::Error;

use crate::dtype::ElementType;

#[derive(Error, Debug)]
pub enum BufferError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid buffer length {0}: length must be positive")]
    InvalidLength(usize),
    #[error("view [{offset}, {offset}+{len}) exceeds source region of {capacity} bytes")]
    ViewOutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("byte offset {offset} is not a multiple of element width {width}")]
    Misaligned { offset: usize, width: usize },
    #[error("element type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: ElementType,
        got: ElementType,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("index {index} out of range for buffer of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("range offset={offset} stride={stride} count={count} exceeds buffer of length {len}")]
    RangeOutOfBounds {
        offset: usize,
        stride: usize,
        count: usize,
        len: usize,
    },
    #[error("cannot convert {from} data to {to}")]
    UnsupportedConversion { from: ElementType, to: ElementType },
    #[error("unsupported element type: {0}")]
    UnsupportedDType(ElementType),
    #[error("allocation of {bytes} bytes failed")]
    AllocationFailed { bytes: usize },
    #[error("workspace capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded { requested: usize, available: usize },
    #[error("device out of memory: requested {requested} bytes, {available} available")]
    DeviceOutOfMemory { requested: usize, available: usize },
    #[error("string decoding failed: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("string of {len} bytes is too large for this platform")]
    TooLarge { len: u64 },
    #[error("corrupt string header: {0}")]
    CorruptHeader(String),
    #[error("source buffer was released while a view still referenced it")]
    SourceReleased,
    #[error("workspace was torn down while a buffer still referenced it")]
    WorkspaceReleased,
    #[error("stale workspace handle: generation {handle_generation}, workspace is at {current}")]
    StaleHandle { handle_generation: u32, current: u32 },
    #[error("double free of allocation {id}")]
    DoubleFree { id: u64 },
    #[error("{count} allocations totalling {bytes} bytes were never released")]
    Leaked { count: usize, bytes: usize },
    #[error("unknown device pointer {0}")]
    UnknownDevicePointer(u64),
}

pub type Result<T> = std::result::Result<T, BufferError>;

//! `nd-buffer` - Typed memory buffers for nd-runtime.
//!
//! This crate provides:
//! - An `ElementType` catalogue and the `Element` conversion table
//! - The `TypedBuffer` contract and a runtime-typed `DataBuffer`
//! - Typed host buffers (`Int16Buffer`, `FloatBuffer`, ...)
//! - Device-mirrored buffers with explicit host/device sync state
//! - A packed variable-length string buffer (`Utf8Buffer`)
//! - Workspace arenas with generation-checked handles
//! - A `MemoryTracker` for leak and double-free accounting

pub mod array;
pub mod buffer;
pub mod config;
pub mod data;
pub mod device;
pub mod dtype;
pub mod element;
pub mod error;
pub mod host;
pub mod indexer;
pub mod region;
pub mod tracker;
pub mod utf8;
pub mod workspace;

// Re-export primary types at the crate root for convenience.
pub use array::NumericArray;
pub use buffer::{Buffer, TypedBuffer};
pub use config::WorkspaceConfig;
pub use data::DataBuffer;
pub use device::{Device, DeviceBuffer, DevicePtr, SimulatedDevice, SyncState};
pub use dtype::ElementType;
pub use element::Element;
pub use error::{BufferError, Result};
pub use host::{
    BFloat16Buffer, BoolBuffer, DoubleBuffer, FloatBuffer, HalfBuffer, HostBuffer, Int16Buffer,
    Int32Buffer, Int64Buffer, Int8Buffer, UInt16Buffer, UInt32Buffer, UInt64Buffer, UInt8Buffer,
};
pub use indexer::Indexer;
pub use region::Region;
pub use tracker::{MemoryKind, MemoryTracker};
pub use utf8::{StringEncoding, Utf8Buffer};
pub use workspace::{Workspace, WorkspaceHandle};

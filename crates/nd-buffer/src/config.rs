//! Workspace configuration parameters.

use crate::error::{BufferError, Result};

/// Configuration for a [`Workspace`](crate::workspace::Workspace) arena.
///
/// Validated when the workspace is created; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Total arena size in bytes. Allocations beyond this fail with
    /// `CapacityExceeded`; the arena never grows.
    pub capacity_bytes: usize,

    /// Alignment of every allocation's start offset, in bytes.
    ///
    /// Must be a non-zero power of two. Default: 64 (one cache line).
    pub alignment: usize,
}

impl WorkspaceConfig {
    /// Default arena size: 16 MiB.
    pub const DEFAULT_CAPACITY_BYTES: usize = 16 * 1024 * 1024;

    /// Default allocation alignment.
    pub const DEFAULT_ALIGNMENT: usize = 64;

    /// Create a config with the given capacity and default alignment.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            alignment: Self::DEFAULT_ALIGNMENT,
        }
    }

    /// Override the allocation alignment.
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity_bytes == 0 {
            return Err(BufferError::InvalidConfig(
                "workspace capacity must be non-zero".to_string(),
            ));
        }
        if !self.alignment.is_power_of_two() {
            return Err(BufferError::InvalidConfig(format!(
                "workspace alignment {} is not a power of two",
                self.alignment
            )));
        }
        Ok(())
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY_BYTES)
    }
}

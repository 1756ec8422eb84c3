//! Scoped arena memory for buffers.
//!
//! A [`Workspace`] is a fixed-size bump arena. Buffers allocated "in" a
//! workspace do not own their bytes: they hold a [`WorkspaceHandle`]
//! (generation + offset + length) and resolve it against the arena on every
//! access. The arena's lifecycle, not the buffer's, decides when memory goes
//! away:
//!
//! - [`Workspace::reset`] bumps the generation. Every outstanding handle then
//!   resolves to `StaleHandle` instead of aliasing the next tenant's bytes.
//! - Dropping the last `Workspace` clone tears the arena down. Outstanding
//!   handles resolve to `WorkspaceReleased`.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::config::WorkspaceConfig;
use crate::error::{BufferError, Result};

/// Location of one allocation inside a workspace arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub struct WorkspaceHandle {
    pub(crate) generation: u32,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl WorkspaceHandle {
    /// Arena generation when this allocation was made.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Byte offset of the allocation inside the arena.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub(crate) struct Arena {
    data: Vec<u8>,
    cursor: usize,
    generation: u32,
    alignment: usize,
}

impl Arena {
    fn check(&self, handle: &WorkspaceHandle) -> Result<()> {
        if handle.generation != self.generation {
            return Err(BufferError::StaleHandle {
                handle_generation: handle.generation,
                current: self.generation,
            });
        }
        Ok(())
    }

    pub(crate) fn slice(&self, handle: &WorkspaceHandle) -> Result<&[u8]> {
        self.check(handle)?;
        Ok(&self.data[handle.offset..handle.offset + handle.len])
    }

    pub(crate) fn slice_mut(&mut self, handle: &WorkspaceHandle) -> Result<&mut [u8]> {
        self.check(handle)?;
        Ok(&mut self.data[handle.offset..handle.offset + handle.len])
    }
}

/// A shareable handle to a bump-allocated arena.
///
/// Cloning a `Workspace` shares the same arena; the arena is torn down when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Workspace {
    arena: Arc<RwLock<Arena>>,
    config: WorkspaceConfig,
}

impl Workspace {
    /// Create a workspace, allocating its whole arena up front.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an invalid config and `AllocationFailed`
    /// if the arena itself cannot be allocated.
    pub fn new(config: WorkspaceConfig) -> Result<Self> {
        config.validate()?;
        let mut data = Vec::new();
        data.try_reserve_exact(config.capacity_bytes)
            .map_err(|_| BufferError::AllocationFailed {
                bytes: config.capacity_bytes,
            })?;
        data.resize(config.capacity_bytes, 0);
        debug!(capacity = config.capacity_bytes, "workspace created");
        Ok(Self {
            arena: Arc::new(RwLock::new(Arena {
                data,
                cursor: 0,
                generation: 0,
                alignment: config.alignment,
            })),
            config,
        })
    }

    /// Bump-allocate `bytes` bytes at the configured alignment.
    ///
    /// With `zeroed` the region is cleared; otherwise it keeps whatever the
    /// previous generation left there.
    ///
    /// # Errors
    /// Returns `CapacityExceeded` when the arena has no room left.
    pub fn allocate(&self, bytes: usize, zeroed: bool) -> Result<WorkspaceHandle> {
        let mut arena = self.arena.write();
        let start = arena
            .cursor
            .checked_next_multiple_of(arena.alignment)
            .ok_or(BufferError::AllocationFailed { bytes })?;
        let end = start
            .checked_add(bytes)
            .ok_or(BufferError::AllocationFailed { bytes })?;
        if end > arena.data.len() {
            return Err(BufferError::CapacityExceeded {
                requested: bytes,
                available: arena.data.len().saturating_sub(start),
            });
        }
        if zeroed {
            arena.data[start..end].fill(0);
        }
        arena.cursor = end;
        debug!(
            offset = start,
            bytes,
            generation = arena.generation,
            "workspace allocation"
        );
        Ok(WorkspaceHandle {
            generation: arena.generation,
            offset: start,
            len: bytes,
        })
    }

    /// Release every allocation at once and start a new generation.
    ///
    /// Buffers still holding handles from the previous generation fail with
    /// `StaleHandle` on their next access.
    pub fn reset(&self) {
        let mut arena = self.arena.write();
        arena.cursor = 0;
        arena.generation = arena.generation.wrapping_add(1);
        debug!(generation = arena.generation, "workspace reset");
    }

    /// Current generation.
    pub fn generation(&self) -> u32 {
        self.arena.read().generation
    }

    /// Bytes handed out in the current generation, including alignment padding.
    pub fn used_bytes(&self) -> usize {
        self.arena.read().cursor
    }

    pub fn capacity_bytes(&self) -> usize {
        self.config.capacity_bytes
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// Returns true if `handle` would still resolve in this workspace.
    pub fn is_live(&self, handle: &WorkspaceHandle) -> bool {
        self.arena.read().check(handle).is_ok()
    }

    pub(crate) fn downgrade(&self) -> Weak<RwLock<Arena>> {
        Arc::downgrade(&self.arena)
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("capacity_bytes", &self.config.capacity_bytes)
            .field("used_bytes", &self.used_bytes())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Workspace {
        Workspace::new(WorkspaceConfig::new(1024).with_alignment(8)).unwrap()
    }

    #[test]
    fn test_allocations_are_aligned_and_sequential() {
        let ws = small();
        let a = ws.allocate(3, true).unwrap();
        let b = ws.allocate(8, true).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 8);
        assert_eq!(ws.used_bytes(), 16);
    }

    #[test]
    fn test_capacity_exceeded() {
        let ws = small();
        ws.allocate(1000, false).unwrap();
        let err = ws.allocate(100, false);
        assert!(matches!(err, Err(BufferError::CapacityExceeded { .. })));
    }

    #[test]
    fn test_reset_invalidates_handles() {
        let ws = small();
        let h = ws.allocate(16, true).unwrap();
        assert!(ws.is_live(&h));
        ws.reset();
        assert!(!ws.is_live(&h));
        assert_eq!(ws.used_bytes(), 0);
        let arena = ws.arena.read();
        assert!(matches!(
            arena.slice(&h),
            Err(BufferError::StaleHandle {
                handle_generation: 0,
                current: 1
            })
        ));
    }

    #[test]
    fn test_uninitialized_allocation_keeps_old_bytes() {
        let ws = small();
        let h = ws.allocate(4, true).unwrap();
        ws.arena.write().slice_mut(&h).unwrap().fill(7);
        ws.reset();
        let h2 = ws.allocate(4, false).unwrap();
        assert_eq!(ws.arena.read().slice(&h2).unwrap(), &[7, 7, 7, 7]);
        ws.reset();
        let h3 = ws.allocate(4, true).unwrap();
        assert_eq!(ws.arena.read().slice(&h3).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Workspace::new(WorkspaceConfig::new(0)).is_err());
    }
}

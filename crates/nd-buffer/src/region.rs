//! Contiguous byte regions: owned heap blocks, non-owning views, and
//! workspace-resident allocations.
//!
//! Every access goes through [`Region::read`] or [`Region::write`], which
//! take the backing block's lock for the duration of the closure. Locks are
//! per block (or per workspace arena), never global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::error::{BufferError, Result};
use crate::tracker::{MemoryKind, MemoryTracker};
use crate::workspace::{Arena, Workspace, WorkspaceHandle};

static NEXT_ALLOCATION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_allocation_id() -> u64 {
    NEXT_ALLOCATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Heap memory with at most one owning [`Region`].
pub(crate) struct HeapBlock {
    bytes: RwLock<Vec<u8>>,
    tracking: Option<(Arc<MemoryTracker>, u64)>,
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        if let Some((tracker, id)) = &self.tracking {
            if let Err(e) = tracker.count_out(*id) {
                warn!(id, error = %e, "host block release failed");
            }
        }
    }
}

#[derive(Clone)]
enum Backing {
    Heap(Arc<HeapBlock>),
    Borrowed(Weak<HeapBlock>),
    Workspace {
        arena: Weak<RwLock<Arena>>,
        handle: WorkspaceHandle,
    },
}

/// A window of `len` bytes starting at `offset` inside some backing memory.
pub struct Region {
    backing: Backing,
    offset: usize,
    len: usize,
}

fn try_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| BufferError::AllocationFailed { bytes: len })?;
    data.resize(len, 0);
    Ok(data)
}

impl Region {
    /// Allocate `len` zeroed bytes on the heap.
    pub(crate) fn heap(len: usize) -> Result<Self> {
        Self::heap_tracked(len, None)
    }

    /// Allocate `len` zeroed bytes on the heap, recording the block in
    /// `tracker` until it is dropped.
    pub(crate) fn heap_tracked(len: usize, tracker: Option<&Arc<MemoryTracker>>) -> Result<Self> {
        let data = try_zeroed(len)?;
        let tracking = tracker.map(|t| {
            let id = next_allocation_id();
            t.count_in(MemoryKind::Host, id, len);
            (Arc::clone(t), id)
        });
        Ok(Self::from_block(HeapBlock {
            bytes: RwLock::new(data),
            tracking,
        }))
    }

    /// Take ownership of existing bytes without copying.
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        Self::from_block(HeapBlock {
            bytes: RwLock::new(data),
            tracking: None,
        })
    }

    fn from_block(block: HeapBlock) -> Self {
        let len = block.bytes.read().len();
        Self {
            backing: Backing::Heap(Arc::new(block)),
            offset: 0,
            len,
        }
    }

    /// Allocate `len` bytes from a workspace arena.
    pub(crate) fn in_workspace(workspace: &Workspace, len: usize, zeroed: bool) -> Result<Self> {
        let handle = workspace.allocate(len, zeroed)?;
        Ok(Self {
            backing: Backing::Workspace {
                arena: workspace.downgrade(),
                handle,
            },
            offset: 0,
            len,
        })
    }

    /// A non-owning window over `[offset, offset + len)` of this region.
    pub(crate) fn view(&self, offset: usize, len: usize) -> Result<Self> {
        let end = offset.checked_add(len);
        if end.map_or(true, |end| end > self.len) {
            return Err(BufferError::ViewOutOfBounds {
                offset,
                len,
                capacity: self.len,
            });
        }
        let backing = match &self.backing {
            Backing::Heap(block) => Backing::Borrowed(Arc::downgrade(block)),
            other => other.clone(),
        };
        trace!(offset, len, "region view");
        Ok(Self {
            backing,
            offset: self.offset + offset,
            len,
        })
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether dropping this region releases its memory.
    pub fn owns_memory(&self) -> bool {
        matches!(self.backing, Backing::Heap(_))
    }

    /// Whether this region lives in a workspace arena.
    pub fn is_attached(&self) -> bool {
        matches!(self.backing, Backing::Workspace { .. })
    }

    /// The workspace handle, for workspace-resident regions.
    pub fn workspace_handle(&self) -> Option<WorkspaceHandle> {
        match &self.backing {
            Backing::Workspace { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Returns true if both regions are windows into the same backing memory.
    ///
    /// Heap regions compare by block. Workspace regions compare by arena
    /// generation and byte range, so separate allocations from one arena do
    /// not share memory.
    pub fn shares_memory_with(&self, other: &Region) -> bool {
        if let (
            Backing::Workspace { arena: a, handle: ha },
            Backing::Workspace { arena: b, handle: hb },
        ) = (&self.backing, &other.backing)
        {
            let start_a = ha.offset + self.offset;
            let start_b = hb.offset + other.offset;
            return a.ptr_eq(b)
                && ha.generation == hb.generation
                && start_a < start_b + other.len
                && start_b < start_a + self.len;
        }
        match (self.block_ptr(), other.block_ptr()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn block_ptr(&self) -> Option<usize> {
        match &self.backing {
            Backing::Heap(block) => Some(Arc::as_ptr(block) as usize),
            Backing::Borrowed(block) => Some(block.as_ptr() as usize),
            Backing::Workspace { .. } => None,
        }
    }

    /// Run `f` over the region's bytes under a shared lock.
    ///
    /// # Errors
    /// Fails if the backing memory is gone: `SourceReleased` for a view whose
    /// owner was dropped, `WorkspaceReleased`/`StaleHandle` for workspace
    /// memory that was torn down or reset.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let range = self.offset..self.offset + self.len;
        match &self.backing {
            Backing::Heap(block) => Ok(f(&block.bytes.read()[range])),
            Backing::Borrowed(weak) => {
                let block = weak.upgrade().ok_or(BufferError::SourceReleased)?;
                let bytes = block.bytes.read();
                Ok(f(&bytes[range]))
            }
            Backing::Workspace { arena, handle } => {
                let arena = arena.upgrade().ok_or(BufferError::WorkspaceReleased)?;
                let guard = arena.read();
                let slice = guard.slice(handle)?;
                Ok(f(&slice[range]))
            }
        }
    }

    /// Run `f` over the region's bytes under an exclusive lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let range = self.offset..self.offset + self.len;
        match &self.backing {
            Backing::Heap(block) => Ok(f(&mut block.bytes.write()[range])),
            Backing::Borrowed(weak) => {
                let block = weak.upgrade().ok_or(BufferError::SourceReleased)?;
                let mut bytes = block.bytes.write();
                Ok(f(&mut bytes[range]))
            }
            Backing::Workspace { arena, handle } => {
                let arena = arena.upgrade().ok_or(BufferError::WorkspaceReleased)?;
                let mut guard = arena.write();
                let slice = guard.slice_mut(handle)?;
                Ok(f(&mut slice[range]))
            }
        }
    }

    /// Copy the region's bytes out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.read(|bytes| bytes.to_vec())
    }

    /// Copy `data` into a fresh owning heap region.
    pub(crate) fn copy_of(data: &[u8]) -> Result<Self> {
        let mut copy = Vec::new();
        copy.try_reserve_exact(data.len())
            .map_err(|_| BufferError::AllocationFailed { bytes: data.len() })?;
        copy.extend_from_slice(data);
        Ok(Self::from_vec(copy))
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backing {
            Backing::Heap(_) => "heap",
            Backing::Borrowed(_) => "view",
            Backing::Workspace { .. } => "workspace",
        };
        f.debug_struct("Region")
            .field("kind", &kind)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

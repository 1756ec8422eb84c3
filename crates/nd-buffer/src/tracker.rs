//! Allocation accounting with double-free and leak detection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{BufferError, Result};

/// Which memory space an allocation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Host,
    Device,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Host => write!(f, "HOST"),
            MemoryKind::Device => write!(f, "DEVICE"),
        }
    }
}

/// One live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationEntry {
    pub kind: MemoryKind,
    pub id: u64,
    pub bytes: usize,
}

/// How many released ids are remembered for double-free detection.
pub const DEFAULT_RELEASE_HISTORY: usize = 4096;

#[derive(Default)]
struct TrackerState {
    live: HashMap<u64, AllocationEntry>,
    released: HashSet<u64>,
    release_order: VecDeque<u64>,
}

/// Records allocations as they are made and released.
///
/// Only the most recent releases are remembered, so a double free of an
/// allocation released long ago goes unreported.
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
    release_history: usize,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::with_release_history(DEFAULT_RELEASE_HISTORY)
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracker remembering the last `releases` released ids.
    pub fn with_release_history(releases: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            release_history: releases,
        }
    }

    /// Record a new allocation.
    pub fn count_in(&self, kind: MemoryKind, id: u64, bytes: usize) {
        let mut state = self.state.lock();
        if state.released.remove(&id) {
            state.release_order.retain(|&released| released != id);
        }
        state.live.insert(id, AllocationEntry { kind, id, bytes });
    }

    /// Record a release.
    ///
    /// # Errors
    /// Returns `DoubleFree` if `id` was already released.
    pub fn count_out(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.released.contains(&id) {
            return Err(BufferError::DoubleFree { id });
        }
        if state.live.remove(&id).is_some() && self.release_history > 0 {
            if state.release_order.len() == self.release_history {
                if let Some(oldest) = state.release_order.pop_front() {
                    state.released.remove(&oldest);
                }
            }
            state.released.insert(id);
            state.release_order.push_back(id);
        }
        Ok(())
    }

    /// Allocations that have not been released, ordered by id.
    pub fn live(&self) -> Vec<AllocationEntry> {
        let state = self.state.lock();
        let mut entries: Vec<_> = state.live.values().copied().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Live bytes of one memory kind.
    pub fn live_bytes(&self, kind: MemoryKind) -> usize {
        self.state
            .lock()
            .live
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.bytes)
            .sum()
    }

    /// Report outstanding allocations.
    ///
    /// # Errors
    /// Returns `Leaked` if anything is still live.
    pub fn summarize(&self) -> Result<()> {
        let live = self.live();
        if live.is_empty() {
            return Ok(());
        }
        for entry in &live {
            warn!(id = entry.id, bytes = entry.bytes, kind = %entry.kind, "leaked allocation");
        }
        Err(BufferError::Leaked {
            count: live.len(),
            bytes: live.iter().map(|e| e.bytes).sum(),
        })
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.live.clear();
        state.released.clear();
        state.release_order.clear();
    }
}

impl fmt::Debug for MemoryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryTracker")
            .field("live", &state.live.len())
            .field("released", &state.released.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_in_and_out() {
        let t = MemoryTracker::new();
        t.count_in(MemoryKind::Device, 1, 64);
        t.count_in(MemoryKind::Host, 2, 16);
        assert_eq!(t.live_bytes(MemoryKind::Device), 64);
        assert_eq!(t.live_bytes(MemoryKind::Host), 16);
        t.count_out(1).unwrap();
        assert_eq!(t.live_bytes(MemoryKind::Device), 0);
        assert_eq!(t.live().len(), 1);
    }

    #[test]
    fn test_double_free_detected() {
        let t = MemoryTracker::new();
        t.count_in(MemoryKind::Device, 7, 8);
        t.count_out(7).unwrap();
        assert!(matches!(t.count_out(7), Err(BufferError::DoubleFree { id: 7 })));
    }

    #[test]
    fn test_summarize_reports_leaks() {
        let t = MemoryTracker::new();
        assert!(t.summarize().is_ok());
        t.count_in(MemoryKind::Host, 1, 10);
        t.count_in(MemoryKind::Device, 2, 20);
        assert!(matches!(
            t.summarize(),
            Err(BufferError::Leaked { count: 2, bytes: 30 })
        ));
        t.reset();
        assert!(t.summarize().is_ok());
    }

    #[test]
    fn test_release_history_is_bounded() {
        let t = MemoryTracker::with_release_history(2);
        for id in 1..=3 {
            t.count_in(MemoryKind::Host, id, 4);
            t.count_out(id).unwrap();
        }
        assert!(t.count_out(1).is_ok());
        assert!(matches!(t.count_out(2), Err(BufferError::DoubleFree { id: 2 })));
        assert!(matches!(t.count_out(3), Err(BufferError::DoubleFree { id: 3 })));
        assert_eq!(format!("{t:?}"), "MemoryTracker { live: 0, released: 2 }");
    }
}

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{error, trace};

use crate::stats::RingStats;

/// A buffer's device-visible physical address, the key hardware hands back
/// on receive completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysAddr(pub u64);

impl std::fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#012x}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum RingError {
    /// The ring already holds `capacity` posted buffers.
    #[error("ring full, {capacity} buffers posted")]
    Full { capacity: usize },
    /// The address is already in flight. Signals a double-post upstream.
    #[error("buffer already posted at {0}")]
    DuplicateAddress(PhysAddr),
    /// No posted buffer matches the address. Signals corruption or a
    /// double-free upstream; never swallowed.
    #[error("no posted buffer at {0}")]
    UnknownBuffer(PhysAddr),
}

struct RxHashEntry<B> {
    handle: B,
    /// The device-visible slot the address was written to at post time.
    slot: usize,
}

struct RingInner<B> {
    /// Device-visible slot array of posted addresses.
    slots: Box<[u64]>,
    /// Slots not currently backing an in-flight buffer. Reclaim can free
    /// slots in any order, so post must draw from here rather than walk a
    /// round-robin index over slots that may still be live.
    free_slots: Vec<usize>,
    /// In-flight buffers keyed by physical address.
    entries: FxHashMap<PhysAddr, RxHashEntry<B>>,
}

/// A fixed-capacity ring of pre-posted receive buffers.
///
/// Each posted buffer is tracked by its physical address in a hash table so
/// the completion path can [`reclaim`](Self::reclaim) it in O(1), in whatever
/// order the hardware completes. The hash mutations take a short mutex;
/// neither post nor reclaim ever blocks beyond it, so both are safe from
/// completion context.
pub struct RxBufferRing<B> {
    capacity: usize,
    fill_target: usize,
    inner: Mutex<RingInner<B>>,
    /// Mirror of the hash population, readable without the lock.
    fill_count: AtomicUsize,
    stats: Arc<RingStats>,
}

impl<B> std::fmt::Debug for RxBufferRing<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxBufferRing")
            .field("capacity", &self.capacity)
            .field("fill_target", &self.fill_target)
            .field("fill_count", &self.fill_count())
            .finish_non_exhaustive()
    }
}

impl<B> RxBufferRing<B> {
    /// Allocates an empty ring. The fill target is clamped to the capacity.
    pub fn new(capacity: usize, fill_target: usize) -> Self {
        Self {
            capacity,
            fill_target: fill_target.min(capacity),
            inner: Mutex::new(RingInner {
                slots: vec![0u64; capacity].into_boxed_slice(),
                free_slots: (0..capacity).rev().collect(),
                entries: FxHashMap::default(),
            }),
            fill_count: AtomicUsize::new(0),
            stats: Arc::new(RingStats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fill_target(&self) -> usize {
        self.fill_target
    }

    /// Number of buffers currently posted.
    #[inline]
    pub fn fill_count(&self) -> usize {
        self.fill_count.load(Ordering::Acquire)
    }

    /// How far the ring currently is below its fill target.
    #[inline]
    pub fn deficit(&self) -> usize {
        self.fill_target.saturating_sub(self.fill_count())
    }

    pub fn stats(&self) -> &Arc<RingStats> {
        &self.stats
    }

    /// Posts a buffer to the ring, recording its address in the hash table.
    pub fn post(&self, handle: B, paddr: PhysAddr) -> Result<(), RingError> {
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&paddr) {
            return Err(RingError::DuplicateAddress(paddr));
        }
        let Some(slot) = inner.free_slots.pop() else {
            return Err(RingError::Full { capacity: self.capacity });
        };

        inner.slots[slot] = paddr.0;
        inner.entries.insert(paddr, RxHashEntry { handle, slot });
        self.fill_count.store(inner.entries.len(), Ordering::Release);

        self.stats.increment_posted();
        trace!(%paddr, slot, fill = inner.entries.len(), "Buffer posted");
        Ok(())
    }

    /// Recovers the buffer handle for a completed receive, removing it from
    /// the hash table. Completion order is hardware-driven and unrelated to
    /// post order.
    ///
    /// An unknown address is an upstream integrity fault: it is logged and
    /// surfaced, never dropped.
    pub fn reclaim(&self, paddr: PhysAddr) -> Result<B, RingError> {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.remove(&paddr) else {
            drop(inner);
            self.stats.increment_unknown_reclaims();
            error!(%paddr, "Reclaim of unknown buffer address, upstream integrity fault");
            return Err(RingError::UnknownBuffer(paddr));
        };

        // The slot no longer backs an in-flight buffer.
        inner.slots[entry.slot] = 0;
        inner.free_slots.push(entry.slot);
        self.fill_count.store(inner.entries.len(), Ordering::Release);
        self.stats.increment_reclaimed();
        trace!(%paddr, fill = inner.entries.len(), "Buffer reclaimed");
        Ok(entry.handle)
    }

    #[cfg(test)]
    fn slots_snapshot(&self) -> Vec<u64> {
        self.inner.lock().slots.to_vec()
    }
}

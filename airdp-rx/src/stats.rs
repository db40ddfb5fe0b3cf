use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a receive buffer ring.
/// Shared between the reclaim path, the refiller and observers.
#[derive(Debug, Default)]
pub struct RingStats {
    /// Total buffers posted to the ring.
    posted: AtomicUsize,
    /// Total buffers reclaimed by the completion path.
    reclaimed: AtomicUsize,
    /// Reclaims of addresses not present in the hash table. Any non-zero
    /// value indicates an upstream integrity fault.
    unknown_reclaims: AtomicUsize,
    /// Buffer allocation failures during refill.
    alloc_failures: AtomicUsize,
    /// Refills forced by the stall watchdog.
    watchdog_kicks: AtomicUsize,
}

impl RingStats {
    #[inline]
    pub(crate) fn increment_posted(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_unknown_reclaims(&self) {
        self.unknown_reclaims.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_alloc_failures(&self) {
        self.alloc_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_watchdog_kicks(&self) {
        self.watchdog_kicks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn posted(&self) -> usize {
        self.posted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reclaimed(&self) -> usize {
        self.reclaimed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unknown_reclaims(&self) -> usize {
        self.unknown_reclaims.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn alloc_failures(&self) -> usize {
        self.alloc_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn watchdog_kicks(&self) -> usize {
        self.watchdog_kicks.load(Ordering::Relaxed)
    }
}

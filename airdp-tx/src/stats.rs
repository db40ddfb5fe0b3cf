use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for the transmit scheduler.
/// Shared between the driver task and observers.
#[derive(Debug, Default)]
pub struct SchedStats {
    /// Total scheduler passes run.
    passes: AtomicUsize,
    /// Total frames handed to the transport.
    frames_tx: AtomicUsize,
    /// Total payload bytes handed to the transport.
    bytes_tx: AtomicUsize,
    /// Total credit reserved from the pool.
    credits_consumed: AtomicUsize,
    /// Passes cut short by the pause gate.
    gated_passes: AtomicUsize,
}

impl SchedStats {
    #[inline]
    pub(crate) fn increment_passes(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_tx(&self, frames: usize, bytes: usize) {
        self.frames_tx.fetch_add(frames, Ordering::Relaxed);
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_credits(&self, credits: usize) {
        self.credits_consumed.fetch_add(credits, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_gated(&self) {
        self.gated_passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_tx(&self) -> usize {
        self.frames_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn credits_consumed(&self) -> usize {
        self.credits_consumed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn gated_passes(&self) -> usize {
        self.gated_passes.load(Ordering::Relaxed)
    }
}

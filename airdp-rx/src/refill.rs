use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use airdp_common::ExponentialBackoff;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::ring::{PhysAddr, RingError, RxBufferRing};

/// Supplies receive buffers and their device-visible addresses.
/// Allocation may fail under memory pressure; the refiller retries.
pub trait BufferAllocator: Send + Sync + 'static {
    type Buffer: Send + 'static;

    fn alloc(&self) -> Option<(Self::Buffer, PhysAddr)>;
}

#[derive(Debug, Error)]
pub enum RefillError {
    /// Allocation kept failing past the configured retry ceiling.
    /// Persistent resource starvation to be escalated to the control layer.
    #[error("allocation retries exhausted after {retries} attempts, ring at {fill}/{target}")]
    RetriesExhausted { retries: usize, fill: usize, target: usize },
}

/// Refill and watchdog tuning.
#[derive(Debug, Clone, Copy)]
pub struct RefillOptions {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_retries: usize,
    watchdog_period: Duration,
    /// Fill level below which the ring counts as stalled. Defaults to half
    /// the fill target.
    low_water: Option<usize>,
    /// Consecutive stalled watchdog ticks before a refill is forced.
    stall_ticks: usize,
}

impl Default for RefillOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            max_retries: 8,
            watchdog_period: Duration::from_secs(1),
            low_water: None,
            stall_ticks: 2,
        }
    }
}

impl RefillOptions {
    pub fn initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Sets the allocation retry ceiling per refill attempt.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn watchdog_period(mut self, period: Duration) -> Self {
        self.watchdog_period = period;
        self
    }

    pub fn low_water(mut self, level: usize) -> Self {
        self.low_water = Some(level);
        self
    }

    pub fn stall_ticks(mut self, ticks: usize) -> Self {
        self.stall_ticks = ticks;
        self
    }
}

/// Tops the ring back up to its fill target.
///
/// Concurrent refill requests (from completion-context reclaim and from the
/// watchdog) collapse into the one in flight through a single-flight
/// reference count; the in-flight refill keeps topping up until the target
/// is reached, so a collapsed request loses nothing.
pub struct RingRefiller<A: BufferAllocator> {
    ring: Arc<RxBufferRing<A::Buffer>>,
    alloc: A,
    options: RefillOptions,
    inflight: AtomicUsize,
}

impl<A: BufferAllocator> std::fmt::Debug for RingRefiller<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingRefiller")
            .field("ring", &self.ring)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<A: BufferAllocator> RingRefiller<A> {
    pub fn new(ring: Arc<RxBufferRing<A::Buffer>>, alloc: A, options: RefillOptions) -> Self {
        Self { ring, alloc, options, inflight: AtomicUsize::new(0) }
    }

    pub fn ring(&self) -> &Arc<RxBufferRing<A::Buffer>> {
        &self.ring
    }

    /// Refills the ring to its fill target, retrying allocation failures
    /// with a capped exponential backoff. Returns the number of buffers
    /// posted, or 0 immediately if another refill is already in flight.
    pub async fn refill(&self) -> Result<usize, RefillError> {
        if self.inflight.fetch_add(1, Ordering::AcqRel) > 0 {
            self.inflight.fetch_sub(1, Ordering::AcqRel);
            trace!("Refill already in flight, collapsing request");
            return Ok(0);
        }

        let result = self.refill_to_target().await;
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    async fn refill_to_target(&self) -> Result<usize, RefillError> {
        let mut posted = 0;
        let mut retries = 0;
        let mut backoff = ExponentialBackoff::new(
            self.options.initial_backoff,
            self.options.max_backoff,
            Some(self.options.max_retries),
        );

        while self.ring.deficit() > 0 {
            let Some((buffer, paddr)) = self.alloc.alloc() else {
                self.ring.stats().increment_alloc_failures();

                match backoff.next().await {
                    Some(delay) => {
                        retries += 1;
                        trace!(?delay, retries, "Buffer allocation failed, backing off");
                        continue;
                    }
                    None => {
                        let fill = self.ring.fill_count();
                        let target = self.ring.fill_target();
                        error!(fill, target, "Refill retries exhausted, ring starved");
                        return Err(RefillError::RetriesExhausted {
                            retries: self.options.max_retries,
                            fill,
                            target,
                        });
                    }
                }
            };

            match self.ring.post(buffer, paddr) {
                Ok(()) => posted += 1,
                Err(RingError::Full { .. }) => break,
                Err(e) => {
                    // A duplicate address is an allocator bug; the fresh
                    // buffer is dropped rather than double-posted.
                    warn!(err = %e, "Discarding buffer that cannot be posted");
                    break;
                }
            }
        }

        if posted > 0 {
            debug!(posted, fill = self.ring.fill_count(), "Ring refilled");
        }
        Ok(posted)
    }
}

/// Spawns the stall watchdog: a periodic safety net, independent of the
/// refill retry timer, that forces a refill when the fill level sits below
/// the low-water mark for several consecutive ticks (a lost wake-up).
pub fn spawn_watchdog<A: BufferAllocator>(refiller: Arc<RingRefiller<A>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let options = refiller.options;
        let low_water = options.low_water.unwrap_or(refiller.ring.fill_target() / 2);
        let mut interval = tokio::time::interval(options.watchdog_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stalled = 0usize;

        loop {
            interval.tick().await;

            if refiller.ring.fill_count() < low_water {
                stalled += 1;
                if stalled >= options.stall_ticks {
                    stalled = 0;
                    refiller.ring.stats().increment_watchdog_kicks();
                    warn!(
                        fill = refiller.ring.fill_count(),
                        low_water, "Rx ring stalled, forcing refill"
                    );
                    if let Err(e) = refiller.refill().await {
                        error!(err = %e, "Watchdog refill failed");
                    }
                }
            } else {
                stalled = 0;
            }
        }
    })
}

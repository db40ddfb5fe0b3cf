use parking_lot::Mutex;
use tracing::trace;

/// The shared transmit budget: how many credit units may currently be
/// admitted to the medium.
///
/// The pool is only replenished by explicit completion/credit-update events
/// via [`restore`](Self::restore). A single lock serializes reservation
/// against restoration; completion paths and scheduler passes race freely.
#[derive(Debug)]
pub struct CreditPool {
    inner: Mutex<PoolState>,
    capacity: usize,
}

#[derive(Debug)]
struct PoolState {
    credits: usize,
}

impl CreditPool {
    /// Creates a pool starting at full capacity.
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(PoolState { credits: capacity }), capacity }
    }

    /// Maximum credit the pool can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently available credit.
    pub fn available(&self) -> usize {
        self.inner.lock().credits
    }

    /// Decrements available credit by up to `amount`, returning the granted
    /// (possibly clipped) amount. Never goes negative.
    pub fn reserve(&self, amount: usize) -> usize {
        let mut state = self.inner.lock();
        let granted = amount.min(state.credits);
        state.credits -= granted;

        if granted < amount {
            trace!(requested = amount, granted, "Credit clipped");
        }

        granted
    }

    /// Returns credit to the pool, clamped at capacity. Called once per
    /// completed (or discarded) frame batch.
    pub fn restore(&self, amount: usize) {
        let mut state = self.inner.lock();
        state.credits = (state.credits + amount).min(self.capacity);
    }
}

/// A group-level credit ceiling shared by the transmit queues of one virtual
/// interface, bounding how much of the medium that interface may consume.
///
/// The group mirrors the pool's consume/restore cycle with both a frame-credit
/// ceiling and a byte ceiling; the effective budget for a member queue is the
/// lesser of the group's availability and the global pool's.
#[derive(Debug)]
pub struct TxQueueGroup {
    label: &'static str,
    inner: Mutex<GroupState>,
    max_credits: usize,
    max_bytes: usize,
}

#[derive(Debug)]
struct GroupState {
    credits: usize,
    bytes: usize,
}

impl TxQueueGroup {
    pub fn new(label: &'static str, max_credits: usize, max_bytes: usize) -> Self {
        Self {
            label,
            inner: Mutex::new(GroupState { credits: max_credits, bytes: max_bytes }),
            max_credits,
            max_bytes,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Group credit currently available.
    pub fn available(&self) -> usize {
        self.inner.lock().credits
    }

    /// Group bytes currently available.
    pub fn bytes_available(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Clips `requested` to the least of this group's credit ceiling, its
    /// byte ceiling (priced in whole credit units, so granted credit never
    /// admits more bytes than remain) and the global pool's availability.
    pub fn group_limit(&self, pool: &CreditPool, requested: usize, credit_unit: usize) -> usize {
        let state = self.inner.lock();
        requested
            .min(state.credits)
            .min(state.bytes / credit_unit.max(1))
            .min(pool.available())
    }

    /// Accounts a dequeued batch against the group ceilings. Clips rather
    /// than going negative, matching the pool's behavior.
    pub fn consume(&self, credits: usize, bytes: usize) {
        let mut state = self.inner.lock();
        state.credits = state.credits.saturating_sub(credits);
        state.bytes = state.bytes.saturating_sub(bytes);
    }

    /// Returns completed-batch credit to the group, clamped at the ceilings.
    pub fn restore(&self, credits: usize, bytes: usize) {
        let mut state = self.inner.lock();
        state.credits = (state.credits + credits).min(self.max_credits);
        state.bytes = (state.bytes + bytes).min(self.max_bytes);
    }
}

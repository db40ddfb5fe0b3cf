use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use airdp_common::PauseGate;
use futures::Future;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    credit::CreditPool,
    frame::{DestId, Frame, TrafficClass},
    peer::{AimdPolicy, BadPeerFlowController},
    queue::{FlushReason, QueueError, TxFrameQueue},
    stats::SchedStats,
};

/// The transport seam: dequeued frame batches are handed here, in FIFO order
/// per queue. Implementations must not block the scheduler pass.
pub trait FrameSink: Send + Sync + 'static {
    fn deliver(&self, frames: Vec<Frame>);
}

impl<F> FrameSink for F
where
    F: Fn(Vec<Frame>) + Send + Sync + 'static,
{
    fn deliver(&self, frames: Vec<Frame>) {
        self(frames)
    }
}

/// Why the scheduler driver was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A frame landed on a previously-empty queue.
    Enqueue,
    /// Completed frames returned credit to the pool.
    CreditReturn,
    /// The throttle phase flipped to ON.
    PhaseOn,
}

/// A cloneable handle used by event sources to wake the scheduler driver.
#[derive(Debug, Clone)]
pub struct SchedHandle {
    tx: mpsc::UnboundedSender<WakeReason>,
}

impl SchedHandle {
    /// Wakes the driver. A missed wake is recovered by the fallback tick.
    pub fn wake(&self, reason: WakeReason) {
        let _ = self.tx.send(reason);
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct SchedOptions {
    /// Maximum frames one queue may yield per pass before rotation moves on.
    quantum: usize,
    /// Fallback tick period, a safety net against lost wake-ups.
    tick: Duration,
    /// Adaptive-cap tuning for the bad-peer flow limiter.
    bad_peer_policy: AimdPolicy,
}

impl Default for SchedOptions {
    fn default() -> Self {
        Self { quantum: 8, tick: Duration::from_millis(100), bad_peer_policy: AimdPolicy::default() }
    }
}

impl SchedOptions {
    /// Sets the per-queue scheduling quantum.
    pub fn quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum;
        self
    }

    /// Sets the fallback tick period.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the bad-peer adaptive-cap policy.
    pub fn bad_peer_policy(mut self, policy: AimdPolicy) -> Self {
        self.bad_peer_policy = policy;
        self
    }
}

/// What one scheduler pass admitted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub frames: usize,
    pub credits: usize,
    pub bytes: usize,
}

/// The transmit scheduler: the only component that dequeues on behalf of the
/// system.
///
/// One pass walks the registered queues in round-robin rotation from a
/// pointer retained between passes so no interface starves another, and
/// repeats the rotation until a full rotation admits nothing. Per queue the
/// admission is clipped by the bad-peer cap, the queue's group ceiling and
/// the global pool. Passes are serialized on the rotation lock, so two
/// concurrent passes cannot over-commit the same credit; completion events
/// only ever add credit back.
pub struct TxScheduler {
    options: SchedOptions,
    pool: Arc<CreditPool>,
    gate: Arc<PauseGate>,
    bad_peer: Arc<BadPeerFlowController>,
    queues: RwLock<Vec<Arc<TxFrameQueue>>>,
    /// Round-robin pointer, also the pass serialization lock.
    rotation: Mutex<usize>,
    sink: Box<dyn FrameSink>,
    stats: Arc<SchedStats>,
    handle: SchedHandle,
}

impl std::fmt::Debug for TxScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxScheduler")
            .field("options", &self.options)
            .field("queues", &self.queues.read().len())
            .field("credit", &self.pool.available())
            .finish_non_exhaustive()
    }
}

impl TxScheduler {
    /// Creates the scheduler and its driver future. Spawn the driver on the
    /// runtime; deterministic callers can instead invoke
    /// [`run_pass`](Self::run_pass) directly.
    pub fn new<S: FrameSink>(
        pool: Arc<CreditPool>,
        gate: Arc<PauseGate>,
        sink: S,
        options: SchedOptions,
    ) -> (Arc<Self>, SchedDriver) {
        let (tx, rx) = mpsc::unbounded_channel();

        let sched = Arc::new(Self {
            options,
            pool,
            gate,
            bad_peer: Arc::new(BadPeerFlowController::new(options.bad_peer_policy)),
            queues: RwLock::new(Vec::new()),
            rotation: Mutex::new(0),
            sink: Box::new(sink),
            stats: Arc::new(SchedStats::default()),
            handle: SchedHandle { tx },
        });

        let driver = SchedDriver {
            sched: Arc::clone(&sched),
            events: rx,
            tick_period: options.tick,
            tick: None,
        };

        (sched, driver)
    }

    /// A handle for waking the driver from completion paths, the throttle
    /// controller or the send path.
    pub fn handle(&self) -> SchedHandle {
        self.handle.clone()
    }

    /// The per-destination flow limiter, for the control layer to flag and
    /// unflag misbehaving destinations.
    pub fn bad_peer(&self) -> &Arc<BadPeerFlowController> {
        &self.bad_peer
    }

    pub fn stats(&self) -> &Arc<SchedStats> {
        &self.stats
    }

    pub fn pool(&self) -> &Arc<CreditPool> {
        &self.pool
    }

    /// Adds a queue to the rotation.
    pub fn register_queue(&self, queue: Arc<TxFrameQueue>) {
        debug!(dest = %queue.dest(), tid = queue.tid().tid(), "Queue registered");
        self.queues.write().push(queue);
    }

    /// Looks up the registered queue for a (destination, traffic class) pair.
    pub fn queue_for(&self, dest: DestId, tid: TrafficClass) -> Option<Arc<TxFrameQueue>> {
        self.queues.read().iter().find(|q| q.dest() == dest && q.tid() == tid).cloned()
    }

    /// Enqueues a frame on its destination queue and wakes the driver if the
    /// queue was previously empty.
    pub fn submit(&self, frame: Frame) -> Result<(), QueueError> {
        let Some(queue) = self.queue_for(frame.dest(), frame.tid()) else {
            return Err(QueueError::NoQueue(frame));
        };

        if queue.enqueue(frame)? {
            self.handle.wake(WakeReason::Enqueue);
        }

        Ok(())
    }

    /// Tears down a destination: its queues leave the rotation, close, and
    /// are flushed. The still-queued frames are returned to the caller for
    /// disposal. All of this completes before the queue objects can drop, so
    /// no pass can touch a dangling queue.
    pub fn remove_destination(&self, dest: DestId) -> Vec<Frame> {
        let mut queues = self.queues.write();
        let mut flushed = Vec::new();

        queues.retain(|queue| {
            if queue.dest() == dest {
                queue.close();
                flushed.append(&mut queue.flush(FlushReason::Teardown));
                false
            } else {
                true
            }
        });

        debug!(%dest, flushed = flushed.len(), "Destination removed");
        flushed
    }

    /// Runs one scheduler pass: while the gate is open and credit remains,
    /// rotate over the queues admitting a bounded batch from each, repeating
    /// the rotation until one admits nothing (every remaining queue is empty
    /// or out of budget). Stops immediately if the gate flips closed
    /// mid-pass; the rotation pointer stays on the first unserviced queue.
    pub fn run_pass(&self) -> PassSummary {
        let mut rotation = self.rotation.lock();
        let queues = self.queues.read();
        let mut summary = PassSummary::default();

        self.stats.increment_passes();

        let n = queues.len();
        if n == 0 {
            return summary;
        }

        loop {
            let admitted_before = summary.frames;

            for _ in 0..n {
                if self.gate.is_paused() {
                    self.stats.increment_gated();
                    trace!("Pass stopped by pause gate");
                    return summary;
                }
                if self.pool.available() == 0 {
                    trace!("Pass stopped, credit exhausted");
                    return summary;
                }

                let queue = &queues[*rotation % n];
                *rotation = (*rotation + 1) % n;

                if queue.is_empty() {
                    continue;
                }

                let (quota, clipped) =
                    self.bad_peer.dequeue_quota(queue.dest(), self.options.quantum);
                let budget = match queue.group() {
                    Some(group) => {
                        group.group_limit(&self.pool, self.pool.available(), queue.credit_unit())
                    }
                    None => self.pool.available(),
                };
                if budget == 0 || quota == 0 {
                    continue;
                }

                let drained = queue.dequeue(quota, budget);
                if drained.frames.is_empty() {
                    continue;
                }

                // The head-of-line exception can overdraw the budget by one
                // frame; the reservation clips at zero rather than going
                // negative.
                let granted = self.pool.reserve(drained.credits);
                if granted < drained.credits {
                    trace!(dest = %queue.dest(), overdraft = drained.credits - granted, "Head-of-line overdraft");
                }
                if let Some(group) = queue.group() {
                    group.consume(drained.credits, drained.bytes);
                }

                // The cap only "limited" the peer if frames were actually
                // withheld by it.
                let limited = clipped && !queue.is_empty();
                self.bad_peer.update_tx_limit(queue.dest(), drained.frames.len(), limited);

                summary.frames += drained.frames.len();
                summary.credits += drained.credits;
                summary.bytes += drained.bytes;

                self.stats.increment_tx(drained.frames.len(), drained.bytes);
                self.stats.increment_credits(drained.credits);

                trace!(
                    dest = %queue.dest(),
                    frames = drained.frames.len(),
                    credits = drained.credits,
                    "Batch admitted"
                );
                self.sink.deliver(drained.frames);
            }

            // A rotation that admitted nothing cannot make progress on the
            // next one either; the pass is done.
            if summary.frames == admitted_before {
                return summary;
            }
        }
    }
}

/// The scheduler driver. Endless future that turns wake events and the
/// fallback tick into scheduler passes.
pub struct SchedDriver {
    sched: Arc<TxScheduler>,
    events: mpsc::UnboundedReceiver<WakeReason>,
    tick_period: Duration,
    /// Created lazily on first poll so the scheduler can be built outside a
    /// runtime.
    tick: Option<tokio::time::Interval>,
}

impl std::fmt::Debug for SchedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedDriver").field("tick_period", &self.tick_period).finish_non_exhaustive()
    }
}

impl Future for SchedDriver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let tick = this.tick.get_or_insert_with(|| tokio::time::interval(this.tick_period));

        loop {
            let mut should_run = false;

            // Coalesce all pending wake events into one pass.
            loop {
                match this.events.poll_recv(cx) {
                    Poll::Ready(Some(reason)) => {
                        trace!(?reason, "Scheduler woken");
                        should_run = true;
                    }
                    Poll::Ready(None) => {
                        debug!("All scheduler handles dropped, shutting down driver");
                        return Poll::Ready(());
                    }
                    Poll::Pending => break,
                }
            }

            if tick.poll_tick(cx).is_ready() {
                should_run = true;
            }

            if should_run {
                this.sched.run_pass();
                continue;
            }

            return Poll::Pending;
        }
    }
}

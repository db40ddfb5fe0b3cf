use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    credit::TxQueueGroup,
    frame::{DestId, Frame, TrafficClass},
};

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is mid-teardown. The frame is handed back for the caller to
    /// dispose of.
    #[error("queue closed")]
    Closed(Frame),
    /// No queue is registered for the frame's (destination, traffic class).
    #[error("no queue for destination")]
    NoQueue(Frame),
}

/// Why a queue is being flushed, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The owning destination is being torn down.
    Teardown,
    /// A control-plane reset of the datapath.
    Reset,
}

/// The result of a bounded dequeue: the removed frames in FIFO order, the
/// credit their transmission costs, and their total payload bytes.
#[derive(Debug, Default)]
pub struct Drained {
    pub frames: Vec<Frame>,
    pub credits: usize,
    pub bytes: usize,
}

/// An ordered per-(destination, traffic class) collection of pending
/// outbound frames.
///
/// Enqueue and dequeue serialize on a per-queue lock; different queues can be
/// touched concurrently. The depth and byte counters are plain atomics so the
/// scheduler can skip empty queues without taking the lock.
pub struct TxFrameQueue {
    dest: DestId,
    tid: TrafficClass,
    /// Payload bytes per credit unit, used to price frames at dequeue time.
    credit_unit: usize,
    /// The group this queue shares a credit ceiling with, if any.
    group: Option<Arc<TxQueueGroup>>,
    inner: Mutex<QueueInner>,
    depth: AtomicUsize,
    queued_bytes: AtomicUsize,
}

#[derive(Default)]
struct QueueInner {
    frames: VecDeque<Frame>,
    closed: bool,
}

impl std::fmt::Debug for TxFrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxFrameQueue")
            .field("dest", &self.dest)
            .field("tid", &self.tid)
            .field("depth", &self.len())
            .field("queued_bytes", &self.queued_bytes())
            .finish_non_exhaustive()
    }
}

impl TxFrameQueue {
    /// Creates an ungrouped queue.
    pub fn new(dest: DestId, tid: TrafficClass, credit_unit: usize) -> Self {
        Self::with_group(dest, tid, credit_unit, None)
    }

    /// Creates a queue that shares the given group's credit ceiling.
    /// A queue belongs to at most one group for its whole lifetime.
    pub fn with_group(
        dest: DestId,
        tid: TrafficClass,
        credit_unit: usize,
        group: Option<Arc<TxQueueGroup>>,
    ) -> Self {
        Self {
            dest,
            tid,
            credit_unit,
            group,
            inner: Mutex::new(QueueInner::default()),
            depth: AtomicUsize::new(0),
            queued_bytes: AtomicUsize::new(0),
        }
    }

    pub fn dest(&self) -> DestId {
        self.dest
    }

    pub fn tid(&self) -> TrafficClass {
        self.tid
    }

    pub(crate) fn group(&self) -> Option<&Arc<TxQueueGroup>> {
        self.group.as_ref()
    }

    pub(crate) fn credit_unit(&self) -> usize {
        self.credit_unit
    }

    /// Number of frames currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes currently queued.
    #[inline]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    /// Appends a frame at the tail. Never blocks.
    ///
    /// Returns `true` if the queue was empty before the append, which callers
    /// use as a hint to wake the scheduler. Fails with [`QueueError::Closed`]
    /// once the destination is mid-teardown; the frame is handed back.
    pub fn enqueue(&self, frame: Frame) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed(frame));
        }

        let was_empty = inner.frames.is_empty();
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.queued_bytes.fetch_add(frame.len(), Ordering::Relaxed);
        inner.frames.push_back(frame);

        Ok(was_empty)
    }

    /// Removes frames from the head while staying under both `max_frames`
    /// and `credit_budget`. Never blocks; frames enqueued concurrently with
    /// the scan are simply left for the next pass.
    ///
    /// To avoid permanent head-of-line starvation, the first frame scanned is
    /// taken even when its cost alone exceeds the whole budget, provided the
    /// budget is non-zero. The reported credit cost is the real cost, which
    /// in that single case can exceed `credit_budget`.
    pub fn dequeue(&self, max_frames: usize, credit_budget: usize) -> Drained {
        let mut drained = Drained::default();
        if max_frames == 0 || credit_budget == 0 {
            return drained;
        }

        let mut inner = self.inner.lock();
        while drained.frames.len() < max_frames {
            let cost = match inner.frames.front() {
                Some(head) => head.credit_cost(self.credit_unit),
                None => break,
            };
            if drained.credits + cost > credit_budget && !drained.frames.is_empty() {
                // Deferred to the next pass; order is preserved.
                break;
            }
            let Some(frame) = inner.frames.pop_front() else {
                break;
            };
            drained.credits += cost;
            drained.bytes += frame.len();
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.queued_bytes.fetch_sub(frame.len(), Ordering::Relaxed);
            drained.frames.push(frame);

            if drained.credits >= credit_budget {
                break;
            }
        }

        trace!(
            dest = %self.dest,
            tid = self.tid.tid(),
            frames = drained.frames.len(),
            credits = drained.credits,
            "Dequeued"
        );

        drained
    }

    /// Unconditionally empties the queue, returning all frames to the caller
    /// for disposal. Counters are reset so the scheduler stops considering
    /// the queue immediately.
    pub fn flush(&self, reason: FlushReason) -> Vec<Frame> {
        let mut inner = self.inner.lock();
        let frames: Vec<Frame> = inner.frames.drain(..).collect();

        self.depth.store(0, Ordering::Relaxed);
        self.queued_bytes.store(0, Ordering::Relaxed);

        if !frames.is_empty() {
            debug!(dest = %self.dest, tid = self.tid.tid(), ?reason, count = frames.len(), "Flushed queue");
        }

        frames
    }

    /// Marks the queue closed. Subsequent enqueues fail with
    /// [`QueueError::Closed`]; already-queued frames stay until flushed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            debug!(dest = %self.dest, tid = self.tid.tid(), "Queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(n: usize) -> Frame {
        Frame::new(DestId(7), TrafficClass::BEST_EFFORT, Bytes::from(vec![0u8; n]))
    }

    fn queue() -> TxFrameQueue {
        TxFrameQueue::new(DestId(7), TrafficClass::BEST_EFFORT, 512)
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = queue();
        for i in 0..10usize {
            q.enqueue(frame(i + 1)).unwrap();
        }

        let first = q.dequeue(4, usize::MAX);
        let second = q.dequeue(usize::MAX, usize::MAX);

        let lens: Vec<usize> =
            first.frames.iter().chain(second.frames.iter()).map(Frame::len).collect();
        assert_eq!(lens, (1..=10).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn dequeue_respects_both_bounds() {
        let q = queue();
        for _ in 0..8 {
            q.enqueue(frame(512)).unwrap(); // 1 credit each
        }

        let drained = q.dequeue(3, 10);
        assert_eq!(drained.frames.len(), 3);
        assert_eq!(drained.credits, 3);

        let drained = q.dequeue(10, 2);
        assert_eq!(drained.frames.len(), 2);
        assert_eq!(drained.credits, 2);

        assert_eq!(q.len(), 3);
    }

    #[test]
    fn oversized_head_frame_is_not_starved() {
        let q = queue();
        q.enqueue(frame(4096)).unwrap(); // 8 credits
        q.enqueue(frame(512)).unwrap();

        // Head exceeds the whole budget but nothing was spent yet.
        let drained = q.dequeue(4, 2);
        assert_eq!(drained.frames.len(), 1);
        assert_eq!(drained.credits, 8);

        // A zero budget never admits.
        assert!(q.dequeue(4, 0).frames.is_empty());
    }

    #[test]
    fn oversized_second_frame_is_deferred() {
        let q = queue();
        q.enqueue(frame(512)).unwrap();
        q.enqueue(frame(4096)).unwrap();

        let drained = q.dequeue(4, 2);
        assert_eq!(drained.frames.len(), 1);
        assert_eq!(drained.credits, 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn closed_queue_hands_the_frame_back() {
        let q = queue();
        q.enqueue(frame(100)).unwrap();
        q.close();

        match q.enqueue(frame(200)) {
            Err(QueueError::Closed(f)) => assert_eq!(f.len(), 200),
            other => panic!("expected Closed, got {other:?}"),
        }

        // Already-queued frames survive until flushed.
        assert_eq!(q.len(), 1);
        let frames = q.flush(FlushReason::Teardown);
        assert_eq!(frames.len(), 1);
        assert_eq!(q.len(), 0);
        assert_eq!(q.queued_bytes(), 0);
    }
}

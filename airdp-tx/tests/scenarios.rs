use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;

use airdp_common::{PauseChannel, PauseGate};
use airdp_tx::{
    AimdPolicy, CreditPool, DestId, Frame, QueueError, SchedOptions, TrafficClass, TxFrameQueue,
    TxQueueGroup, TxScheduler, WakeReason,
};

const CREDIT_UNIT: usize = 512;

fn frame(dest: DestId) -> Frame {
    // Well under one credit unit: every frame costs exactly 1 credit.
    Frame::new(dest, TrafficClass::BEST_EFFORT, Bytes::from_static(b"payload"))
}

/// A sink that records delivered frames.
fn recording_sink() -> (Arc<Mutex<Vec<Frame>>>, impl Fn(Vec<Frame>) + Send + Sync + 'static) {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let delivered = Arc::clone(&delivered);
        move |frames: Vec<Frame>| delivered.lock().unwrap().extend(frames)
    };
    (delivered, sink)
}

#[test]
fn round_robin_shares_credit_fairly() {
    let _ = tracing_subscriber::fmt::try_init();

    let pool = Arc::new(CreditPool::new(10));
    let gate = Arc::new(PauseGate::new());
    let (delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), gate, sink, SchedOptions::default().quantum(3));

    let dests = [DestId(1), DestId(2), DestId(3)];
    for dest in dests {
        let queue = Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, CREDIT_UNIT));
        for _ in 0..5 {
            queue.enqueue(frame(dest)).unwrap();
        }
        sched.register_queue(queue);
    }

    // The first rotation takes quantum 3 from each queue, spending 9 of the
    // 10 credits; the pass then rotates again and drains the last credit.
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 10);
    assert_eq!(summary.credits, 10);
    assert_eq!(pool.available(), 0);

    let delivered = delivered.lock().unwrap();
    for dest in dests {
        let first_rotation = delivered[..9].iter().filter(|f| f.dest() == dest).count();
        assert_eq!(first_rotation, 3, "{dest} should yield exactly 3 frames per rotation");
    }
    drop(delivered);

    // Out of credit: nothing moves until completions restore some.
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 0);

    pool.restore(5);
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 5);
}

#[test]
fn pass_runs_until_credit_or_queues_are_exhausted() {
    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), gate, sink, SchedOptions::default().quantum(8));

    let dest = DestId(1);
    let queue = Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, CREDIT_UNIT));
    for _ in 0..20 {
        queue.enqueue(frame(dest)).unwrap();
    }
    sched.register_queue(Arc::clone(&queue));

    // The quantum bounds one rotation, not the pass: with credit to spare
    // the pass keeps rotating until the queue is empty.
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 20);
    assert!(queue.is_empty());
    assert_eq!(pool.available(), 80);
    assert_eq!(delivered.lock().unwrap().len(), 20);
}

#[test]
fn bad_peer_cap_leaves_budget_for_others() {
    let _ = tracing_subscriber::fmt::try_init();

    let pool = Arc::new(CreditPool::new(8));
    let gate = Arc::new(PauseGate::new());
    let (delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), gate, sink, SchedOptions::default().quantum(8));

    let x = DestId(10);
    let y = DestId(20);
    for dest in [x, y] {
        let queue = Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, CREDIT_UNIT));
        for _ in 0..10 {
            queue.enqueue(frame(dest)).unwrap();
        }
        sched.register_queue(queue);
    }

    sched.bad_peer().add_limit(x, 2);

    let summary = sched.run_pass();
    assert_eq!(summary.frames, 8, "the whole 8-credit budget is spent");

    let delivered = delivered.lock().unwrap();
    let from_x = delivered.iter().filter(|f| f.dest() == x).count();
    let from_y = delivered.iter().filter(|f| f.dest() == y).count();
    assert!(from_x <= 2, "capped destination stays within its cap");
    assert_eq!(from_y, 8 - from_x, "the remainder goes to the uncapped destination");
}

#[test]
fn group_ceiling_bounds_one_interface() {
    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (_delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), gate, sink, SchedOptions::default().quantum(8));

    let group = Arc::new(TxQueueGroup::new("vdev0", 4, 1 << 20));
    for dest in [DestId(1), DestId(2)] {
        let queue = Arc::new(TxFrameQueue::with_group(
            dest,
            TrafficClass::BEST_EFFORT,
            CREDIT_UNIT,
            Some(Arc::clone(&group)),
        ));
        for _ in 0..8 {
            queue.enqueue(frame(dest)).unwrap();
        }
        sched.register_queue(queue);
    }

    // Both queues share the 4-credit group ceiling despite the rich pool.
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 4);
    assert_eq!(group.available(), 0);
    assert_eq!(pool.available(), 96);

    // Completion returns group credit; the next pass proceeds.
    group.restore(4, 4 * CREDIT_UNIT);
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 4);
}

#[test]
fn group_byte_ceiling_blocks_admission_despite_credit() {
    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), gate, sink, SchedOptions::default().quantum(8));

    // Credit to spare, but a byte ceiling below one credit unit.
    let group = Arc::new(TxQueueGroup::new("vdev0", 100, 1));
    let dest = DestId(1);
    let queue = Arc::new(TxFrameQueue::with_group(
        dest,
        TrafficClass::BEST_EFFORT,
        CREDIT_UNIT,
        Some(Arc::clone(&group)),
    ));
    for _ in 0..10 {
        queue.enqueue(frame(dest)).unwrap();
    }
    sched.register_queue(queue);

    let summary = sched.run_pass();
    assert_eq!(summary.frames, 0);
    assert_eq!(summary.bytes, 0);
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(pool.available(), 100);
}

#[test]
fn scheduler_applies_the_configured_aimd_policy() {
    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (_delivered, sink) = recording_sink();

    let policy = AimdPolicy { increase_step: 1, decrease_shift: 2, min_cap: 2 };
    let (sched, _driver) = TxScheduler::new(
        pool,
        gate,
        sink,
        SchedOptions::default().bad_peer_policy(policy),
    );

    let x = DestId(9);
    sched.bad_peer().add_limit(x, 8);

    // One congested pass at the cap quarters it per the configured shift.
    sched.bad_peer().update_tx_limit(x, 8, true);
    assert_eq!(sched.bad_peer().dequeue_quota(x, 16), (2, true));

    // The configured floor holds.
    sched.bad_peer().update_tx_limit(x, 2, true);
    assert_eq!(sched.bad_peer().dequeue_quota(x, 16), (2, true));
}

#[test]
fn paused_gate_stops_a_pass_immediately() {
    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), Arc::clone(&gate), sink, SchedOptions::default());

    let queue = Arc::new(TxFrameQueue::new(DestId(1), TrafficClass::BEST_EFFORT, CREDIT_UNIT));
    for _ in 0..4 {
        queue.enqueue(frame(DestId(1))).unwrap();
    }
    sched.register_queue(queue);

    gate.pause(PauseChannel::Thermal);
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 0);
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(sched.stats().gated_passes(), 1);

    gate.unpause(PauseChannel::Thermal);
    let summary = sched.run_pass();
    assert_eq!(summary.frames, 4);
}

#[test]
fn destination_teardown_releases_everything() {
    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (_delivered, sink) = recording_sink();

    let (sched, _driver) = TxScheduler::new(pool, gate, sink, SchedOptions::default());

    let dest = DestId(42);
    let queue = Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, CREDIT_UNIT));
    for _ in 0..6 {
        queue.enqueue(frame(dest)).unwrap();
    }
    sched.register_queue(Arc::clone(&queue));

    let orphans = sched.remove_destination(dest);
    assert_eq!(orphans.len(), 6);
    assert!(queue.is_closed());
    assert!(queue.is_empty());

    // The frame comes back to the caller when the queue is gone.
    match sched.submit(frame(dest)) {
        Err(QueueError::NoQueue(f)) => assert_eq!(f.dest(), dest),
        other => panic!("expected NoQueue, got {other:?}"),
    }

    // The scheduler no longer considers the queue.
    assert_eq!(sched.run_pass().frames, 0);
}

#[test]
fn credit_accounting_matches_random_payloads() {
    use rand::Rng;

    let pool = Arc::new(CreditPool::new(1_000_000));
    let gate = Arc::new(PauseGate::new());
    let (delivered, sink) = recording_sink();

    let (sched, _driver) =
        TxScheduler::new(Arc::clone(&pool), gate, sink, SchedOptions::default().quantum(16));

    let dest = DestId(1);
    let queue = Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, CREDIT_UNIT));
    sched.register_queue(Arc::clone(&queue));

    let mut rng = rand::thread_rng();
    let mut expected_credits = 0;
    let mut expected_bytes = 0;
    for _ in 0..100 {
        let len = rng.gen_range(1..4 * CREDIT_UNIT);
        expected_credits += len.div_ceil(CREDIT_UNIT).max(1);
        expected_bytes += len;
        queue
            .enqueue(Frame::new(dest, TrafficClass::BEST_EFFORT, Bytes::from(vec![0u8; len])))
            .unwrap();
    }

    let mut total = airdp_tx::PassSummary::default();
    while !queue.is_empty() {
        let summary = sched.run_pass();
        total.frames += summary.frames;
        total.credits += summary.credits;
        total.bytes += summary.bytes;
    }

    assert_eq!(total.frames, 100);
    assert_eq!(total.credits, expected_credits);
    assert_eq!(total.bytes, expected_bytes);
    assert_eq!(pool.available(), 1_000_000 - expected_credits);
    assert_eq!(delivered.lock().unwrap().len(), 100);
}

#[tokio::test]
async fn driver_runs_passes_on_wake_events() {
    let _ = tracing_subscriber::fmt::try_init();

    let pool = Arc::new(CreditPool::new(100));
    let gate = Arc::new(PauseGate::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = move |frames: Vec<Frame>| {
        for f in frames {
            let _ = tx.send(f);
        }
    };

    let (sched, driver) = TxScheduler::new(
        pool,
        gate,
        sink,
        SchedOptions::default().tick(Duration::from_millis(10)),
    );

    let dest = DestId(5);
    sched.register_queue(Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, CREDIT_UNIT)));

    let driver_task = tokio::spawn(driver);

    sched.submit(frame(dest)).unwrap();
    sched.handle().wake(WakeReason::CreditReturn);

    let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame delivered before timeout")
        .unwrap();
    assert_eq!(delivered.dest(), dest);

    driver_task.abort();
}

//! Round-robin scheduling of three destinations over a small credit pool.
//! Run with `cargo run --example scheduler`.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use airdp::{
    CreditPool, DestId, Frame, PauseGate, SchedOptions, TrafficClass, TxFrameQueue, TxScheduler,
    WakeReason,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let pool = Arc::new(CreditPool::new(10));
    let gate = Arc::new(PauseGate::new());

    let sink = |frames: Vec<Frame>| {
        for frame in &frames {
            tracing::info!(dest = %frame.dest(), bytes = frame.len(), "Transmitted");
        }
    };

    let (sched, driver) = TxScheduler::new(
        Arc::clone(&pool),
        gate,
        sink,
        SchedOptions::default().quantum(3).tick(Duration::from_millis(50)),
    );
    tokio::spawn(driver);

    for dest in [DestId(1), DestId(2), DestId(3)] {
        sched.register_queue(Arc::new(TxFrameQueue::new(dest, TrafficClass::BEST_EFFORT, 512)));
        for _ in 0..5 {
            sched
                .submit(Frame::new(dest, TrafficClass::BEST_EFFORT, Bytes::from_static(b"data")))
                .unwrap();
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Completions return credit; the scheduler drains the rest.
    pool.restore(10);
    sched.handle().wake(WakeReason::CreditReturn);

    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(
        frames = sched.stats().frames_tx(),
        credits = sched.stats().credits_consumed(),
        "Done"
    );
}

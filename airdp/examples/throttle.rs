//! Duty-cycle throttling: watch the phase gate open and close.
//! Run with `cargo run --example throttle`.

use std::{sync::Arc, time::Duration};

use airdp::{DutyCycleTable, PauseGate, ThrottlePhaseController};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let gate = Arc::new(PauseGate::new());
    let table = DutyCycleTable::from_percentages(Duration::from_millis(1000), &[100, 30]).unwrap();
    let throttle = ThrottlePhaseController::new(Arc::clone(&gate), table);

    // Level 1: 300ms on, 700ms off per second.
    throttle.set_level(1).unwrap();

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        tracing::info!(phase = ?throttle.phase(), paused = gate.is_paused(), "Gate state");
    }

    throttle.set_level(0).unwrap();
    tracing::info!(phase = ?throttle.phase(), "Throttling disabled");
}

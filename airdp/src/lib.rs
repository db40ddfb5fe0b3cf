//! Wireless datapath scheduling: credit-gated transmit queues, duty-cycle
//! throttling, per-destination flow limiting and receive ring lifecycle.

pub use airdp_common::{Backoff, ExponentialBackoff, PauseChannel, PauseGate};
pub use airdp_rx::*;
pub use airdp_tx::*;

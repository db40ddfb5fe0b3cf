//! Transmit-path scheduling for a shared wireless medium.
//!
//! Outbound frames are queued per (destination, traffic class) in
//! [`TxFrameQueue`]s and admitted to the transport by the [`TxScheduler`],
//! which walks the queues in round-robin rotation subject to three gates:
//! the shared [`CreditPool`] (and optional per-interface [`TxQueueGroup`]
//! ceilings), the duty-cycle [`ThrottlePhaseController`], and the
//! per-destination caps of the [`BadPeerFlowController`].

mod frame;
pub use frame::{DestId, Frame, TrafficClass};

mod queue;
pub use queue::{Drained, FlushReason, QueueError, TxFrameQueue};

mod credit;
pub use credit::{CreditPool, TxQueueGroup};

mod throttle;
pub use throttle::{DutyCycle, DutyCycleTable, Phase, ThrottleError, ThrottlePhaseController};

mod peer;
pub use peer::{AimdPolicy, BadPeerFlowController};

mod sched;
pub use sched::{FrameSink, PassSummary, SchedDriver, SchedHandle, SchedOptions, TxScheduler, WakeReason};

mod stats;
pub use stats::SchedStats;

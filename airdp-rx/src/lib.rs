//! Receive buffer ring lifecycle management.
//!
//! A fixed-capacity [`RxBufferRing`] tracks buffers posted to the hardware
//! through a physical-address hash table, so the receive completion path can
//! recover the matching buffer handle in O(1). The [`RingRefiller`] keeps the
//! ring topped up to its fill target, retrying allocation failures with a
//! capped backoff, while an independent watchdog catches stalled rings.

mod ring;
pub use ring::{PhysAddr, RingError, RxBufferRing};

mod refill;
pub use refill::{spawn_watchdog, BufferAllocator, RefillError, RefillOptions, RingRefiller};

mod stats;
pub use stats::RingStats;

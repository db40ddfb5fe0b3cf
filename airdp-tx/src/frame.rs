use bytes::Bytes;

/// A destination identity: a peer or a virtual-interface endpoint that owns
/// one or more transmit queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestId(pub u32);

impl std::fmt::Display for DestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "dest-{}", self.0)
    }
}

/// A traffic class (TID) tag. Valid values are `0..NUM_CLASSES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrafficClass(u8);

impl TrafficClass {
    /// Number of traffic classes.
    pub const NUM_CLASSES: u8 = 8;

    /// Best-effort traffic.
    pub const BEST_EFFORT: Self = Self(0);

    /// Creates a traffic class, clamping to the valid range.
    pub fn new(tid: u8) -> Self {
        Self(tid.min(Self::NUM_CLASSES - 1))
    }

    /// Returns the raw TID value.
    pub fn tid(&self) -> u8 {
        self.0
    }
}

/// One outbound packet awaiting transmission.
///
/// A frame is exclusively owned by the queue it is enqueued in; ownership
/// moves to the transport layer at dequeue time.
#[derive(Debug, Clone)]
pub struct Frame {
    dest: DestId,
    tid: TrafficClass,
    payload: Bytes,
}

impl Frame {
    pub fn new(dest: DestId, tid: TrafficClass, payload: Bytes) -> Self {
        Self { dest, tid, payload }
    }

    /// The destination this frame is addressed to.
    pub fn dest(&self) -> DestId {
        self.dest
    }

    /// The traffic class tag.
    pub fn tid(&self) -> TrafficClass {
        self.tid
    }

    /// The payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consumes the frame, returning the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The credit cost of transmitting this frame: at least one unit, plus
    /// one unit per `credit_unit` bytes of payload beyond the first.
    pub fn credit_cost(&self, credit_unit: usize) -> usize {
        debug_assert!(credit_unit > 0);
        self.payload.len().div_ceil(credit_unit).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_cost_is_monotonic_and_nonzero() {
        let frame = |n: usize| {
            Frame::new(DestId(1), TrafficClass::BEST_EFFORT, Bytes::from(vec![0u8; n]))
        };

        assert_eq!(frame(0).credit_cost(512), 1);
        assert_eq!(frame(512).credit_cost(512), 1);
        assert_eq!(frame(513).credit_cost(512), 2);
        assert_eq!(frame(4096).credit_cost(512), 8);
    }
}

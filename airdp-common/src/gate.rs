use std::sync::atomic::{AtomicU8, Ordering};

/// The independent reasons the global transmit gate can be held closed.
/// Channels are ORed together: the gate is closed while any channel is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PauseChannel {
    /// Duty-cycle throttling (phase OFF).
    Throttle = 0b01,
    /// Thermal mitigation.
    Thermal = 0b10,
}

/// The global pause/unpause gate consulted by the scheduler before admitting
/// frames. Readers only ever do a single atomic load; the throttle phase
/// controller is the sole writer of the bits it owns.
#[derive(Debug, Default)]
pub struct PauseGate {
    channels: AtomicU8,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses the given channel. Idempotent.
    #[inline]
    pub fn pause(&self, channel: PauseChannel) {
        self.channels.fetch_or(channel as u8, Ordering::Release);
    }

    /// Unpauses the given channel. Other channels keep the gate closed.
    #[inline]
    pub fn unpause(&self, channel: PauseChannel) {
        self.channels.fetch_and(!(channel as u8), Ordering::Release);
    }

    /// Returns `true` if any channel currently holds the gate closed.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.channels.load(Ordering::Acquire) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_independent() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());

        gate.pause(PauseChannel::Throttle);
        gate.pause(PauseChannel::Thermal);
        assert!(gate.is_paused());

        gate.unpause(PauseChannel::Throttle);
        assert!(gate.is_paused());

        gate.unpause(PauseChannel::Thermal);
        assert!(!gate.is_paused());
    }
}

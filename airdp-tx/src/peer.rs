use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::frame::DestId;

/// Knobs for the adaptive per-destination cap: additive increase toward the
/// registered ceiling, multiplicative decrease under congestion.
///
/// The specific numbers are policy, not contract; tune them to the medium.
#[derive(Debug, Clone, Copy)]
pub struct AimdPolicy {
    /// Frames added to the cap per uncongested pass at the cap.
    pub increase_step: usize,
    /// Right-shift applied to the cap when the destination stays congested.
    pub decrease_shift: u32,
    /// The cap never drops below this floor.
    pub min_cap: usize,
}

impl Default for AimdPolicy {
    fn default() -> Self {
        Self { increase_step: 1, decrease_shift: 1, min_cap: 1 }
    }
}

#[derive(Debug)]
struct PeerLimit {
    /// Current per-pass frame allowance.
    cap: usize,
    /// The cap registered by the control layer; relaxation stops here.
    ceiling: usize,
}

/// Caps the dequeue allowance of destinations flagged by an external
/// congestion signal as degrading other destinations' throughput, without a
/// full queue pause.
///
/// Unflagged destinations pass through untouched.
#[derive(Debug)]
pub struct BadPeerFlowController {
    limits: Mutex<FxHashMap<DestId, PeerLimit>>,
    policy: AimdPolicy,
}

impl Default for BadPeerFlowController {
    fn default() -> Self {
        Self::new(AimdPolicy::default())
    }
}

impl BadPeerFlowController {
    pub fn new(policy: AimdPolicy) -> Self {
        Self { limits: Mutex::new(FxHashMap::default()), policy }
    }

    /// Registers a per-pass frame cap for a destination. Subsequent scheduler
    /// passes use `min(requested, cap)` for it.
    pub fn add_limit(&self, dest: DestId, cap: usize) {
        let cap = cap.max(self.policy.min_cap);
        debug!(%dest, cap, "Limiting bad peer");
        self.limits.lock().insert(dest, PeerLimit { cap, ceiling: cap });
    }

    /// Removes the cap, restoring default scheduling behavior.
    pub fn remove_limit(&self, dest: DestId) {
        if self.limits.lock().remove(&dest).is_some() {
            debug!(%dest, "Bad peer limit removed");
        }
    }

    /// Returns `true` if the destination currently carries a cap.
    pub fn is_limited(&self, dest: DestId) -> bool {
        self.limits.lock().contains_key(&dest)
    }

    /// Clips a requested dequeue allowance to the destination's cap.
    /// The second element reports whether clipping actually occurred, which
    /// the scheduler feeds back through [`update_tx_limit`](Self::update_tx_limit).
    pub fn dequeue_quota(&self, dest: DestId, requested: usize) -> (usize, bool) {
        match self.limits.lock().get(&dest) {
            Some(limit) if limit.cap < requested => {
                trace!(%dest, requested, cap = limit.cap, "Dequeue clipped for bad peer");
                (limit.cap, true)
            }
            _ => (requested, false),
        }
    }

    /// Adaptive feedback after a scheduler pass. An uncongested destination
    /// transmitting at its cap is relaxed toward the registered ceiling; a
    /// destination that was clipped and still filled its allowance is
    /// tightened.
    pub fn update_tx_limit(&self, dest: DestId, frames_sent: usize, limited: bool) {
        let mut limits = self.limits.lock();
        let Some(limit) = limits.get_mut(&dest) else {
            return;
        };

        if limited && frames_sent >= limit.cap {
            limit.cap = (limit.cap >> self.policy.decrease_shift).max(self.policy.min_cap);
            trace!(%dest, cap = limit.cap, "Tightened bad peer cap");
        } else if !limited && frames_sent >= limit.cap {
            limit.cap = (limit.cap + self.policy.increase_step).min(limit.ceiling);
            trace!(%dest, cap = limit.cap, "Relaxed bad peer cap");
        }
    }
}

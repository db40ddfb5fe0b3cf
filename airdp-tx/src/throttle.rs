use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use airdp_common::{PauseChannel, PauseGate};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::sched::{SchedHandle, WakeReason};

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("invalid throttle level {level}, table has {levels} levels")]
    InvalidLevel { level: usize, levels: usize },
    #[error("duty cycle percentage {0} out of range")]
    InvalidPercent(u8),
    /// A table needs at least level 0, the disabled level.
    #[error("duty cycle table has no levels")]
    EmptyTable,
}

/// Current state of the global transmit gate as driven by throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Transmit permitted.
    On,
    /// Transmit paused.
    Off,
}

/// ON/OFF durations for one throttle level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycle {
    pub on: Duration,
    pub off: Duration,
}

/// Per-level duty cycles derived from a period and an ON percentage.
/// Level 0 means throttling disabled and is always 100% on.
#[derive(Debug, Clone)]
pub struct DutyCycleTable {
    period: Duration,
    levels: Vec<DutyCycle>,
}

impl DutyCycleTable {
    /// Derives per-level ON/OFF durations such that `on + off == period`
    /// exactly for every level.
    pub fn from_percentages(period: Duration, percent_on: &[u8]) -> Result<Self, ThrottleError> {
        if percent_on.is_empty() {
            return Err(ThrottleError::EmptyTable);
        }

        let period_ms = period.as_millis() as u64;
        let mut levels = Vec::with_capacity(percent_on.len());

        for (level, &pct) in percent_on.iter().enumerate() {
            if pct > 100 {
                return Err(ThrottleError::InvalidPercent(pct));
            }
            let pct = if level == 0 { 100 } else { u64::from(pct) };
            let on_ms = period_ms * pct / 100;
            levels.push(DutyCycle {
                on: Duration::from_millis(on_ms),
                off: Duration::from_millis(period_ms - on_ms),
            });
        }

        Ok(Self { period, levels })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Number of configured levels.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn duty(&self, level: usize) -> DutyCycle {
        self.levels[level.min(self.levels.len() - 1)]
    }
}

impl Default for DutyCycleTable {
    /// Four levels over a 4 second period: disabled, 50%, 25% and 10% on.
    fn default() -> Self {
        Self::from_percentages(Duration::from_secs(4), &[100, 50, 25, 10])
            .expect("static table is valid")
    }
}

/// The timer-driven duty-cycle state machine that globally pauses and
/// unpauses transmission, one instance per physical device.
///
/// This is the only component that flips the [`PauseChannel::Throttle`] bit
/// of the gate the scheduler consults. Phase is toggled exclusively by the
/// phase timer task; `set_level` serializes against it by stopping the timer
/// before installing new state.
pub struct ThrottlePhaseController {
    shared: Arc<ThrottleShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

struct ThrottleShared {
    /// Readers (the scheduler's gate check) take a single atomic load.
    phase_on: AtomicBool,
    level: AtomicUsize,
    table: Mutex<DutyCycleTable>,
    gate: Arc<PauseGate>,
    waker: Mutex<Option<SchedHandle>>,
}

impl ThrottleShared {
    fn enter_on_phase(&self) {
        self.phase_on.store(true, Ordering::Release);
        self.gate.unpause(PauseChannel::Throttle);
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.wake(WakeReason::PhaseOn);
        }
        trace!("Throttle phase ON");
    }

    fn enter_off_phase(&self) {
        self.phase_on.store(false, Ordering::Release);
        self.gate.pause(PauseChannel::Throttle);
        trace!("Throttle phase OFF");
    }
}

impl std::fmt::Debug for ThrottlePhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottlePhaseController")
            .field("level", &self.level())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl ThrottlePhaseController {
    /// Creates the controller at level 0, phase ON, timer inactive.
    pub fn new(gate: Arc<PauseGate>, table: DutyCycleTable) -> Self {
        Self {
            shared: Arc::new(ThrottleShared {
                phase_on: AtomicBool::new(true),
                level: AtomicUsize::new(0),
                table: Mutex::new(table),
                gate,
                waker: Mutex::new(None),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Registers the scheduler handle woken on OFF→ON transitions.
    pub fn set_scheduler(&self, handle: SchedHandle) {
        *self.shared.waker.lock() = Some(handle);
    }

    pub fn phase(&self) -> Phase {
        if self.shared.phase_on.load(Ordering::Acquire) { Phase::On } else { Phase::Off }
    }

    pub fn level(&self) -> usize {
        self.shared.level.load(Ordering::Acquire)
    }

    /// Replaces the duty-cycle table. Takes effect from the next phase
    /// boundary; the current level is kept.
    pub fn configure_duty_cycle(
        &self,
        period: Duration,
        percent_on: &[u8],
    ) -> Result<(), ThrottleError> {
        let table = DutyCycleTable::from_percentages(period, percent_on)?;
        *self.shared.table.lock() = table;
        Ok(())
    }

    /// Moves to the given throttle level.
    ///
    /// Level 0 forces phase ON, unpauses the gate and cancels the timer.
    /// Any other level forces phase OFF immediately and arms the phase timer
    /// for that level's OFF duration; the timer task is spawned on the
    /// ambient tokio runtime.
    pub fn set_level(&self, level: usize) -> Result<(), ThrottleError> {
        let levels = self.shared.table.lock().len();
        if level >= levels {
            return Err(ThrottleError::InvalidLevel { level, levels });
        }

        // Stop the running phase timer before installing new state.
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }

        self.shared.level.store(level, Ordering::Release);

        if level == 0 {
            self.shared.enter_on_phase();
            debug!("Throttling disabled");
        } else {
            self.shared.enter_off_phase();
            let shared = Arc::clone(&self.shared);
            *self.timer.lock() = Some(tokio::spawn(phase_timer(shared)));
            debug!(level, "Throttling enabled");
        }

        Ok(())
    }
}

impl Drop for ThrottlePhaseController {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

/// Advances the phase at each boundary, re-arming for the new phase's
/// duration at the current level. Self-cancels if the level drops to 0.
async fn phase_timer(shared: Arc<ThrottleShared>) {
    loop {
        let level = shared.level.load(Ordering::Acquire);
        if level == 0 {
            break;
        }
        let duty = shared.table.lock().duty(level);

        tokio::time::sleep(duty.off).await;
        shared.enter_on_phase();

        tokio::time::sleep(duty.on).await;
        shared.enter_off_phase();
    }
}

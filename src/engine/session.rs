//! Shared session state: phase cell and cumulative duration counter

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use tracing::debug;

use crate::domain::errors::DomainError;
use crate::domain::model::{Phase, PhaseEvent, ProgressSnapshot};
use crate::domain::rules::PhaseRules;

/// Lock-free cell holding the current [`Phase`]
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(Phase::Idle)
    }

    /// Take the edge for `event` from whatever the current phase is.
    ///
    /// Retries when another thread moved the phase between load and swap.
    pub fn apply(&self, event: PhaseEvent) -> Result<(Phase, Phase), DomainError> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = Phase::from_u8(current).unwrap_or(Phase::Idle);
            let to = PhaseRules::apply(from, event)?;
            match self
                .0
                .compare_exchange_weak(current, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    debug!(%from, %to, %event, "Phase transition");
                    return Ok((from, to));
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Unconditional reset after a fatal failure
    pub fn force(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

/// State shared between the control thread, the drain loop and the stitcher
#[derive(Debug)]
pub struct SessionState {
    phase: PhaseCell,
    recorded_us: AtomicU64,
    cap_us: u64,
    format_ready: AtomicBool,
}

impl SessionState {
    pub fn new(cap_us: u64) -> Self {
        Self {
            phase: PhaseCell::new(Phase::Idle),
            recorded_us: AtomicU64::new(0),
            cap_us,
            format_ready: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.load()
    }

    pub fn phase_cell(&self) -> &PhaseCell {
        &self.phase
    }

    pub fn cap_us(&self) -> u64 {
        self.cap_us
    }

    /// Cumulative encoded media time of the session
    pub fn recorded_us(&self) -> u64 {
        self.recorded_us.load(Ordering::Acquire)
    }

    pub fn cap_reached(&self) -> bool {
        self.recorded_us() >= self.cap_us
    }

    /// Add a non-negative media-time delta; written by the drain loop only
    pub(crate) fn add_recorded(&self, delta_us: u64) -> u64 {
        self.recorded_us.fetch_add(delta_us, Ordering::AcqRel) + delta_us
    }

    /// Zero the counter once the session is over
    pub(crate) fn reset_recorded(&self) {
        self.recorded_us.store(0, Ordering::Release);
    }

    /// Unconditional phase reset after a fatal failure
    pub(crate) fn force(&self, phase: Phase) {
        self.phase.force(phase);
    }

    pub fn format_ready(&self) -> bool {
        self.format_ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_format_ready(&self, ready: bool) {
        self.format_ready.store(ready, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.phase(),
            recorded_us: self.recorded_us(),
            cap_us: self.cap_us,
        }
    }
}

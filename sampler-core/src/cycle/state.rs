//! Interrupt-safe cycle state flag.
//!
//! `start()` runs from the cooperative event loop while batch completion runs
//! from the transfer-complete interrupt, so every transition is a single
//! compare-and-swap on an atomic byte. `portable-atomic` supplies the CAS on
//! cores without native support (Cortex-M0+) through `critical-section`.

use portable_atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;
const FINALIZING: u8 = 2;

/// Phases of one sampling cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleState {
    /// No peripheral is running.
    Idle,
    /// Trigger, router, converter and transfer engine are running.
    Active,
    /// Buffer is full; peripherals are being stopped and the average computed.
    Finalizing,
}

impl CycleState {
    /// Returns `true` while hardware belongs to a cycle.
    pub const fn is_running(self) -> bool {
        matches!(self, CycleState::Active | CycleState::Finalizing)
    }

    const fn to_raw(self) -> u8 {
        match self {
            CycleState::Idle => IDLE,
            CycleState::Active => ACTIVE,
            CycleState::Finalizing => FINALIZING,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            ACTIVE => CycleState::Active,
            FINALIZING => CycleState::Finalizing,
            _ => CycleState::Idle,
        }
    }
}

/// Single-byte state cell shared between thread mode and interrupt context.
#[derive(Debug)]
pub struct CycleCell {
    raw: AtomicU8,
}

impl CycleCell {
    pub const fn new() -> Self {
        Self {
            raw: AtomicU8::new(IDLE),
        }
    }

    pub fn load(&self) -> CycleState {
        CycleState::from_raw(self.raw.load(Ordering::Acquire))
    }

    /// Moves `Idle -> Active`, returning the observed state when busy.
    pub fn try_activate(&self) -> Result<(), CycleState> {
        self.transition(CycleState::Idle, CycleState::Active)
    }

    /// Moves `Active -> Finalizing`.
    pub fn try_finalize(&self) -> Result<(), CycleState> {
        self.transition(CycleState::Active, CycleState::Finalizing)
    }

    /// Forces the cell back to idle and returns the previous state.
    pub fn reset(&self) -> CycleState {
        CycleState::from_raw(self.raw.swap(IDLE, Ordering::AcqRel))
    }

    fn transition(&self, from: CycleState, to: CycleState) -> Result<(), CycleState> {
        self.raw
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CycleState::from_raw)
    }
}

impl Default for CycleCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_only_succeeds_from_idle() {
        let cell = CycleCell::new();
        assert_eq!(cell.try_activate(), Ok(()));
        assert_eq!(cell.try_activate(), Err(CycleState::Active));
        assert_eq!(cell.load(), CycleState::Active);
    }

    #[test]
    fn finalize_requires_active() {
        let cell = CycleCell::new();
        assert_eq!(cell.try_finalize(), Err(CycleState::Idle));

        cell.try_activate().unwrap();
        assert_eq!(cell.try_finalize(), Ok(()));
        assert_eq!(cell.load(), CycleState::Finalizing);
        assert_eq!(cell.try_activate(), Err(CycleState::Finalizing));
    }

    #[test]
    fn reset_reports_previous_state() {
        let cell = CycleCell::new();
        assert_eq!(cell.reset(), CycleState::Idle);

        cell.try_activate().unwrap();
        assert_eq!(cell.reset(), CycleState::Active);
        assert_eq!(cell.load(), CycleState::Idle);
    }
}

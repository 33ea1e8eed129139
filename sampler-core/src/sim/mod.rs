//! Simulated peripheral bench for host builds and tests.
//!
//! [`SimulatedBench`] models the hardware chain well enough to exercise the
//! sampling cycle without an MCU: a trigger pulse only produces a sample when
//! the trigger is armed, the router is connected, the converter is in
//! triggered mode and the transfer engine is armed. The transfer engine halts
//! itself after `N` samples and reports completion, like the DMA controller
//! does. Time only moves when [`SimulatedBench::advance`] is called, which is
//! also when a scheduled rail release fires.
//!
//! All state lives in `Cell`s so several [`BenchPort`] handles can share one
//! bench; the sample buffer sits in its own `RefCell` so a borrowed batch can
//! be finalized while the ports keep working.

use core::cell::{Cell, Ref, RefCell};
use core::time::Duration;

use crate::config::{AnalogInput, SAMPLE_COUNT, VoltageReference};
use crate::cycle::{SampleBuffer, SamplingChain};
use crate::peripherals::{
    BatchTransferEngine, ClockDomain, ClockSource, ConversionEngine, EventRouter, HardwareCommand,
    HardwareError, PeriodicTrigger, Peripheral, PowerGate, RawCode,
};

/// What a single trigger pulse did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PulseOutcome {
    /// The trigger is disarmed; nothing happened.
    Ignored,
    /// A conversion ran but nothing captured the result.
    Lost,
    /// The sample landed at `index`.
    Stored { index: usize },
    /// The sample filled the buffer and the engine raised its completion event.
    BatchComplete,
}

/// Running totals kept by the bench.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BenchCounters {
    pub conversions: u32,
    pub lost_samples: u32,
    pub completions: u32,
    pub rail_assertions: u32,
    pub rail_releases: u32,
}

/// Simulated trigger, router, converter, transfer engine, rail and clocks.
#[derive(Debug)]
pub struct SimulatedBench<const N: usize = SAMPLE_COUNT> {
    now: Cell<Duration>,
    clocks: Cell<[bool; ClockSource::ALL.len()]>,
    trigger_frequency: Cell<Option<u32>>,
    trigger_armed: Cell<bool>,
    routed: Cell<bool>,
    converter_input: Cell<Option<(AnalogInput, VoltageReference)>>,
    converter_running: Cell<bool>,
    transfer_armed: Cell<bool>,
    write_index: Cell<usize>,
    rail: Cell<bool>,
    release_at: Cell<Option<Duration>>,
    fail_next: Cell<Option<(Peripheral, Option<HardwareCommand>)>>,
    counters: Cell<BenchCounters>,
    buffer: RefCell<SampleBuffer<N>>,
}

impl<const N: usize> SimulatedBench<N> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            clocks: Cell::new([false; ClockSource::ALL.len()]),
            trigger_frequency: Cell::new(None),
            trigger_armed: Cell::new(false),
            routed: Cell::new(false),
            converter_input: Cell::new(None),
            converter_running: Cell::new(false),
            transfer_armed: Cell::new(false),
            write_index: Cell::new(0),
            rail: Cell::new(false),
            release_at: Cell::new(None),
            fail_next: Cell::new(None),
            counters: Cell::new(BenchCounters::default()),
            buffer: RefCell::new(SampleBuffer::new()),
        }
    }

    /// A handle implementing every peripheral trait against this bench.
    pub fn port(&self) -> BenchPort<'_, N> {
        BenchPort { bench: self }
    }

    /// The four handles the sampling cycle owns.
    pub fn chain(
        &self,
    ) -> SamplingChain<BenchPort<'_, N>, BenchPort<'_, N>, BenchPort<'_, N>, BenchPort<'_, N>> {
        SamplingChain::new(self.port(), self.port(), self.port(), self.port())
    }

    /// Delivers one trigger edge carrying the converter result `raw`.
    pub fn pulse(&self, raw: RawCode) -> PulseOutcome {
        if !self.trigger_armed.get() {
            return PulseOutcome::Ignored;
        }
        if !(self.routed.get() && self.converter_running.get()) {
            self.bump(|c| c.lost_samples += 1);
            return PulseOutcome::Lost;
        }

        self.bump(|c| c.conversions += 1);
        if !self.transfer_armed.get() {
            self.bump(|c| c.lost_samples += 1);
            return PulseOutcome::Lost;
        }

        let index = self.write_index.get();
        self.buffer.borrow_mut().store(index, raw);
        self.write_index.set(index + 1);

        if index + 1 < N {
            return PulseOutcome::Stored { index };
        }

        self.transfer_armed.set(false);
        self.bump(|c| c.completions += 1);
        PulseOutcome::BatchComplete
    }

    /// Moves simulated time forward, firing a due rail release.
    pub fn advance(&self, elapsed: Duration) {
        let now = self.now.get() + elapsed;
        self.now.set(now);
        if self.release_at.get().is_some_and(|deadline| deadline <= now) {
            self.release_at.set(None);
            self.drive_rail(false);
        }
    }

    /// Makes the next command of any kind on `peripheral` fail once.
    pub fn fail_next(&self, peripheral: Peripheral) {
        self.fail_next.set(Some((peripheral, None)));
    }

    /// Makes the next `command` on `peripheral` fail once.
    pub fn fail_next_command(&self, peripheral: Peripheral, command: HardwareCommand) {
        self.fail_next.set(Some((peripheral, Some(command))));
    }

    /// The buffer the transfer engine writes into.
    pub fn batch(&self) -> Ref<'_, SampleBuffer<N>> {
        self.buffer.borrow()
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn counters(&self) -> BenchCounters {
        self.counters.get()
    }

    pub fn clock_enabled(&self, clock: ClockSource) -> bool {
        self.clocks.get()[clock.as_index()]
    }

    pub fn trigger_frequency(&self) -> Option<u32> {
        self.trigger_frequency.get()
    }

    pub fn trigger_armed(&self) -> bool {
        self.trigger_armed.get()
    }

    pub fn routed(&self) -> bool {
        self.routed.get()
    }

    pub fn converter_input(&self) -> Option<(AnalogInput, VoltageReference)> {
        self.converter_input.get()
    }

    pub fn converter_running(&self) -> bool {
        self.converter_running.get()
    }

    pub fn transfer_armed(&self) -> bool {
        self.transfer_armed.get()
    }

    /// Samples written since the transfer engine was last started.
    pub fn filled(&self) -> usize {
        self.write_index.get()
    }

    pub fn rail_asserted(&self) -> bool {
        self.rail.get()
    }

    /// Absolute time of the pending rail release, if any.
    pub fn release_deadline(&self) -> Option<Duration> {
        self.release_at.get()
    }

    fn check(&self, peripheral: Peripheral, command: HardwareCommand) -> Result<(), HardwareError> {
        match self.fail_next.get() {
            Some((target, filter))
                if target == peripheral && filter.is_none_or(|wanted| wanted == command) =>
            {
                self.fail_next.set(None);
                Err(HardwareError::new(peripheral, command))
            }
            _ => Ok(()),
        }
    }

    fn drive_rail(&self, asserted: bool) {
        if self.rail.replace(asserted) != asserted {
            if asserted {
                self.bump(|c| c.rail_assertions += 1);
            } else {
                self.bump(|c| c.rail_releases += 1);
            }
        }
    }

    fn bump(&self, update: impl FnOnce(&mut BenchCounters)) {
        let mut counters = self.counters.get();
        update(&mut counters);
        self.counters.set(counters);
    }
}

impl<const N: usize> Default for SimulatedBench<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle onto a [`SimulatedBench`].
#[derive(Copy, Clone, Debug)]
pub struct BenchPort<'a, const N: usize = SAMPLE_COUNT> {
    bench: &'a SimulatedBench<N>,
}

impl<const N: usize> BenchPort<'_, N> {
    pub fn bench(&self) -> &SimulatedBench<N> {
        self.bench
    }
}

impl<const N: usize> ClockDomain for BenchPort<'_, N> {
    fn enable(&mut self, clock: ClockSource) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::ClockDomain, HardwareCommand::Enable)?;
        let mut clocks = self.bench.clocks.get();
        clocks[clock.as_index()] = true;
        self.bench.clocks.set(clocks);
        Ok(())
    }
}

impl<const N: usize> PowerGate for BenchPort<'_, N> {
    fn assert_rail(&mut self) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::PowerGate, HardwareCommand::Start)?;
        self.bench.drive_rail(true);
        Ok(())
    }

    fn schedule_deassert(&mut self, delay: Duration) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::PowerGate, HardwareCommand::Schedule)?;
        self.bench.release_at.set(Some(self.bench.now.get() + delay));
        Ok(())
    }

    fn release(&mut self) {
        self.bench.release_at.set(None);
        self.bench.drive_rail(false);
    }

    fn is_asserted(&self) -> bool {
        self.bench.rail.get()
    }
}

impl<const N: usize> PeriodicTrigger for BenchPort<'_, N> {
    fn configure(&mut self, frequency_hz: u32) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::PeriodicTrigger, HardwareCommand::Configure)?;
        if frequency_hz == 0 {
            return Err(HardwareError::rejected_configure(Peripheral::PeriodicTrigger));
        }
        self.bench.trigger_frequency.set(Some(frequency_hz));
        Ok(())
    }

    fn arm(&mut self) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::PeriodicTrigger, HardwareCommand::Start)?;
        if self.bench.trigger_frequency.get().is_none() {
            return Err(HardwareError::rejected_start(Peripheral::PeriodicTrigger));
        }
        self.bench.trigger_armed.set(true);
        Ok(())
    }

    fn disarm(&mut self) {
        self.bench.trigger_armed.set(false);
    }
}

impl<const N: usize> EventRouter for BenchPort<'_, N> {
    fn connect(&mut self) {
        self.bench.routed.set(true);
    }
}

impl<const N: usize> ConversionEngine for BenchPort<'_, N> {
    fn configure(
        &mut self,
        input: AnalogInput,
        reference: VoltageReference,
    ) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::ConversionEngine, HardwareCommand::Configure)?;
        self.bench.converter_input.set(Some((input, reference)));
        Ok(())
    }

    fn trigger_once(&mut self) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::ConversionEngine, HardwareCommand::Start)?;
        if self.bench.converter_input.get().is_none() {
            return Err(HardwareError::rejected_start(Peripheral::ConversionEngine));
        }
        self.bench.converter_running.set(true);
        Ok(())
    }

    fn stop(&mut self) {
        self.bench.converter_running.set(false);
    }
}

impl<const N: usize> BatchTransferEngine for BenchPort<'_, N> {
    fn start(&mut self) -> Result<(), HardwareError> {
        self.bench.check(Peripheral::BatchTransferEngine, HardwareCommand::Start)?;
        self.bench.write_index.set(0);
        self.bench.transfer_armed.set(true);
        Ok(())
    }

    fn stop(&mut self) {
        self.bench.transfer_armed.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed_bench() -> SimulatedBench<4> {
        let bench = SimulatedBench::<4>::new();
        let mut port = bench.port();
        PeriodicTrigger::configure(&mut port, 50).unwrap();
        port.connect();
        ConversionEngine::configure(&mut port, AnalogInput::new(2), VoltageReference::Supply)
            .unwrap();
        port.arm().unwrap();
        BatchTransferEngine::start(&mut port).unwrap();
        port.trigger_once().unwrap();
        bench
    }

    #[test]
    fn pulses_fill_buffer_until_completion() {
        let bench = armed_bench();

        assert_eq!(bench.pulse(10), PulseOutcome::Stored { index: 0 });
        assert_eq!(bench.pulse(11), PulseOutcome::Stored { index: 1 });
        assert_eq!(bench.pulse(12), PulseOutcome::Stored { index: 2 });
        assert_eq!(bench.pulse(13), PulseOutcome::BatchComplete);

        assert!(!bench.transfer_armed());
        assert_eq!(bench.batch().as_slice(), &[10, 11, 12, 13]);
        assert_eq!(bench.counters().completions, 1);

        // The engine halted itself; further conversions are not captured.
        assert_eq!(bench.pulse(14), PulseOutcome::Lost);
        assert_eq!(bench.batch().as_slice(), &[10, 11, 12, 13]);
    }

    #[test]
    fn disarmed_trigger_ignores_pulses() {
        let bench = SimulatedBench::<4>::new();
        assert_eq!(bench.pulse(1), PulseOutcome::Ignored);
        assert_eq!(bench.counters(), BenchCounters::default());
    }

    #[test]
    fn rail_release_fires_once_at_deadline() {
        let bench = SimulatedBench::<4>::new();
        let mut port = bench.port();
        port.assert_rail().unwrap();
        port.schedule_deassert(Duration::from_millis(5)).unwrap();

        bench.advance(Duration::from_millis(4));
        assert!(bench.rail_asserted());
        bench.advance(Duration::from_millis(1));
        assert!(!bench.rail_asserted());
        assert_eq!(bench.release_deadline(), None);
        assert_eq!(bench.counters().rail_releases, 1);
    }

    #[test]
    fn injected_failure_applies_once() {
        let bench = SimulatedBench::<4>::new();
        let mut port = bench.port();
        bench.fail_next(Peripheral::BatchTransferEngine);

        assert_eq!(
            BatchTransferEngine::start(&mut port),
            Err(HardwareError::rejected_start(Peripheral::BatchTransferEngine))
        );
        assert_eq!(BatchTransferEngine::start(&mut port), Ok(()));
    }
}

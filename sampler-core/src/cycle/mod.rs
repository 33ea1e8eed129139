//! Sampling cycle state machine.
//!
//! A cycle powers the sensor, arms the trigger -> converter -> transfer chain
//! and waits for the transfer engine to report a full buffer. Nothing runs on
//! the CPU between samples. `start` and `stop` are called from the event loop;
//! `complete_batch` is called from the transfer-complete interrupt (or the task
//! standing in for it) and must stay short: it halts the chain, averages the
//! batch and posts the result through the [`ReadingBridge`].

mod batch;
mod state;

pub use batch::{SampleBuffer, average};
pub use state::{CycleCell, CycleState};

use crate::config::{SAMPLE_COUNT, SamplerConfig};
use crate::notify::{AveragedReading, NoopSink, ReadingBridge, ReadySink};
use crate::peripherals::{
    BatchTransferEngine, ClockDomain, ClockSource, ConversionEngine, EventRouter, HardwareError,
    PeriodicTrigger, PowerGate,
};

/// Result of a `start` request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartOutcome {
    /// All peripherals were armed; a batch is being collected.
    Started,
    /// A cycle was already in progress; nothing was touched.
    AlreadyRunning,
}

/// Result of a `stop` request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopOutcome {
    /// An active cycle was halted and its partial batch discarded.
    Halted,
    /// No cycle was running.
    AlreadyIdle,
}

/// Lifetime counters, reported by the status console.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CycleCounters {
    pub started: u32,
    pub completed: u32,
    pub aborted: u32,
    pub start_failures: u32,
}

/// Hardware the sampling cycle drives on every activation.
///
/// Clocks and the event router are only touched during bring-up, so they are
/// passed to [`SamplingCycle::initialize`] instead of being held here.
#[derive(Debug)]
pub struct SamplingChain<G, T, C, B> {
    pub power: G,
    pub trigger: T,
    pub converter: C,
    pub transfer: B,
}

impl<G, T, C, B> SamplingChain<G, T, C, B> {
    pub const fn new(power: G, trigger: T, converter: C, transfer: B) -> Self {
        Self {
            power,
            trigger,
            converter,
            transfer,
        }
    }
}

/// Control surface the link layer drives. Implemented by [`SamplingCycle`] and
/// by firmware wrappers that own the cycle behind a lock.
pub trait CycleControl {
    fn start(&mut self) -> Result<StartOutcome, HardwareError>;

    fn stop(&mut self) -> StopOutcome;

    fn state(&self) -> CycleState;
}

/// One batch-and-average cycle over a peripheral chain.
pub struct SamplingCycle<'a, G, T, C, B, S = NoopSink, const N: usize = SAMPLE_COUNT>
where
    S: ReadySink,
{
    chain: SamplingChain<G, T, C, B>,
    bridge: &'a ReadingBridge<S>,
    config: SamplerConfig,
    state: CycleCell,
    counters: CycleCounters,
    latest: Option<AveragedReading>,
}

impl<'a, G, T, C, B, S, const N: usize> SamplingCycle<'a, G, T, C, B, S, N>
where
    G: PowerGate,
    T: PeriodicTrigger,
    C: ConversionEngine,
    B: BatchTransferEngine,
    S: ReadySink,
{
    pub fn new(
        chain: SamplingChain<G, T, C, B>,
        bridge: &'a ReadingBridge<S>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            chain,
            bridge,
            config,
            state: CycleCell::new(),
            counters: CycleCounters::default(),
            latest: None,
        }
    }

    /// One-time bring-up: clocks, trigger rate, routing, converter input, and
    /// the sensor rail driven low.
    ///
    /// Leaves every engine disarmed; call [`Self::start`] to begin sampling.
    pub fn initialize<K, R>(&mut self, clocks: &mut K, router: &mut R) -> Result<(), HardwareError>
    where
        K: ClockDomain,
        R: EventRouter,
    {
        for clock in ClockSource::ALL {
            clocks.enable(clock)?;
        }

        self.chain.trigger.configure(self.config.frequency_hz())?;
        router.connect();
        self.chain
            .converter
            .configure(self.config.input(), self.config.reference())?;
        self.chain.power.release();
        Ok(())
    }

    /// Begins a cycle. Idempotent while a cycle is in progress.
    ///
    /// Powers the sensor and schedules the rail release, then arms the trigger,
    /// the transfer engine and the converter. If any peripheral refuses, every
    /// engine is halted and the cycle returns to idle.
    pub fn start(&mut self) -> Result<StartOutcome, HardwareError> {
        if self.state.try_activate().is_err() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        match self.arm_chain() {
            Ok(()) => {
                self.counters.started = self.counters.started.wrapping_add(1);
                Ok(StartOutcome::Started)
            }
            Err(error) => {
                self.halt_engines();
                self.state.reset();
                self.counters.start_failures = self.counters.start_failures.wrapping_add(1);
                Err(error)
            }
        }
    }

    /// Halts the chain and discards any partial batch. Idempotent.
    ///
    /// The sensor rail follows its own schedule and is left alone.
    pub fn stop(&mut self) -> StopOutcome {
        if !self.state.load().is_running() {
            return StopOutcome::AlreadyIdle;
        }

        self.halt_engines();
        self.state.reset();
        self.counters.aborted = self.counters.aborted.wrapping_add(1);
        StopOutcome::Halted
    }

    /// Finalizes a full batch reported by the transfer engine.
    ///
    /// Returns `None` without touching anything when no cycle is active, which
    /// covers a completion racing a `stop`. Otherwise disarms the trigger,
    /// stops the converter, averages the batch, returns to idle and only then
    /// signals the event loop, so the loop may immediately start another cycle.
    pub fn complete_batch(&mut self, batch: &SampleBuffer<N>) -> Option<AveragedReading> {
        self.state.try_finalize().ok()?;

        self.chain.trigger.disarm();
        self.chain.converter.stop();

        self.counters.completed = self.counters.completed.wrapping_add(1);
        let reading = AveragedReading::new(
            batch.average(self.config.scale()),
            self.counters.completed,
        );
        self.latest = Some(reading);

        self.state.reset();
        self.bridge.signal(reading);
        Some(reading)
    }

    pub fn state(&self) -> CycleState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state.load().is_running()
    }

    /// Reading produced by the most recent completed batch.
    pub fn latest(&self) -> Option<AveragedReading> {
        self.latest
    }

    pub fn counters(&self) -> CycleCounters {
        self.counters
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn bridge(&self) -> &'a ReadingBridge<S> {
        self.bridge
    }

    pub fn chain(&self) -> &SamplingChain<G, T, C, B> {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut SamplingChain<G, T, C, B> {
        &mut self.chain
    }

    fn arm_chain(&mut self) -> Result<(), HardwareError> {
        self.chain.power.assert_rail()?;
        if let Err(error) = self.chain.power.schedule_deassert(self.config.settle()) {
            self.chain.power.release();
            return Err(error);
        }

        self.chain.trigger.arm()?;
        self.chain.transfer.start()?;
        self.chain.converter.trigger_once()?;
        Ok(())
    }

    fn halt_engines(&mut self) {
        self.chain.trigger.disarm();
        self.chain.transfer.stop();
        self.chain.converter.stop();
    }
}

impl<G, T, C, B, S, const N: usize> CycleControl for SamplingCycle<'_, G, T, C, B, S, N>
where
    G: PowerGate,
    T: PeriodicTrigger,
    C: ConversionEngine,
    B: BatchTransferEngine,
    S: ReadySink,
{
    fn start(&mut self) -> Result<StartOutcome, HardwareError> {
        SamplingCycle::start(self)
    }

    fn stop(&mut self) -> StopOutcome {
        SamplingCycle::stop(self)
    }

    fn state(&self) -> CycleState {
        SamplingCycle::state(self)
    }
}

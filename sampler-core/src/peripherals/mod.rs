//! Capability traits for the peripherals that make up one sampling chain.
//!
//! The sampling cycle never touches registers directly. Firmware provides
//! implementations backed by the MCU timer, converter and DMA controller; the
//! [`sim`](crate::sim) module provides simulated ones for the host.

use core::fmt;
use core::time::Duration;

use crate::config::{AnalogInput, VoltageReference};

/// Raw, unscaled converter output.
pub type RawCode = u16;

/// Identifies the peripheral that rejected a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Peripheral {
    ClockDomain,
    PowerGate,
    PeriodicTrigger,
    EventRouter,
    ConversionEngine,
    BatchTransferEngine,
}

impl Peripheral {
    /// Short label used in logs and console output.
    pub const fn label(self) -> &'static str {
        match self {
            Peripheral::ClockDomain => "clocks",
            Peripheral::PowerGate => "power-gate",
            Peripheral::PeriodicTrigger => "trigger",
            Peripheral::EventRouter => "router",
            Peripheral::ConversionEngine => "converter",
            Peripheral::BatchTransferEngine => "transfer",
        }
    }
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Command a peripheral refused to carry out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HardwareCommand {
    Enable,
    Configure,
    Start,
    Schedule,
}

/// A peripheral refused a configuration or start command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HardwareError {
    pub peripheral: Peripheral,
    pub command: HardwareCommand,
}

impl HardwareError {
    pub const fn new(peripheral: Peripheral, command: HardwareCommand) -> Self {
        Self {
            peripheral,
            command,
        }
    }

    pub const fn rejected_start(peripheral: Peripheral) -> Self {
        Self::new(peripheral, HardwareCommand::Start)
    }

    pub const fn rejected_configure(peripheral: Peripheral) -> Self {
        Self::new(peripheral, HardwareCommand::Configure)
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rejected {:?}", self.peripheral, self.command)
    }
}

/// Clock trees a sampling chain depends on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockSource {
    Gpio,
    Trigger,
    EventRouter,
    Converter,
    Transfer,
}

impl ClockSource {
    /// Every clock the chain needs, in bring-up order.
    pub const ALL: [ClockSource; 5] = [
        ClockSource::Gpio,
        ClockSource::Trigger,
        ClockSource::EventRouter,
        ClockSource::Converter,
        ClockSource::Transfer,
    ];

    pub const fn as_index(self) -> usize {
        match self {
            ClockSource::Gpio => 0,
            ClockSource::Trigger => 1,
            ClockSource::EventRouter => 2,
            ClockSource::Converter => 3,
            ClockSource::Transfer => 4,
        }
    }
}

/// Enables and routes the oscillators feeding each peripheral.
pub trait ClockDomain {
    fn enable(&mut self, clock: ClockSource) -> Result<(), HardwareError>;
}

/// Sensor supply rail with a one-shot delayed release.
pub trait PowerGate {
    /// Drives the rail active immediately.
    fn assert_rail(&mut self) -> Result<(), HardwareError>;

    /// Releases the rail after `delay`, replacing any release already pending.
    fn schedule_deassert(&mut self, delay: Duration) -> Result<(), HardwareError>;

    /// Drives the rail inactive immediately and cancels any pending release.
    fn release(&mut self);

    /// Reports whether the rail is currently driven.
    fn is_asserted(&self) -> bool;
}

/// Free-running pulse generator that paces conversions.
pub trait PeriodicTrigger {
    fn configure(&mut self, frequency_hz: u32) -> Result<(), HardwareError>;

    fn arm(&mut self) -> Result<(), HardwareError>;

    fn disarm(&mut self);
}

/// Static wiring from the trigger output to the converter trigger input.
pub trait EventRouter {
    fn connect(&mut self);
}

/// Converts the analog input once per routed trigger edge.
pub trait ConversionEngine {
    fn configure(
        &mut self,
        input: AnalogInput,
        reference: VoltageReference,
    ) -> Result<(), HardwareError>;

    /// Enters triggered mode; one conversion per incoming edge from now on.
    fn trigger_once(&mut self) -> Result<(), HardwareError>;

    fn stop(&mut self);
}

/// Copies converter output into the sample buffer without CPU involvement.
pub trait BatchTransferEngine {
    /// Rewinds the write index to zero and arms the engine.
    fn start(&mut self) -> Result<(), HardwareError>;

    /// Halts unconditionally, discarding any partial fill.
    fn stop(&mut self);
}

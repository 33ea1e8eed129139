//! Sensor supply rail.

use core::time::Duration;

use embassy_stm32::gpio::Output;
use embassy_time::Instant;
use sampler_core::peripherals::{HardwareError, PowerGate};

use super::{ReleaseSignal, core_duration_to_embassy};

/// GPIO-switched sensor supply. Deferred releases are carried out by the
/// rail task, which owns the timer.
pub struct SensorRail {
    pin: Output<'static>,
    release_at: &'static ReleaseSignal,
}

impl SensorRail {
    pub fn new(pin: Output<'static>, release_at: &'static ReleaseSignal) -> Self {
        Self { pin, release_at }
    }
}

impl PowerGate for SensorRail {
    fn assert_rail(&mut self) -> Result<(), HardwareError> {
        self.pin.set_high();
        Ok(())
    }

    fn schedule_deassert(&mut self, delay: Duration) -> Result<(), HardwareError> {
        self.release_at
            .signal(Some(Instant::now() + core_duration_to_embassy(delay)));
        Ok(())
    }

    fn release(&mut self) {
        self.pin.set_low();
        self.release_at.signal(None);
    }

    fn is_asserted(&self) -> bool {
        self.pin.is_set_high()
    }
}

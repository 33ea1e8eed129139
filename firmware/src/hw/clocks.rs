//! Peripheral clock gating through RCC.

use embassy_stm32::pac;
use sampler_core::peripherals::{ClockDomain, ClockSource, HardwareError};

/// Enables the bus clocks of each block in the sampling chain.
pub struct RccClocks;

impl ClockDomain for RccClocks {
    fn enable(&mut self, clock: ClockSource) -> Result<(), HardwareError> {
        let rcc = pac::RCC;
        match clock {
            ClockSource::Gpio => rcc.iopenr().modify(|w| w.set_gpioaen(true)),
            ClockSource::Trigger => rcc.apbenr1().modify(|w| w.set_tim3en(true)),
            // The ADC trigger mux sits behind SYSCFG.
            ClockSource::EventRouter => rcc.apbenr2().modify(|w| w.set_syscfgen(true)),
            ClockSource::Converter => rcc.apbenr2().modify(|w| w.set_adcen(true)),
            ClockSource::Transfer => rcc.ahbenr().modify(|w| w.set_dma1en(true)),
        }
        Ok(())
    }
}

//! TIM3 as the conversion pacer, and its TRGO route into ADC1.

use embassy_stm32::Peri;
use embassy_stm32::pac;
use embassy_stm32::pac::timer::vals::Mms;
use embassy_stm32::peripherals::TIM3;
use sampler_core::peripherals::{EventRouter, HardwareError, Peripheral, PeriodicTrigger};

use super::{TIMER_CLOCK_HZ, TimerDivisors, route_tim3_trgo};

/// Free-running TIM3 that pulses TRGO on every update event.
pub struct Tim3Trigger {
    _timer: Peri<'static, TIM3>,
    configured: bool,
}

impl Tim3Trigger {
    pub fn new(timer: Peri<'static, TIM3>) -> Self {
        Self {
            _timer: timer,
            configured: false,
        }
    }
}

impl PeriodicTrigger for Tim3Trigger {
    fn configure(&mut self, frequency_hz: u32) -> Result<(), HardwareError> {
        let divisors = TimerDivisors::for_frequency(TIMER_CLOCK_HZ, frequency_hz)
            .ok_or(HardwareError::rejected_configure(Peripheral::PeriodicTrigger))?;

        let tim = pac::TIM3;
        tim.cr1().modify(|w| w.set_cen(false));
        tim.psc().write_value(divisors.prescaler);
        tim.arr().write(|w| w.set_arr(divisors.reload));
        tim.cr2().modify(|w| w.set_mms(Mms::UPDATE));
        // Latch the prescaler before the first run.
        tim.egr().write(|w| w.set_ug(true));
        self.configured = true;
        Ok(())
    }

    fn arm(&mut self) -> Result<(), HardwareError> {
        if !self.configured {
            return Err(HardwareError::rejected_start(Peripheral::PeriodicTrigger));
        }
        let tim = pac::TIM3;
        tim.cnt().write(|w| w.set_cnt(0));
        tim.cr1().modify(|w| w.set_cen(true));
        Ok(())
    }

    fn disarm(&mut self) {
        pac::TIM3.cr1().modify(|w| w.set_cen(false));
    }
}

/// Selects TIM3 TRGO as the ADC1 external trigger, rising edge.
pub struct TriggerRoute;

impl EventRouter for TriggerRoute {
    fn connect(&mut self) {
        pac::ADC1
            .cfgr1()
            .modify(|w| w.0 = route_tim3_trgo(w.0));
    }
}

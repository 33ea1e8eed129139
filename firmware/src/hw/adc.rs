//! ADC1 as a hardware-triggered converter feeding DMA.

use embassy_stm32::Peri;
use embassy_stm32::pac;
use embassy_stm32::pac::adc::regs::{Chselr, Smpr};
use embassy_stm32::peripherals::ADC1;
use sampler_core::config::{AnalogInput, VoltageReference};
use sampler_core::peripherals::{ConversionEngine, HardwareError, Peripheral};

use super::{calibration_cfgr1, channel_select_mask};

/// ADC voltage regulator start-up time (t_ADCVREG_STUP) at 16 MHz.
const REGULATOR_STARTUP_CYCLES: u32 = 320;

/// 160.5 ADC cycles on every channel; the sensor divider is high impedance.
const SAMPLE_TIME_LONGEST: u32 = 0b111;

/// Address of the conversion result register, for the DMA engine.
pub fn data_register() -> *mut u16 {
    pac::ADC1.dr().as_ptr().cast::<u16>()
}

/// ADC1 converting a single regular channel on each external trigger.
///
/// The board ties VREF+ to VDDA, so only [`VoltageReference::Supply`] is
/// accepted.
pub struct AdcConverter {
    _adc: Peri<'static, ADC1>,
    configured: bool,
}

impl AdcConverter {
    pub fn new(adc: Peri<'static, ADC1>) -> Self {
        Self {
            _adc: adc,
            configured: false,
        }
    }

    fn power_up() {
        let adc = pac::ADC1;
        if adc.cr().read().aden() {
            return;
        }
        adc.cr().modify(|w| w.set_advregen(true));
        cortex_m::asm::delay(REGULATOR_STARTUP_CYCLES);

        adc.cfgr1().modify(|w| w.0 = calibration_cfgr1(w.0));
        adc.cr().modify(|w| w.set_adcal(true));
        while adc.cr().read().adcal() {}

        adc.isr().write(|w| w.set_adrdy(true));
        adc.cr().modify(|w| w.set_aden(true));
        while !adc.isr().read().adrdy() {}
    }

    fn halt_conversions() {
        let adc = pac::ADC1;
        if adc.cr().read().adstart() {
            adc.cr().modify(|w| w.set_adstp(true));
            while adc.cr().read().adstart() {}
        }
    }
}

impl ConversionEngine for AdcConverter {
    fn configure(
        &mut self,
        input: AnalogInput,
        reference: VoltageReference,
    ) -> Result<(), HardwareError> {
        let rejected = HardwareError::rejected_configure(Peripheral::ConversionEngine);
        if reference != VoltageReference::Supply {
            return Err(rejected);
        }
        let mask = channel_select_mask(input).ok_or(rejected)?;

        Self::halt_conversions();
        Self::power_up();
        let adc = pac::ADC1;
        adc.cfgr1().modify(|w| {
            w.set_cont(false);
            w.set_dmaen(true);
        });
        adc.smpr().write_value(Smpr(SAMPLE_TIME_LONGEST));
        adc.chselr().write_value(Chselr(mask));
        self.configured = true;
        Ok(())
    }

    fn trigger_once(&mut self) -> Result<(), HardwareError> {
        if !self.configured {
            return Err(HardwareError::rejected_start(Peripheral::ConversionEngine));
        }
        let adc = pac::ADC1;
        // A previous batch leaves an overrun behind once DMA stopped reading.
        adc.isr().write(|w| w.set_ovr(true));
        adc.cr().modify(|w| w.set_adstart(true));
        Ok(())
    }

    fn stop(&mut self) {
        Self::halt_conversions();
    }
}

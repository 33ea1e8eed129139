#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! STM32G0 bindings for the sampling chain.
//!
//! TIM3 paces conversions through its TRGO output, ADC1 converts on each
//! rising edge and requests DMA, and DMA1 channel 1 fills the batch buffer.
//! Register-level drivers only build for the target; the arithmetic they rely
//! on lives here so the host can test it.

use core::time::Duration as CoreDuration;

use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use sampler_core::config::AnalogInput;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

pub mod dma;

#[cfg(target_os = "none")]
pub mod adc;
#[cfg(target_os = "none")]
pub mod clocks;
#[cfg(target_os = "none")]
pub mod rail;
#[cfg(target_os = "none")]
pub mod timer;

#[cfg(target_os = "none")]
pub(crate) type SamplerMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub(crate) type SamplerMutex = NoopRawMutex;

/// Kernel clock feeding TIM3 with the default HSI16 clock tree.
pub const TIMER_CLOCK_HZ: u32 = 16_000_000;

/// DMAMUX request line wired to ADC1.
pub const ADC_DMA_REQUEST: u8 = 5;

/// Highest regular channel number ADC1 accepts.
pub const ADC_MAX_CHANNEL: u8 = 18;

/// `EXTSEL` value selecting TIM3 TRGO (TRG3).
pub const ADC_EXTSEL_TIM3_TRGO: u32 = 0b011;

const CFGR1_EXTSEL_SHIFT: u32 = 6;
const CFGR1_EXTSEL_MASK: u32 = 0b111 << CFGR1_EXTSEL_SHIFT;
const CFGR1_EXTEN_SHIFT: u32 = 10;
const CFGR1_EXTEN_MASK: u32 = 0b11 << CFGR1_EXTEN_SHIFT;
const CFGR1_EXTEN_RISING: u32 = 0b01;
const CFGR1_DMAEN: u32 = 1 << 0;
const CFGR1_DMACFG: u32 = 1 << 1;
const CFGR1_AUTOFF: u32 = 1 << 15;

/// Deadline for the rail-release task; the newest value wins and `None`
/// cancels a pending release.
pub type ReleaseSignal = Signal<SamplerMutex, Option<Instant>>;

/// Prescaler and auto-reload pair for a 16-bit timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerDivisors {
    pub prescaler: u16,
    pub reload: u16,
}

impl TimerDivisors {
    /// Splits `clock_hz / frequency_hz` ticks across the prescaler and
    /// auto-reload registers, keeping the prescaler as small as possible.
    #[must_use]
    pub fn for_frequency(clock_hz: u32, frequency_hz: u32) -> Option<Self> {
        let ticks = clock_hz.checked_div(frequency_hz).filter(|&ticks| ticks > 0)?;
        let prescaler = (ticks - 1) >> 16;
        let reload = ticks / (prescaler + 1) - 1;
        Some(Self {
            prescaler: u16::try_from(prescaler).ok()?,
            reload: u16::try_from(reload).ok()?,
        })
    }

    /// Update rate the divisors produce from `clock_hz`.
    #[must_use]
    pub fn frequency(self, clock_hz: u32) -> u32 {
        clock_hz / ((u32::from(self.prescaler) + 1) * (u32::from(self.reload) + 1))
    }
}

/// `CHSELR` bit for a regular channel, if the converter has it.
#[must_use]
pub fn channel_select_mask(input: AnalogInput) -> Option<u32> {
    (input.channel <= ADC_MAX_CHANNEL).then(|| 1 << input.channel)
}

/// Rewrites the external trigger fields of `CFGR1` for a rising-edge trigger
/// on TIM3 TRGO, leaving the other bits untouched.
#[must_use]
pub const fn route_tim3_trgo(cfgr1: u32) -> u32 {
    let cleared = cfgr1 & !(CFGR1_EXTSEL_MASK | CFGR1_EXTEN_MASK);
    cleared
        | (ADC_EXTSEL_TIM3_TRGO << CFGR1_EXTSEL_SHIFT)
        | (CFGR1_EXTEN_RISING << CFGR1_EXTEN_SHIFT)
}

/// `CFGR1` as calibration requires it: DMA requests and auto-off disabled,
/// since the calibration factor is read back through the data register.
#[must_use]
pub const fn calibration_cfgr1(cfgr1: u32) -> u32 {
    cfgr1 & !(CFGR1_DMAEN | CFGR1_DMACFG | CFGR1_AUTOFF)
}

pub fn core_duration_to_embassy(duration: CoreDuration) -> Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_hertz_from_hsi16() {
        let divisors = TimerDivisors::for_frequency(TIMER_CLOCK_HZ, 50).unwrap();
        assert_eq!(
            divisors,
            TimerDivisors {
                prescaler: 4,
                reload: 63_999
            }
        );
        assert_eq!(divisors.frequency(TIMER_CLOCK_HZ), 50);
    }

    #[test]
    fn fast_rates_skip_the_prescaler() {
        let divisors = TimerDivisors::for_frequency(TIMER_CLOCK_HZ, 1_000).unwrap();
        assert_eq!(divisors.prescaler, 0);
        assert_eq!(divisors.reload, 15_999);
    }

    #[test]
    fn unreachable_rates_are_rejected() {
        assert_eq!(TimerDivisors::for_frequency(TIMER_CLOCK_HZ, 0), None);
        assert_eq!(
            TimerDivisors::for_frequency(TIMER_CLOCK_HZ, TIMER_CLOCK_HZ + 1),
            None
        );
    }

    #[test]
    fn channel_masks() {
        assert_eq!(channel_select_mask(AnalogInput::new(2)), Some(0b100));
        assert_eq!(channel_select_mask(AnalogInput::new(18)), Some(1 << 18));
        assert_eq!(channel_select_mask(AnalogInput::new(19)), None);
    }

    #[test]
    fn trigger_routing_preserves_dma_bits() {
        // DMAEN | CONT | EXTEN = both edges
        let cfgr1 = 0b1 | (1 << 13) | (0b11 << 10);
        let routed = route_tim3_trgo(cfgr1);

        assert_eq!(routed & 0b1, 0b1);
        assert_eq!(routed & (1 << 13), 1 << 13);
        assert_eq!((routed >> 6) & 0b111, 0b011);
        assert_eq!((routed >> 10) & 0b11, 0b01);
    }

    #[test]
    fn calibration_runs_with_dma_requests_off() {
        let cfgr1 = CFGR1_DMAEN | CFGR1_DMACFG | CFGR1_AUTOFF | route_tim3_trgo(0);
        let calibrating = calibration_cfgr1(cfgr1);

        assert_eq!(calibrating & (CFGR1_DMAEN | CFGR1_DMACFG | CFGR1_AUTOFF), 0);
        assert_eq!(calibrating, route_tim3_trgo(0));
    }

    #[test]
    fn release_cancel_replaces_pending_deadline() {
        let release_at: ReleaseSignal = Signal::new();
        release_at.signal(Some(Instant::from_millis(5)));
        release_at.signal(None);

        assert_eq!(release_at.try_take(), Some(None));
        assert_eq!(release_at.try_take(), None);
    }

    #[test]
    fn settle_delay_converts_to_embassy_ticks() {
        assert_eq!(
            core_duration_to_embassy(CoreDuration::from_millis(5)),
            Duration::from_millis(5)
        );
    }
}

//! Build-time sampling parameters.
//!
//! The values below describe the sensor front-end wired to the board: a 12-bit
//! converter referenced to the 3.3 V supply, sampled at 50 Hz into a
//! 128-element batch. They are fixed at build time; [`SamplerConfig`] bundles
//! them into a value the sampling cycle takes ownership of at construction.

use core::time::Duration;

/// Number of raw samples collected before an average is produced.
pub const SAMPLE_COUNT: usize = 128;

/// Rate at which the periodic trigger fires conversions.
pub const SAMPLING_FREQUENCY_HZ: u32 = 50;

/// Engineering value corresponding to the maximum converter code.
pub const FULL_SCALE_MV: u16 = 3_300;

/// Largest code produced by the 12-bit converter.
pub const ADC_MAX_CODE: u16 = 0x0FFF;

/// How long the sensor rail stays energized after a cycle begins.
pub const SENSOR_SETTLE: Duration = Duration::from_millis(5);

/// External signal mask posted to the event loop when a reading is ready.
pub const READING_READY_SIGNAL: u32 = 0x01;

/// Attribute handle of the "average voltage" characteristic.
pub const AVG_VOLTAGE_CHARACTERISTIC: u16 = 0x001A;

/// Converter input selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AnalogInput {
    /// Converter channel number.
    pub channel: u8,
}

impl AnalogInput {
    pub const fn new(channel: u8) -> Self {
        Self { channel }
    }
}

/// Reference the converter measures against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VoltageReference {
    /// Unbuffered analog supply (VDDA).
    Supply,
    /// Internal bandgap reference.
    Internal,
}

/// Fixed linear scale from raw converter codes to millivolts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinearScale {
    full_scale: u16,
    max_code: u16,
}

impl LinearScale {
    /// Creates a scale mapping `max_code` onto `full_scale`.
    ///
    /// A `max_code` of zero is bumped to one so conversion never divides by zero.
    pub const fn new(full_scale: u16, max_code: u16) -> Self {
        let max_code = if max_code == 0 { 1 } else { max_code };
        Self {
            full_scale,
            max_code,
        }
    }

    /// Returns the engineering value at the top of the range.
    pub const fn full_scale(&self) -> u16 {
        self.full_scale
    }

    /// Returns the largest raw code.
    pub const fn max_code(&self) -> u16 {
        self.max_code
    }

    /// Converts one raw code, truncating toward zero.
    ///
    /// Codes above `max_code` are clamped so the result never exceeds the full
    /// scale value.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn convert(&self, raw: u16) -> u16 {
        let raw = if raw > self.max_code {
            self.max_code
        } else {
            raw
        };
        let scaled = raw as u32 * self.full_scale as u32 / self.max_code as u32;
        scaled as u16
    }
}

impl Default for LinearScale {
    fn default() -> Self {
        Self::new(FULL_SCALE_MV, ADC_MAX_CODE)
    }
}

/// Complete configuration handed to the sampling cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplerConfig {
    frequency_hz: u32,
    scale: LinearScale,
    settle: Duration,
    input: AnalogInput,
    reference: VoltageReference,
}

impl SamplerConfig {
    /// Configuration matching the board constants above.
    pub const DEFAULT: Self = Self::new(
        SAMPLING_FREQUENCY_HZ,
        LinearScale::new(FULL_SCALE_MV, ADC_MAX_CODE),
        SENSOR_SETTLE,
        AnalogInput::new(2),
        VoltageReference::Supply,
    );

    pub const fn new(
        frequency_hz: u32,
        scale: LinearScale,
        settle: Duration,
        input: AnalogInput,
        reference: VoltageReference,
    ) -> Self {
        Self {
            frequency_hz,
            scale,
            settle,
            input,
            reference,
        }
    }

    /// Returns a copy with a different settle delay.
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub const fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub const fn scale(&self) -> LinearScale {
        self.scale
    }

    pub const fn settle(&self) -> Duration {
        self.settle
    }

    pub const fn input(&self) -> AnalogInput {
        self.input
    }

    pub const fn reference(&self) -> VoltageReference {
        self.reference
    }

    /// Time between two trigger pulses.
    pub const fn sample_period(&self) -> Duration {
        if self.frequency_hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(1_000_000 / self.frequency_hz as u64)
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_hits_range_endpoints() {
        let scale = LinearScale::default();
        assert_eq!(scale.convert(0), 0);
        assert_eq!(scale.convert(ADC_MAX_CODE), FULL_SCALE_MV);
    }

    #[test]
    fn conversion_truncates_toward_zero() {
        let scale = LinearScale::default();
        // 2048 * 3300 / 4095 = 1650.40...
        assert_eq!(scale.convert(2048), 1_650);
        // 1 * 3300 / 4095 = 0.80...
        assert_eq!(scale.convert(1), 0);
    }

    #[test]
    fn out_of_range_codes_clamp_to_full_scale() {
        let scale = LinearScale::default();
        assert_eq!(scale.convert(u16::MAX), FULL_SCALE_MV);
    }

    #[test]
    fn zero_max_code_does_not_divide_by_zero() {
        let scale = LinearScale::new(1_000, 0);
        assert_eq!(scale.max_code(), 1);
        assert_eq!(scale.convert(1), 1_000);
    }

    #[test]
    fn default_sample_period_matches_frequency() {
        let config = SamplerConfig::default();
        assert_eq!(config.sample_period(), Duration::from_millis(20));
        assert_eq!(config.settle(), SENSOR_SETTLE);
    }
}

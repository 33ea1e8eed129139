//! Sample buffer and the batch averaging rule.

use crate::config::{LinearScale, SAMPLE_COUNT};
use crate::peripherals::RawCode;

/// Fixed-capacity batch of raw converter codes.
///
/// The transfer engine writes it in trigger order; the sampling cycle only
/// reads it once the engine has halted. The storage is reused for every cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct SampleBuffer<const N: usize = SAMPLE_COUNT> {
    samples: [RawCode; N],
}

impl<const N: usize> SampleBuffer<N> {
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self { samples: [0; N] }
    }

    /// Wraps an already filled batch.
    pub const fn from_array(samples: [RawCode; N]) -> Self {
        Self { samples }
    }

    pub fn as_slice(&self) -> &[RawCode] {
        &self.samples
    }

    /// Destination handed to the transfer engine.
    pub fn as_mut_slice(&mut self) -> &mut [RawCode] {
        &mut self.samples
    }

    /// Stores `code` at `index`, returning `false` when out of range.
    pub fn store(&mut self, index: usize, code: RawCode) -> bool {
        match self.samples.get_mut(index) {
            Some(slot) => {
                *slot = code;
                true
            }
            None => false,
        }
    }

    /// Mean of the per-sample converted values.
    pub fn average(&self, scale: LinearScale) -> u16 {
        average(&self.samples, scale)
    }
}

impl<const N: usize> Default for SampleBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Averages a batch in engineering units.
///
/// Each code is converted (and truncated) on its own before summation, which
/// is what the converter-resolution reference path produces. An empty batch
/// averages to zero.
#[allow(clippy::cast_possible_truncation)]
pub fn average(samples: &[RawCode], scale: LinearScale) -> u16 {
    if samples.is_empty() {
        return 0;
    }

    let total: u64 = samples
        .iter()
        .map(|&raw| u64::from(scale.convert(raw)))
        .sum();

    // Every term is at most full_scale (a u16), so the mean fits as well.
    (total / samples.len() as u64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ADC_MAX_CODE, FULL_SCALE_MV};

    #[test]
    fn truncates_each_sample_before_summing() {
        let scale = LinearScale::default();
        let samples = [2048, 2048, 2048, 2048];
        assert_eq!(average(&samples, scale), 1_650);

        // 0 + 1 + 2 + 3 = 6, mean 1. Scaling the raw sum instead would give 2.
        let mixed = [1, 2, 3, 4];
        assert_eq!(average(&mixed, scale), 1);
    }

    #[test]
    fn boundary_codes_average_exactly() {
        let scale = LinearScale::default();
        assert_eq!(average(&[0; 8], scale), 0);
        assert_eq!(average(&[ADC_MAX_CODE; 8], scale), FULL_SCALE_MV);
        assert_eq!(average(&[0, ADC_MAX_CODE], scale), FULL_SCALE_MV / 2);
    }

    #[test]
    fn empty_batch_averages_to_zero() {
        assert_eq!(average(&[], LinearScale::default()), 0);
    }

    #[test]
    fn store_rejects_out_of_range_index() {
        let mut buffer = SampleBuffer::<2>::new();
        assert!(buffer.store(1, 7));
        assert!(!buffer.store(2, 9));
        assert_eq!(buffer.as_slice(), &[0, 7]);
    }
}

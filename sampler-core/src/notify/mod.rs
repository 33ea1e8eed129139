//! Hand-off of finished readings from interrupt context to the event loop.
//!
//! The batch-complete path must not block or allocate, so it only stores the
//! reading and raises [`READING_READY_SIGNAL`] through a [`ReadySink`]. The
//! event loop later drains the signal and forwards the reading to the link.
//! Signals raised before the loop drains the previous one coalesce: the loop
//! observes one signal and reads the most recent value.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::config::READING_READY_SIGNAL;

/// Number of bytes a reading occupies on the wire.
pub const READING_WIRE_LEN: usize = 2;

const SLOT_PRESENT: u64 = 1 << 48;

/// Average of one complete batch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AveragedReading {
    millivolts: u16,
    sequence: u32,
}

impl AveragedReading {
    pub const fn new(millivolts: u16, sequence: u32) -> Self {
        Self {
            millivolts,
            sequence,
        }
    }

    /// Averaged value in millivolts.
    pub const fn millivolts(&self) -> u16 {
        self.millivolts
    }

    /// Counter of completed cycles, starting at one.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Notification payload: millivolts, most significant byte first.
    pub const fn to_be_bytes(&self) -> [u8; READING_WIRE_LEN] {
        self.millivolts.to_be_bytes()
    }

    /// Parses a notification payload; the sequence is not carried on the wire.
    pub fn decode_millivolts(bytes: &[u8]) -> Option<u16> {
        let raw: [u8; READING_WIRE_LEN] = bytes.try_into().ok()?;
        Some(u16::from_be_bytes(raw))
    }

    const fn pack(self) -> u64 {
        SLOT_PRESENT | ((self.sequence as u64) << 16) | self.millivolts as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn unpack(raw: u64) -> Option<Self> {
        if raw & SLOT_PRESENT == 0 {
            return None;
        }
        Some(Self {
            millivolts: raw as u16,
            sequence: (raw >> 16) as u32,
        })
    }
}

/// Destination for the external "reading ready" signal.
///
/// Implementations must be callable from interrupt context.
pub trait ReadySink {
    fn raise(&self, mask: u32);
}

/// Sink for callers that poll [`ReadingBridge::take_ready`] instead of waiting.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSink;

impl ReadySink for NoopSink {
    fn raise(&self, _mask: u32) {}
}

/// Whether a signal woke the loop or merged into one already pending.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignalOutcome {
    Raised,
    Coalesced,
}

/// Latest-reading slot plus a pending flag, both lock-free.
#[derive(Debug)]
pub struct ReadingBridge<S = NoopSink> {
    slot: AtomicU64,
    pending: AtomicBool,
    delivered: AtomicU64,
    coalesced: AtomicU32,
    sink: S,
}

impl ReadingBridge<NoopSink> {
    pub const fn new() -> Self {
        Self::with_sink(NoopSink)
    }
}

impl Default for ReadingBridge<NoopSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ReadySink> ReadingBridge<S> {
    pub const fn with_sink(sink: S) -> Self {
        Self {
            slot: AtomicU64::new(0),
            pending: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            coalesced: AtomicU32::new(0),
            sink,
        }
    }

    /// Publishes `reading` and notifies the event loop.
    ///
    /// Interrupt-safe. The sink is raised only on the transition from "no
    /// signal pending" to "signal pending".
    pub fn signal(&self, reading: AveragedReading) -> SignalOutcome {
        self.slot.store(reading.pack(), Ordering::Release);
        if self.pending.swap(true, Ordering::AcqRel) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            SignalOutcome::Coalesced
        } else {
            self.sink.raise(READING_READY_SIGNAL);
            SignalOutcome::Raised
        }
    }

    /// Clears the pending signal and returns the reading it announced.
    ///
    /// A signal landing between clearing the flag and reading the slot hands
    /// its reading to this drain; the flag it leaves behind is then stale and
    /// the next drain returns `None` instead of repeating the reading.
    pub fn take_ready(&self) -> Option<AveragedReading> {
        if self.pending.swap(false, Ordering::AcqRel) {
            self.claim_current()
        } else {
            None
        }
    }

    fn claim_current(&self) -> Option<AveragedReading> {
        let raw = self.slot.load(Ordering::Acquire);
        let previous = self.delivered.swap(raw, Ordering::AcqRel);
        if raw == previous {
            return None;
        }
        AveragedReading::unpack(raw)
    }

    /// Most recently published reading, if any cycle has completed.
    pub fn current_reading(&self) -> Option<AveragedReading> {
        AveragedReading::unpack(self.slot.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Signals merged into an earlier undrained one.
    pub fn coalesced_count(&self) -> u32 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[derive(Default)]
    struct CountingSink {
        raised: Cell<u32>,
        last_mask: Cell<u32>,
    }

    impl ReadySink for CountingSink {
        fn raise(&self, mask: u32) {
            self.raised.set(self.raised.get() + 1);
            self.last_mask.set(mask);
        }
    }

    #[test]
    fn wire_encoding_is_big_endian() {
        let reading = AveragedReading::new(0x0CE4, 1);
        assert_eq!(reading.to_be_bytes(), [0x0C, 0xE4]);
        assert_eq!(AveragedReading::decode_millivolts(&[0x06, 0x72]), Some(1_650));
        assert_eq!(AveragedReading::decode_millivolts(&[0x06]), None);
    }

    #[test]
    fn empty_bridge_has_no_reading() {
        let bridge = ReadingBridge::new();
        assert_eq!(bridge.current_reading(), None);
        assert_eq!(bridge.take_ready(), None);
    }

    #[test]
    fn zero_reading_is_distinguishable_from_empty() {
        let bridge = ReadingBridge::new();
        bridge.signal(AveragedReading::new(0, 0));
        assert_eq!(bridge.current_reading(), Some(AveragedReading::new(0, 0)));
    }

    #[test]
    fn signal_raises_sink_with_ready_mask() {
        let bridge = ReadingBridge::with_sink(CountingSink::default());
        let outcome = bridge.signal(AveragedReading::new(1_650, 1));

        assert_eq!(outcome, SignalOutcome::Raised);
        assert_eq!(bridge.sink().raised.get(), 1);
        assert_eq!(bridge.sink().last_mask.get(), READING_READY_SIGNAL);
        assert!(bridge.is_pending());
    }

    #[test]
    fn undrained_signals_coalesce_to_latest_value() {
        let bridge = ReadingBridge::with_sink(CountingSink::default());
        bridge.signal(AveragedReading::new(1_000, 1));
        let second = bridge.signal(AveragedReading::new(2_000, 2));

        assert_eq!(second, SignalOutcome::Coalesced);
        assert_eq!(bridge.sink().raised.get(), 1);
        assert_eq!(bridge.coalesced_count(), 1);
        assert_eq!(bridge.take_ready(), Some(AveragedReading::new(2_000, 2)));
        assert_eq!(bridge.take_ready(), None);
    }

    #[test]
    fn signal_racing_a_drain_is_delivered_once() {
        let bridge = ReadingBridge::with_sink(CountingSink::default());
        bridge.signal(AveragedReading::new(1_000, 1));

        // The drain clears the flag, then a completion publishes before the
        // drain reads the slot.
        assert!(bridge.pending.swap(false, Ordering::AcqRel));
        bridge.signal(AveragedReading::new(2_000, 2));
        assert_eq!(bridge.claim_current(), Some(AveragedReading::new(2_000, 2)));

        assert!(bridge.is_pending());
        assert_eq!(bridge.take_ready(), None);
        assert_eq!(bridge.current_reading(), Some(AveragedReading::new(2_000, 2)));

        bridge.signal(AveragedReading::new(3_000, 3));
        assert_eq!(bridge.take_ready(), Some(AveragedReading::new(3_000, 3)));
    }

    #[test]
    fn current_reading_survives_drain() {
        let bridge = ReadingBridge::new();
        bridge.signal(AveragedReading::new(42, 7));
        bridge.take_ready();

        assert!(!bridge.is_pending());
        assert_eq!(bridge.current_reading(), Some(AveragedReading::new(42, 7)));
    }
}

//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! Every event the event loop observes (cycle lifecycle, link transitions,
//! delivery results) is stored as a strongly typed record in a fixed-size
//! `heapless` history buffer. Event kinds map to compact numeric codes so they
//! can be mirrored over a diagnostics channel without pulling in a serializer.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::link::ConnectionHandle;
use crate::notify::AveragedReading;
use crate::peripherals::{HardwareError, Peripheral};

/// Monotonic identifier assigned to each telemetry record.
pub type EventId = u32;

/// Sampler events kept before the oldest is overwritten.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplerEventKind {
    CycleStarted,
    CycleStopped,
    CycleFault(Peripheral),
    ReadingReady,
    ReadingDelivered,
    ReadingDropped,
    TransportFailed,
    PeerConnected,
    PeerDisconnected,
    SubscriptionEnabled,
    SubscriptionDisabled,
    Custom(u16),
}

impl fmt::Display for SamplerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerEventKind::CycleStarted => f.write_str("cycle-started"),
            SamplerEventKind::CycleStopped => f.write_str("cycle-stopped"),
            SamplerEventKind::CycleFault(peripheral) => write!(f, "cycle-fault {peripheral}"),
            SamplerEventKind::ReadingReady => f.write_str("reading-ready"),
            SamplerEventKind::ReadingDelivered => f.write_str("reading-delivered"),
            SamplerEventKind::ReadingDropped => f.write_str("reading-dropped"),
            SamplerEventKind::TransportFailed => f.write_str("transport-failed"),
            SamplerEventKind::PeerConnected => f.write_str("peer-connected"),
            SamplerEventKind::PeerDisconnected => f.write_str("peer-disconnected"),
            SamplerEventKind::SubscriptionEnabled => f.write_str("subscription-enabled"),
            SamplerEventKind::SubscriptionDisabled => f.write_str("subscription-disabled"),
            SamplerEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl SamplerEventKind {
    const CYCLE_STARTED_CODE: u16 = 0x0000;
    const CYCLE_STOPPED_CODE: u16 = 0x0001;
    const READING_READY_CODE: u16 = 0x0002;
    const READING_DELIVERED_CODE: u16 = 0x0003;
    const READING_DROPPED_CODE: u16 = 0x0004;
    const TRANSPORT_FAILED_CODE: u16 = 0x0005;
    const PEER_CONNECTED_CODE: u16 = 0x0008;
    const PEER_DISCONNECTED_CODE: u16 = 0x0009;
    const SUBSCRIPTION_ENABLED_CODE: u16 = 0x000A;
    const SUBSCRIPTION_DISABLED_CODE: u16 = 0x000B;
    const CYCLE_FAULT_BASE: u16 = 0x0010;
    const CYCLE_FAULT_END: u16 = Self::CYCLE_FAULT_BASE + 6;

    /// Compact code for the event, stable across builds.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            SamplerEventKind::CycleStarted => Self::CYCLE_STARTED_CODE,
            SamplerEventKind::CycleStopped => Self::CYCLE_STOPPED_CODE,
            SamplerEventKind::CycleFault(peripheral) => {
                Self::CYCLE_FAULT_BASE + peripheral_index(peripheral)
            }
            SamplerEventKind::ReadingReady => Self::READING_READY_CODE,
            SamplerEventKind::ReadingDelivered => Self::READING_DELIVERED_CODE,
            SamplerEventKind::ReadingDropped => Self::READING_DROPPED_CODE,
            SamplerEventKind::TransportFailed => Self::TRANSPORT_FAILED_CODE,
            SamplerEventKind::PeerConnected => Self::PEER_CONNECTED_CODE,
            SamplerEventKind::PeerDisconnected => Self::PEER_DISCONNECTED_CODE,
            SamplerEventKind::SubscriptionEnabled => Self::SUBSCRIPTION_ENABLED_CODE,
            SamplerEventKind::SubscriptionDisabled => Self::SUBSCRIPTION_DISABLED_CODE,
            SamplerEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`SamplerEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::CYCLE_STARTED_CODE => SamplerEventKind::CycleStarted,
            Self::CYCLE_STOPPED_CODE => SamplerEventKind::CycleStopped,
            Self::READING_READY_CODE => SamplerEventKind::ReadingReady,
            Self::READING_DELIVERED_CODE => SamplerEventKind::ReadingDelivered,
            Self::READING_DROPPED_CODE => SamplerEventKind::ReadingDropped,
            Self::TRANSPORT_FAILED_CODE => SamplerEventKind::TransportFailed,
            Self::PEER_CONNECTED_CODE => SamplerEventKind::PeerConnected,
            Self::PEER_DISCONNECTED_CODE => SamplerEventKind::PeerDisconnected,
            Self::SUBSCRIPTION_ENABLED_CODE => SamplerEventKind::SubscriptionEnabled,
            Self::SUBSCRIPTION_DISABLED_CODE => SamplerEventKind::SubscriptionDisabled,
            value if (Self::CYCLE_FAULT_BASE..Self::CYCLE_FAULT_END).contains(&value) => {
                peripheral_from_index(value - Self::CYCLE_FAULT_BASE)
                    .map_or(SamplerEventKind::Custom(value), SamplerEventKind::CycleFault)
            }
            other => SamplerEventKind::Custom(other),
        }
    }
}

/// Extra data attached to a sampler event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Reading(ReadingTelemetry),
    Fault(HardwareError),
    Link(ConnectionHandle),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Reading payload with the time the producing cycle took.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadingTelemetry {
    pub millivolts: u16,
    pub sequence: u32,
    pub cycle_duration: Option<Duration>,
}

/// Monotonic timestamp the recorder can measure cycle time with.
pub trait TelemetryInstant: Copy {
    /// Time elapsed since `earlier`, or zero if the clock went backwards.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// One entry in the sampler event ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: SamplerEventKind,
    pub details: TelemetryPayload,
}

/// Fixed-capacity log of sampler events; the oldest entry is overwritten first.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>,
    cycle_started_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            cycle_started_at: None,
            next_event_id: 0,
        }
    }

    /// Entries from oldest to newest.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a cycle start and remembers it for the next reading's duration.
    pub fn record_cycle_started(&mut self, timestamp: TInstant) -> EventId {
        self.cycle_started_at = Some(timestamp);
        self.record(
            SamplerEventKind::CycleStarted,
            TelemetryPayload::none(),
            timestamp,
        )
    }

    /// Records a reading event, attaching the elapsed time since the cycle began.
    pub fn record_reading(
        &mut self,
        event: SamplerEventKind,
        reading: AveragedReading,
        timestamp: TInstant,
    ) -> EventId {
        let cycle_duration = self
            .cycle_started_at
            .map(|start| timestamp.saturating_duration_since(start));
        let payload = TelemetryPayload::Reading(ReadingTelemetry {
            millivolts: reading.millivolts(),
            sequence: reading.sequence(),
            cycle_duration,
        });
        self.record(event, payload, timestamp)
    }

    /// Records a peripheral that refused to start.
    pub fn record_fault(&mut self, error: HardwareError, timestamp: TInstant) -> EventId {
        self.cycle_started_at = None;
        self.record(
            SamplerEventKind::CycleFault(error.peripheral),
            TelemetryPayload::Fault(error),
            timestamp,
        )
    }

    /// Appends `event` and returns its id.
    pub fn record(
        &mut self,
        event: SamplerEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

const fn peripheral_index(peripheral: Peripheral) -> u16 {
    match peripheral {
        Peripheral::ClockDomain => 0,
        Peripheral::PowerGate => 1,
        Peripheral::PeriodicTrigger => 2,
        Peripheral::EventRouter => 3,
        Peripheral::ConversionEngine => 4,
        Peripheral::BatchTransferEngine => 5,
    }
}

fn peripheral_from_index(index: u16) -> Option<Peripheral> {
    match index {
        0 => Some(Peripheral::ClockDomain),
        1 => Some(Peripheral::PowerGate),
        2 => Some(Peripheral::PeriodicTrigger),
        3 => Some(Peripheral::EventRouter),
        4 => Some(Peripheral::ConversionEngine),
        5 => Some(Peripheral::BatchTransferEngine),
        _ => None,
    }
}

//! Radio link session: connection tracking, subscription handling and reading
//! delivery.
//!
//! The radio stack itself lives on a co-processor. This module consumes the
//! events it reports (connection opened, subscription changed, peer gone) and
//! turns them into sampling cycle commands, then forwards each finished
//! reading as a notification and restarts sampling while the peer is still
//! subscribed. Every transition is recorded in the telemetry ring.

pub mod frame;

use core::fmt;

use crate::config::AVG_VOLTAGE_CHARACTERISTIC;
use crate::cycle::{CycleControl, StartOutcome, StopOutcome};
use crate::notify::{AveragedReading, ReadingBridge, ReadySink};
use crate::peripherals::HardwareError;
use crate::telemetry::{SamplerEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecorder};

/// Connection identifier assigned by the radio stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConnectionHandle(pub u8);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Attribute handle of a characteristic.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CharacteristicId(pub u16);

impl CharacteristicId {
    /// The averaged-voltage characteristic served by this device.
    pub const AVERAGE_VOLTAGE: Self = Self(AVG_VOLTAGE_CHARACTERISTIC);
}

/// Whether the peer asked to receive notifications.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SubscriptionState {
    #[default]
    Disabled,
    Enabled,
}

/// Sends a value notification to a connected peer.
pub trait NotificationTransport {
    type Error;

    fn notify(
        &mut self,
        connection: ConnectionHandle,
        characteristic: CharacteristicId,
        payload: &[u8],
    ) -> Result<(), Self::Error>;
}

/// Failure while delivering a reading or restarting the cycle behind it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkError<E> {
    /// The transport refused the notification; the reading is discarded.
    Transport(E),
    /// The notification went out but the follow-up cycle could not start.
    Restart(HardwareError),
}

impl<E: fmt::Debug> fmt::Display for LinkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Transport(error) => write!(f, "notification failed: {error:?}"),
            LinkError::Restart(error) => write!(f, "restart failed: {error}"),
        }
    }
}

/// What happened to a subscription request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SubscriptionUpdate {
    /// Notifications enabled; carries what the cycle did in response.
    Enabled(StartOutcome),
    /// Notifications disabled; carries what the cycle did in response.
    Disabled(StopOutcome),
    /// The request targeted a characteristic this device does not serve.
    Ignored,
}

/// What happened to a drained reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// No signal was pending.
    Idle,
    /// The reading was handed to the transport.
    Sent {
        reading: AveragedReading,
        connection: ConnectionHandle,
        restarted: StartOutcome,
    },
    /// No subscribed peer; the reading stays available as the current value.
    Dropped(AveragedReading),
}

/// Per-peer link state, owned by the event loop.
#[derive(Debug)]
pub struct LinkSession {
    characteristic: CharacteristicId,
    connection: Option<ConnectionHandle>,
    subscription: SubscriptionState,
    delivered: u32,
    failed: u32,
}

impl LinkSession {
    #[must_use]
    pub const fn new() -> Self {
        Self::for_characteristic(CharacteristicId::AVERAGE_VOLTAGE)
    }

    #[must_use]
    pub const fn for_characteristic(characteristic: CharacteristicId) -> Self {
        Self {
            characteristic,
            connection: None,
            subscription: SubscriptionState::Disabled,
            delivered: 0,
            failed: 0,
        }
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn subscription(&self) -> SubscriptionState {
        self.subscription
    }

    pub fn characteristic(&self) -> CharacteristicId {
        self.characteristic
    }

    /// Notifications handed to the transport successfully.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    /// Notifications the transport refused.
    pub fn failed(&self) -> u32 {
        self.failed
    }

    fn is_subscribed(&self) -> bool {
        self.connection.is_some() && self.subscription == SubscriptionState::Enabled
    }

    /// A peer connected. Sampling waits for it to subscribe.
    pub fn on_connection_opened<TInstant>(
        &mut self,
        connection: ConnectionHandle,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) where
        TInstant: TelemetryInstant,
    {
        self.connection = Some(connection);
        self.subscription = SubscriptionState::Disabled;
        telemetry.record(
            SamplerEventKind::PeerConnected,
            TelemetryPayload::Link(connection),
            now,
        );
    }

    /// The peer wrote the notification flag of `characteristic`.
    pub fn on_subscription_changed<C, TInstant>(
        &mut self,
        cycle: &mut C,
        characteristic: CharacteristicId,
        enabled: bool,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> Result<SubscriptionUpdate, HardwareError>
    where
        C: CycleControl,
        TInstant: TelemetryInstant,
    {
        if characteristic != self.characteristic {
            return Ok(SubscriptionUpdate::Ignored);
        }

        if enabled {
            self.subscription = SubscriptionState::Enabled;
            telemetry.record(
                SamplerEventKind::SubscriptionEnabled,
                TelemetryPayload::none(),
                now,
            );
            let outcome = start_cycle(cycle, now, telemetry)?;
            Ok(SubscriptionUpdate::Enabled(outcome))
        } else {
            self.subscription = SubscriptionState::Disabled;
            telemetry.record(
                SamplerEventKind::SubscriptionDisabled,
                TelemetryPayload::none(),
                now,
            );
            Ok(SubscriptionUpdate::Disabled(stop_cycle(cycle, now, telemetry)))
        }
    }

    /// The peer went away: sampling stops and the subscription is forgotten.
    pub fn on_peer_disconnected<C, TInstant>(
        &mut self,
        cycle: &mut C,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> StopOutcome
    where
        C: CycleControl,
        TInstant: TelemetryInstant,
    {
        let outcome = stop_cycle(cycle, now, telemetry);
        let payload = self
            .connection
            .take()
            .map_or(TelemetryPayload::none(), TelemetryPayload::Link);
        self.subscription = SubscriptionState::Disabled;
        telemetry.record(SamplerEventKind::PeerDisconnected, payload, now);
        outcome
    }

    /// Drains the "reading ready" signal, notifies the peer and restarts
    /// sampling while it remains subscribed.
    ///
    /// A transport failure discards the reading; the restart is still
    /// attempted so the next batch has a chance to get through.
    pub fn on_reading_ready<C, S, X, TInstant>(
        &mut self,
        cycle: &mut C,
        bridge: &ReadingBridge<S>,
        transport: &mut X,
        now: TInstant,
        telemetry: &mut TelemetryRecorder<TInstant>,
    ) -> Result<Delivery, LinkError<X::Error>>
    where
        C: CycleControl,
        S: ReadySink,
        X: NotificationTransport,
        TInstant: TelemetryInstant,
    {
        let Some(reading) = bridge.take_ready() else {
            return Ok(Delivery::Idle);
        };
        telemetry.record_reading(SamplerEventKind::ReadingReady, reading, now);

        let Some(connection) = self.connection.filter(|_| self.is_subscribed()) else {
            telemetry.record_reading(SamplerEventKind::ReadingDropped, reading, now);
            return Ok(Delivery::Dropped(reading));
        };

        let sent = transport.notify(connection, self.characteristic, &reading.to_be_bytes());
        match sent {
            Ok(()) => {
                self.delivered = self.delivered.wrapping_add(1);
                telemetry.record_reading(SamplerEventKind::ReadingDelivered, reading, now);
            }
            Err(_) => {
                self.failed = self.failed.wrapping_add(1);
                telemetry.record_reading(SamplerEventKind::TransportFailed, reading, now);
            }
        }

        let restarted = start_cycle(cycle, now, telemetry);
        match (sent, restarted) {
            (Err(error), _) => Err(LinkError::Transport(error)),
            (Ok(()), Err(error)) => Err(LinkError::Restart(error)),
            (Ok(()), Ok(outcome)) => Ok(Delivery::Sent {
                reading,
                connection,
                restarted: outcome,
            }),
        }
    }
}

impl Default for LinkSession {
    fn default() -> Self {
        Self::new()
    }
}

fn start_cycle<C, TInstant>(
    cycle: &mut C,
    now: TInstant,
    telemetry: &mut TelemetryRecorder<TInstant>,
) -> Result<StartOutcome, HardwareError>
where
    C: CycleControl,
    TInstant: TelemetryInstant,
{
    match cycle.start() {
        Ok(StartOutcome::Started) => {
            telemetry.record_cycle_started(now);
            Ok(StartOutcome::Started)
        }
        Ok(StartOutcome::AlreadyRunning) => Ok(StartOutcome::AlreadyRunning),
        Err(error) => {
            telemetry.record_fault(error, now);
            Err(error)
        }
    }
}

fn stop_cycle<C, TInstant>(
    cycle: &mut C,
    now: TInstant,
    telemetry: &mut TelemetryRecorder<TInstant>,
) -> StopOutcome
where
    C: CycleControl,
    TInstant: TelemetryInstant,
{
    let outcome = cycle.stop();
    if outcome == StopOutcome::Halted {
        telemetry.record(SamplerEventKind::CycleStopped, TelemetryPayload::none(), now);
    }
    outcome
}

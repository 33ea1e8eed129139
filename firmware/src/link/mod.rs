#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Radio co-processor glue.
//!
//! Bytes from the co-processor UART are decoded into link events and applied
//! to the [`LinkSession`]; notifications go back out as frames queued for
//! the UART writer. Everything here is synchronous so the UART task can run
//! it under the cycle lock.

use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_sync::signal::Signal;
use heapless::Vec;
use sampler_core::cycle::CycleControl;
use sampler_core::link::frame::{FrameDecoder, FrameError, LinkCommand, LinkEvent, MAX_FRAME_LEN};
use sampler_core::link::{
    CharacteristicId, ConnectionHandle, Delivery, LinkError, LinkSession, NotificationTransport,
};
use sampler_core::notify::{ReadingBridge, ReadySink};

use crate::hw::SamplerMutex;
use crate::telemetry::{self, FirmwareInstant, TelemetryRecorder};

/// Encoded frames waiting for the UART writer.
pub const OUTBOUND_QUEUE_DEPTH: usize = 4;

pub type OutboundFrame = Vec<u8, MAX_FRAME_LEN>;
pub type OutboundQueue = Channel<SamplerMutex, OutboundFrame, OUTBOUND_QUEUE_DEPTH>;
pub type OutboundSender<'a> = Sender<'a, SamplerMutex, OutboundFrame, OUTBOUND_QUEUE_DEPTH>;
pub type OutboundReceiver<'a> = Receiver<'a, SamplerMutex, OutboundFrame, OUTBOUND_QUEUE_DEPTH>;

/// Wakes the UART task when a reading is ready; carries the signal mask.
pub struct ReadySignal(Signal<SamplerMutex, u32>);

impl ReadySignal {
    pub const fn new() -> Self {
        Self(Signal::new())
    }

    pub async fn wait(&self) -> u32 {
        self.0.wait().await
    }

    pub fn is_raised(&self) -> bool {
        self.0.signaled()
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySink for ReadySignal {
    fn raise(&self, mask: u32) {
        self.0.signal(mask);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransportError {
    /// The outbound queue is full; the UART writer is behind.
    Busy,
    Frame(FrameError),
}

/// Notification transport that frames values for the co-processor.
pub struct FrameTransport<'q> {
    outbound: OutboundSender<'q>,
}

impl<'q> FrameTransport<'q> {
    pub fn new(outbound: OutboundSender<'q>) -> Self {
        Self { outbound }
    }
}

impl NotificationTransport for FrameTransport<'_> {
    type Error = TransportError;

    fn notify(
        &mut self,
        connection: ConnectionHandle,
        characteristic: CharacteristicId,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let command =
            LinkCommand::notify(connection, characteristic, payload).map_err(TransportError::Frame)?;
        let mut encoded = [0u8; MAX_FRAME_LEN];
        let len = command.encode(&mut encoded).map_err(TransportError::Frame)?;
        let frame = OutboundFrame::from_slice(&encoded[..len])
            .map_err(|_| TransportError::Frame(FrameError::Capacity))?;
        self.outbound
            .try_send(frame)
            .map_err(|_| TransportError::Busy)
    }
}

/// Link-layer state owned by the UART task.
pub struct RadioLink<'q> {
    session: LinkSession,
    decoder: FrameDecoder,
    transport: FrameTransport<'q>,
    telemetry: TelemetryRecorder,
    frame_errors: u32,
}

impl<'q> RadioLink<'q> {
    pub fn new(outbound: OutboundSender<'q>) -> Self {
        Self {
            session: LinkSession::new(),
            decoder: FrameDecoder::new(),
            transport: FrameTransport::new(outbound),
            telemetry: TelemetryRecorder::new(),
            frame_errors: 0,
        }
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Frames dropped for bad length, check byte or tag.
    pub fn frame_errors(&self) -> u32 {
        self.frame_errors
    }

    /// Feeds received UART bytes through the decoder, applying every complete
    /// event to `cycle`.
    pub fn ingest<C: CycleControl>(&mut self, cycle: &mut C, bytes: &[u8], now: FirmwareInstant) {
        for &byte in bytes {
            match self.decoder.push_event(byte) {
                None => {}
                Some(Ok(event)) => self.dispatch(cycle, event, now),
                Some(Err(error)) => {
                    self.frame_errors = self.frame_errors.wrapping_add(1);
                    telemetry::log_frame_error(error);
                }
            }
        }
    }

    fn dispatch<C: CycleControl>(&mut self, cycle: &mut C, event: LinkEvent, now: FirmwareInstant) {
        match event {
            LinkEvent::ConnectionOpened(handle) => {
                self.session
                    .on_connection_opened(handle, now, &mut self.telemetry);
                telemetry::log_connection(handle, true, now);
            }
            LinkEvent::ConnectionClosed(handle) => {
                self.session
                    .on_peer_disconnected(cycle, now, &mut self.telemetry);
                telemetry::log_connection(handle, false, now);
            }
            LinkEvent::Subscription {
                characteristic,
                enabled,
            } => {
                let update = self.session.on_subscription_changed(
                    cycle,
                    characteristic,
                    enabled,
                    now,
                    &mut self.telemetry,
                );
                telemetry::log_subscription(update);
            }
        }
    }

    /// Delivers the pending reading, if any, and restarts sampling.
    pub fn deliver<C, S>(
        &mut self,
        cycle: &mut C,
        bridge: &ReadingBridge<S>,
        now: FirmwareInstant,
    ) -> Result<Delivery, LinkError<TransportError>>
    where
        C: CycleControl,
        S: ReadySink,
    {
        let delivery = self.session.on_reading_ready(
            cycle,
            bridge,
            &mut self.transport,
            now,
            &mut self.telemetry,
        );
        match &delivery {
            Ok(Delivery::Sent { reading, .. } | Delivery::Dropped(reading)) => {
                telemetry::log_reading(*reading, now);
            }
            Ok(Delivery::Idle) => {}
            Err(error) => telemetry::log_delivery_error(error),
        }
        delivery
    }
}

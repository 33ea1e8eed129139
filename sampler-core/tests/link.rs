use core::time::Duration;

use sampler_core::config::{ADC_MAX_CODE, SamplerConfig};
use sampler_core::cycle::{CycleState, SamplingCycle, StartOutcome, StopOutcome};
use sampler_core::link::frame::{FrameDecoder, LinkCommand, LinkEvent, MAX_FRAME_LEN};
use sampler_core::link::{
    CharacteristicId, ConnectionHandle, Delivery, LinkError, LinkSession, NotificationTransport,
    SubscriptionState, SubscriptionUpdate,
};
use sampler_core::notify::{NoopSink, ReadingBridge};
use sampler_core::peripherals::{HardwareError, Peripheral};
use sampler_core::sim::{BenchPort, PulseOutcome, SimulatedBench};
use sampler_core::telemetry::{
    SamplerEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecorder,
};

const N: usize = 8;

type Port<'a> = BenchPort<'a, N>;
type Cycle<'a> = SamplingCycle<'a, Port<'a>, Port<'a>, Port<'a>, Port<'a>, NoopSink, N>;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct MockInstant(u64);

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Encodes notifications the way the UART link does and keeps the frames.
struct FramingTransport {
    frames: Vec<Vec<u8>>,
    refuse: bool,
}

impl FramingTransport {
    fn new() -> Self {
        Self {
            frames: Vec::new(),
            refuse: false,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
struct LinkBusy;

impl NotificationTransport for FramingTransport {
    type Error = LinkBusy;

    fn notify(
        &mut self,
        connection: ConnectionHandle,
        characteristic: CharacteristicId,
        payload: &[u8],
    ) -> Result<(), LinkBusy> {
        if self.refuse {
            return Err(LinkBusy);
        }
        let command = LinkCommand::notify(connection, characteristic, payload).unwrap();
        let mut out = [0u8; MAX_FRAME_LEN];
        let len = command.encode(&mut out).unwrap();
        self.frames.push(out[..len].to_vec());
        Ok(())
    }
}

struct Harness<'a> {
    bench: &'a SimulatedBench<N>,
    bridge: &'a ReadingBridge,
    cycle: Cycle<'a>,
    session: LinkSession,
    telemetry: TelemetryRecorder<MockInstant>,
    clock: u64,
}

impl<'a> Harness<'a> {
    fn new(bench: &'a SimulatedBench<N>, bridge: &'a ReadingBridge) -> Self {
        let config = SamplerConfig::default();
        let mut cycle = SamplingCycle::new(bench.chain(), bridge, config);
        cycle
            .initialize(&mut bench.port(), &mut bench.port())
            .expect("bring-up");
        Self {
            bench,
            bridge,
            cycle,
            session: LinkSession::new(),
            telemetry: TelemetryRecorder::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> MockInstant {
        self.clock += 1;
        MockInstant(self.clock)
    }

    /// Feeds the link layer a co-processor frame, like the UART task does.
    fn receive(&mut self, event: LinkEvent) {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = event.encode(&mut frame).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        for &byte in &frame[..len] {
            if let Some(result) = decoder.push_event(byte) {
                decoded = Some(result.unwrap());
            }
        }

        let now = self.tick();
        match decoded.expect("frame should decode") {
            LinkEvent::ConnectionOpened(handle) => {
                self.session
                    .on_connection_opened(handle, now, &mut self.telemetry);
            }
            LinkEvent::ConnectionClosed(_) => {
                self.session
                    .on_peer_disconnected(&mut self.cycle, now, &mut self.telemetry);
            }
            LinkEvent::Subscription {
                characteristic,
                enabled,
            } => {
                self.session
                    .on_subscription_changed(
                        &mut self.cycle,
                        characteristic,
                        enabled,
                        now,
                        &mut self.telemetry,
                    )
                    .expect("subscription handling");
            }
        }
    }

    fn fill_batch(&mut self, code: u16) {
        for _ in 0..N {
            if self.bench.pulse(code) == PulseOutcome::BatchComplete {
                let batch = self.bench.batch();
                self.cycle.complete_batch(&batch);
            }
        }
    }

    fn drain(&mut self, transport: &mut FramingTransport) -> Result<Delivery, LinkError<LinkBusy>> {
        let now = self.tick();
        self.session.on_reading_ready(
            &mut self.cycle,
            self.bridge,
            transport,
            now,
            &mut self.telemetry,
        )
    }
}

fn subscribe() -> LinkEvent {
    LinkEvent::Subscription {
        characteristic: CharacteristicId::AVERAGE_VOLTAGE,
        enabled: true,
    }
}

#[test]
fn notification_frames_carry_big_endian_millivolts() {
    let bench = SimulatedBench::<N>::new();
    let bridge = ReadingBridge::new();
    let mut harness = Harness::new(&bench, &bridge);
    let mut transport = FramingTransport::new();

    harness.receive(LinkEvent::ConnectionOpened(ConnectionHandle(2)));
    harness.receive(subscribe());
    harness.fill_batch(ADC_MAX_CODE);
    harness.drain(&mut transport).unwrap();

    let mut decoder = FrameDecoder::new();
    let commands: Vec<LinkCommand> = transport.frames[0]
        .iter()
        .filter_map(|&byte| decoder.push_command(byte))
        .map(Result::unwrap)
        .collect();
    assert_eq!(
        commands,
        vec![
            LinkCommand::notify(
                ConnectionHandle(2),
                CharacteristicId::AVERAGE_VOLTAGE,
                &[0x0C, 0xE4],
            )
            .unwrap()
        ]
    );
}

#[test]
fn transport_failure_discards_reading_but_keeps_sampling() {
    let bench = SimulatedBench::<N>::new();
    let bridge = ReadingBridge::new();
    let mut harness = Harness::new(&bench, &bridge);
    let mut transport = FramingTransport::new();
    transport.refuse = true;

    harness.receive(LinkEvent::ConnectionOpened(ConnectionHandle(2)));
    harness.receive(subscribe());
    harness.fill_batch(1_000);

    assert_eq!(
        harness.drain(&mut transport),
        Err(LinkError::Transport(LinkBusy))
    );
    assert!(transport.frames.is_empty());
    assert_eq!(harness.session.failed(), 1);
    assert_eq!(harness.cycle.state(), CycleState::Active);
    assert!(!bridge.is_pending(), "failed reading is not redelivered");

    // Nothing is retried on the next drain.
    transport.refuse = false;
    assert_eq!(harness.drain(&mut transport), Ok(Delivery::Idle));
    assert!(transport.frames.is_empty());
}

#[test]
fn unsubscribe_stops_sampling_and_later_readings_are_dropped() {
    let bench = SimulatedBench::<N>::new();
    let bridge = ReadingBridge::new();
    let mut harness = Harness::new(&bench, &bridge);
    let mut transport = FramingTransport::new();

    harness.receive(LinkEvent::ConnectionOpened(ConnectionHandle(5)));
    harness.receive(subscribe());
    harness.fill_batch(0);
    harness.receive(LinkEvent::Subscription {
        characteristic: CharacteristicId::AVERAGE_VOLTAGE,
        enabled: false,
    });

    assert_eq!(harness.session.subscription(), SubscriptionState::Disabled);
    assert_eq!(harness.cycle.state(), CycleState::Idle);

    // The batch finished before the unsubscribe; its signal is still pending.
    let delivery = harness.drain(&mut transport).unwrap();
    assert!(matches!(delivery, Delivery::Dropped(reading) if reading.millivolts() == 0));
    assert!(transport.frames.is_empty());
    assert_eq!(harness.cycle.state(), CycleState::Idle, "no restart when unsubscribed");
}

#[test]
fn resubscribe_while_running_does_not_restart_the_batch() {
    let bench = SimulatedBench::<N>::new();
    let bridge = ReadingBridge::new();
    let mut harness = Harness::new(&bench, &bridge);

    harness.receive(LinkEvent::ConnectionOpened(ConnectionHandle(1)));
    harness.receive(subscribe());
    bench.pulse(10);
    bench.pulse(20);

    let now = harness.tick();
    let update = harness
        .session
        .on_subscription_changed(
            &mut harness.cycle,
            CharacteristicId::AVERAGE_VOLTAGE,
            true,
            now,
            &mut harness.telemetry,
        )
        .unwrap();

    assert_eq!(update, SubscriptionUpdate::Enabled(StartOutcome::AlreadyRunning));
    assert_eq!(bench.filled(), 2);
}

#[test]
fn restart_failure_after_delivery_is_reported() {
    let bench = SimulatedBench::<N>::new();
    let bridge = ReadingBridge::new();
    let mut harness = Harness::new(&bench, &bridge);
    let mut transport = FramingTransport::new();

    harness.receive(LinkEvent::ConnectionOpened(ConnectionHandle(3)));
    harness.receive(subscribe());
    harness.fill_batch(2048);
    bench.fail_next(Peripheral::PeriodicTrigger);

    let result = harness.drain(&mut transport);

    assert_eq!(
        result,
        Err(LinkError::Restart(HardwareError::rejected_start(
            Peripheral::PeriodicTrigger
        )))
    );
    assert_eq!(transport.frames.len(), 1, "the reading itself went out");
    assert_eq!(harness.cycle.state(), CycleState::Idle);

    let record = harness.telemetry.latest().copied().unwrap();
    assert_eq!(
        record.event,
        SamplerEventKind::CycleFault(Peripheral::PeriodicTrigger)
    );
    assert!(matches!(record.details, TelemetryPayload::Fault(_)));
}

#[test]
fn closed_connection_mid_batch_halts_without_signal() {
    let bench = SimulatedBench::<N>::new();
    let bridge = ReadingBridge::new();
    let mut harness = Harness::new(&bench, &bridge);

    harness.receive(LinkEvent::ConnectionOpened(ConnectionHandle(9)));
    harness.receive(subscribe());
    for _ in 0..N - 1 {
        bench.pulse(ADC_MAX_CODE);
    }
    harness.receive(LinkEvent::ConnectionClosed(ConnectionHandle(9)));

    assert_eq!(bench.pulse(ADC_MAX_CODE), PulseOutcome::Ignored);
    assert!(!bench.transfer_armed());
    assert!(!bridge.is_pending());
    assert_eq!(harness.session.connection(), None);
    assert_eq!(
        harness.cycle.stop(),
        StopOutcome::AlreadyIdle,
        "disconnect already stopped the cycle"
    );
}

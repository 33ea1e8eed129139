use core::cell::Cell;
use core::fmt::Write as _;
use core::time::Duration;

use sampler_core::config::{FULL_SCALE_MV, SAMPLE_COUNT, SamplerConfig};
use sampler_core::cycle::{SamplingCycle, StartOutcome, StopOutcome};
use sampler_core::link::{
    CharacteristicId, ConnectionHandle, Delivery, LinkError, LinkSession, NotificationTransport,
    SubscriptionUpdate,
};
use sampler_core::notify::{AveragedReading, ReadingBridge, ReadySink};
use sampler_core::peripherals::HardwareError;
use sampler_core::sim::{BenchPort, PulseOutcome, SimulatedBench};
use sampler_core::telemetry::{TelemetryInstant, TelemetryRecorder};

use crate::grammar::{self, Command};

const HELP_LINES: &[&str] = &[
    "connect [handle]          - a peer opens a connection",
    "subscribe                 - peer enables voltage notifications",
    "unsubscribe               - peer disables voltage notifications",
    "disconnect                - peer drops the connection",
    "pulse <raw> [count]       - feed trigger pulses with a raw code",
    "advance <ms>              - let simulated time pass",
    "fail <power|trigger|converter|transfer> - fail its next command",
    "status                    - show cycle, rail and link state",
    "help                      - list commands",
    "exit                      - leave the emulator",
];

/// Simulated time, as seen by the telemetry ring.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct BenchInstant(Duration);

impl TelemetryInstant for BenchInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

/// Counts "reading ready" signals so the session can run the event loop.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    raised: Cell<u32>,
}

impl ConsoleSink {
    pub fn raised(&self) -> u32 {
        self.raised.get()
    }
}

impl ReadySink for ConsoleSink {
    fn raise(&self, _mask: u32) {
        self.raised.set(self.raised.get().wrapping_add(1));
    }
}

/// Transport that renders notifications as console lines.
#[derive(Debug, Default)]
pub struct ConsoleTransport {
    outbox: Vec<String>,
}

impl NotificationTransport for ConsoleTransport {
    type Error = ();

    fn notify(
        &mut self,
        connection: ConnectionHandle,
        characteristic: CharacteristicId,
        payload: &[u8],
    ) -> Result<(), ()> {
        let mut hex = String::with_capacity(payload.len() * 2);
        for byte in payload {
            let _ = write!(hex, "{byte:02X}");
        }
        let millivolts = AveragedReading::decode_millivolts(payload)
            .map_or_else(|| "?".to_string(), |mv| mv.to_string());
        self.outbox.push(format!(
            "NOTIFY conn={} char=0x{:04X} value=0x{hex} ({millivolts} mV)",
            connection.0, characteristic.0
        ));
        Ok(())
    }
}

type Port<'a> = BenchPort<'a>;
type BenchCycle<'a> = SamplingCycle<'a, Port<'a>, Port<'a>, Port<'a>, Port<'a>, ConsoleSink>;

pub struct Session<'a> {
    bench: &'a SimulatedBench,
    bridge: &'a ReadingBridge<ConsoleSink>,
    cycle: BenchCycle<'a>,
    link: LinkSession,
    transport: ConsoleTransport,
    telemetry: TelemetryRecorder<BenchInstant>,
}

impl<'a> Session<'a> {
    pub fn new(
        bench: &'a SimulatedBench,
        bridge: &'a ReadingBridge<ConsoleSink>,
    ) -> Result<Self, HardwareError> {
        Self::with_config(bench, bridge, SamplerConfig::default())
    }

    /// Brings up the simulated chain; fails like the firmware would if a
    /// peripheral refuses its configuration.
    pub fn with_config(
        bench: &'a SimulatedBench,
        bridge: &'a ReadingBridge<ConsoleSink>,
        config: SamplerConfig,
    ) -> Result<Self, HardwareError> {
        let mut cycle = SamplingCycle::new(bench.chain(), bridge, config);
        cycle.initialize(&mut bench.port(), &mut bench.port())?;
        Ok(Self {
            bench,
            bridge,
            cycle,
            link: LinkSession::new(),
            transport: ConsoleTransport::default(),
            telemetry: TelemetryRecorder::new(),
        })
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<BenchInstant> {
        &self.telemetry
    }

    pub fn handle_command(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        match grammar::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(error) => vec![format!("ERR syntax {error}")],
        }
    }

    fn now(&self) -> BenchInstant {
        BenchInstant(self.bench.now())
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Connect(handle) => {
                let now = self.now();
                self.link
                    .on_connection_opened(handle, now, &mut self.telemetry);
                vec![format!("OK connected handle={}", handle.0)]
            }
            Command::Subscribe => self.set_subscription(true),
            Command::Unsubscribe => self.set_subscription(false),
            Command::Disconnect => {
                let now = self.now();
                let outcome = self
                    .link
                    .on_peer_disconnected(&mut self.cycle, now, &mut self.telemetry);
                vec![format!("OK disconnected sampling={}", stop_label(outcome))]
            }
            Command::Pulse { raw, count } => self.pulse(raw, count),
            Command::Advance { millis } => {
                self.bench.advance(Duration::from_millis(millis));
                vec![format!(
                    "OK t=+{}ms rail={}",
                    self.bench.now().as_millis(),
                    on_off(self.bench.rail_asserted())
                )]
            }
            Command::Fail(peripheral) => {
                self.bench.fail_next(peripheral);
                vec![format!("OK next {} command will fail", peripheral.label())]
            }
            Command::Status => self.status(),
            Command::Help => help_lines(),
        }
    }

    fn set_subscription(&mut self, enabled: bool) -> Vec<String> {
        let now = self.now();
        let update = self.link.on_subscription_changed(
            &mut self.cycle,
            CharacteristicId::AVERAGE_VOLTAGE,
            enabled,
            now,
            &mut self.telemetry,
        );
        match update {
            Ok(SubscriptionUpdate::Enabled(outcome)) => {
                vec![format!("OK subscribed sampling={}", start_label(outcome))]
            }
            Ok(SubscriptionUpdate::Disabled(outcome)) => {
                vec![format!("OK unsubscribed sampling={}", stop_label(outcome))]
            }
            Ok(SubscriptionUpdate::Ignored) => vec!["OK ignored".to_string()],
            Err(error) => vec![format!("ERR hardware {error}")],
        }
    }

    /// Feeds `count` trigger pulses one sample period apart, running the
    /// completion handler and event loop whenever a batch fills.
    fn pulse(&mut self, raw: u16, count: u16) -> Vec<String> {
        let period = self.cycle.config().sample_period();
        let mut stored = 0u32;
        let mut ignored = 0u32;
        let mut lost = 0u32;
        let mut lines = Vec::new();

        for _ in 0..count {
            self.bench.advance(period);
            match self.bench.pulse(raw) {
                PulseOutcome::Stored { .. } => stored += 1,
                PulseOutcome::Ignored => ignored += 1,
                PulseOutcome::Lost => lost += 1,
                PulseOutcome::BatchComplete => {
                    stored += 1;
                    let batch = self.bench.batch();
                    let reading = self.cycle.complete_batch(&batch);
                    drop(batch);
                    if let Some(reading) = reading {
                        lines.push(format!(
                            "READY seq={} avg={}mV",
                            reading.sequence(),
                            reading.millivolts()
                        ));
                    }
                    lines.extend(self.drain_ready());
                }
            }
        }

        lines.insert(
            0,
            format!("OK pulse stored={stored} ignored={ignored} lost={lost}"),
        );
        lines
    }

    fn drain_ready(&mut self) -> Vec<String> {
        let now = self.now();
        let delivery = self.link.on_reading_ready(
            &mut self.cycle,
            self.bridge,
            &mut self.transport,
            now,
            &mut self.telemetry,
        );

        let mut lines: Vec<String> = self.transport.outbox.drain(..).collect();
        match delivery {
            Ok(Delivery::Idle) => {}
            Ok(Delivery::Sent { restarted, .. }) => {
                lines.push(format!("RESTART sampling={}", start_label(restarted)));
            }
            Ok(Delivery::Dropped(reading)) => {
                lines.push(format!(
                    "DROPPED seq={} (no subscriber)",
                    reading.sequence()
                ));
            }
            Err(LinkError::Transport(())) => lines.push("ERR transport".to_string()),
            Err(LinkError::Restart(error)) => lines.push(format!("ERR restart {error}")),
        }
        lines
    }

    fn status(&self) -> Vec<String> {
        let counters = self.cycle.counters();
        let bench = self.bench.counters();
        let reading = self.bridge.current_reading().map_or_else(
            || "none".to_string(),
            |reading| format!("{}mV (seq {})", reading.millivolts(), reading.sequence()),
        );
        let connection = self
            .link
            .connection()
            .map_or_else(|| "none".to_string(), |handle| handle.to_string());

        vec![
            format!(
                "cycle: {:?} filled={}/{} t=+{}ms",
                self.cycle.state(),
                self.bench.filled(),
                SAMPLE_COUNT,
                self.bench.now().as_millis()
            ),
            format!(
                "rail: {} release={}",
                on_off(self.bench.rail_asserted()),
                self.bench
                    .release_deadline()
                    .map_or_else(|| "none".to_string(), |at| format!("+{}ms", at.as_millis()))
            ),
            format!(
                "link: conn={connection} subscription={:?} delivered={} failed={}",
                self.link.subscription(),
                self.link.delivered(),
                self.link.failed()
            ),
            format!(
                "reading: {reading} full-scale={FULL_SCALE_MV}mV signals={} coalesced={}",
                self.bridge.sink().raised(),
                self.bridge.coalesced_count()
            ),
            format!(
                "counters: started={} completed={} aborted={} start-failures={} conversions={} lost={}",
                counters.started,
                counters.completed,
                counters.aborted,
                counters.start_failures,
                bench.conversions,
                bench.lost_samples
            ),
            format!("telemetry: {} events", self.telemetry.len()),
        ]
    }
}

fn help_lines() -> Vec<String> {
    let mut lines = vec!["Available commands:".to_string()];
    lines.extend(HELP_LINES.iter().map(|line| format!("  {line}")));
    lines
}

fn start_label(outcome: StartOutcome) -> &'static str {
    match outcome {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyRunning => "already-running",
    }
}

fn stop_label(outcome: StopOutcome) -> &'static str {
    match outcome {
        StopOutcome::Halted => "halted",
        StopOutcome::AlreadyIdle => "idle",
    }
}

fn on_off(asserted: bool) -> &'static str {
    if asserted { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampler_core::peripherals::Peripheral;
    use sampler_core::telemetry::SamplerEventKind;

    fn run(session: &mut Session<'_>, script: &[&str]) -> Vec<String> {
        script
            .iter()
            .flat_map(|line| session.handle_command(line))
            .collect()
    }

    #[test]
    fn full_batch_notifies_subscriber_and_restarts() {
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge).unwrap();

        let output = run(&mut session, &["connect 3", "subscribe", "pulse 4095 128"]);

        assert_eq!(output[0], "OK connected handle=3");
        assert_eq!(output[1], "OK subscribed sampling=started");
        assert_eq!(output[2], "OK pulse stored=128 ignored=0 lost=0");
        assert_eq!(output[3], "READY seq=1 avg=3300mV");
        assert_eq!(
            output[4],
            "NOTIFY conn=3 char=0x001A value=0x0CE4 (3300 mV)"
        );
        assert_eq!(output[5], "RESTART sampling=started");
        assert_eq!(bridge.sink().raised(), 1);
    }

    #[test]
    fn pulses_without_subscription_are_ignored() {
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge).unwrap();

        let output = run(&mut session, &["connect", "pulse 100 5"]);

        assert_eq!(output[1], "OK pulse stored=0 ignored=5 lost=0");
    }

    #[test]
    fn disconnect_mid_batch_halts_sampling() {
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge).unwrap();

        let output = run(
            &mut session,
            &["connect 1", "subscribe", "pulse 2048 64", "disconnect", "pulse 2048 64"],
        );

        assert_eq!(output[3], "OK disconnected sampling=halted");
        assert_eq!(output[4], "OK pulse stored=0 ignored=64 lost=0");
        assert_eq!(bridge.sink().raised(), 0);
        assert_eq!(
            session.telemetry().latest().map(|record| record.event),
            Some(SamplerEventKind::PeerDisconnected)
        );
    }

    #[test]
    fn rail_drops_after_settle_time() {
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge).unwrap();

        let output = run(
            &mut session,
            &["connect", "subscribe", "advance 4", "advance 1"],
        );

        assert_eq!(output[2], "OK t=+4ms rail=on");
        assert_eq!(output[3], "OK t=+5ms rail=off");
    }

    #[test]
    fn injected_failure_is_reported_on_subscribe() {
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge).unwrap();

        let output = run(&mut session, &["connect", "fail trigger", "subscribe"]);

        assert_eq!(output[1], "OK next trigger command will fail");
        assert!(output[2].starts_with("ERR hardware"), "{}", output[2]);
        assert_eq!(
            session.telemetry().latest().map(|record| record.event),
            Some(SamplerEventKind::CycleFault(Peripheral::PeriodicTrigger))
        );
    }

    #[test]
    fn syntax_errors_are_reported() {
        let bench = SimulatedBench::new();
        let bridge = ReadingBridge::with_sink(ConsoleSink::default());
        let mut session = Session::new(&bench, &bridge).unwrap();

        let output = session.handle_command("pulse");
        assert_eq!(output.len(), 1);
        assert!(output[0].starts_with("ERR syntax"));
    }
}

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Firmware timestamps and logging hooks.
//!
//! The telemetry ring itself lives in `sampler-core`; this module binds it to
//! Embassy's monotonic clock and mirrors the interesting transitions to defmt
//! on the target or stdout on the host.

use core::time::Duration;

use embassy_time::Instant;
use sampler_core::link::{ConnectionHandle, LinkError, SubscriptionUpdate};
use sampler_core::notify::AveragedReading;
use sampler_core::peripherals::HardwareError;
use sampler_core::telemetry::{self as core_telemetry, TelemetryInstant};

/// Embassy instant wrapper used for every firmware telemetry record.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let micros = self
            .0
            .checked_duration_since(earlier.0)
            .map_or(0, |elapsed| elapsed.as_micros());
        Duration::from_micros(micros)
    }
}

/// Telemetry ring bound to the firmware clock.
pub type TelemetryRecorder = core_telemetry::TelemetryRecorder<FirmwareInstant>;

#[cfg(target_os = "none")]
pub fn log_bring_up(error: Option<HardwareError>) {
    match error {
        None => defmt::info!("sampler: peripheral chain ready"),
        Some(error) => defmt::error!(
            "sampler: bring-up failed at {} ({})",
            error.peripheral.label(),
            defmt::Debug2Format(&error.command)
        ),
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_bring_up(error: Option<HardwareError>) {
    match error {
        None => println!("sampler: peripheral chain ready"),
        Some(error) => println!("sampler: bring-up failed: {error}"),
    }
}

#[cfg(target_os = "none")]
pub fn log_connection(handle: ConnectionHandle, opened: bool, timestamp: FirmwareInstant) {
    let tag = if opened { "opened" } else { "closed" };
    defmt::info!(
        "link: connection {=u8} {} t={}us",
        handle.0,
        tag,
        timestamp.into_embassy().as_micros()
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_connection(handle: ConnectionHandle, opened: bool, timestamp: FirmwareInstant) {
    let tag = if opened { "opened" } else { "closed" };
    println!(
        "link: connection {handle} {tag} t={}us",
        timestamp.into_embassy().as_micros()
    );
}

fn subscription_label(update: SubscriptionUpdate) -> &'static str {
    match update {
        SubscriptionUpdate::Enabled(_) => "enabled",
        SubscriptionUpdate::Disabled(_) => "disabled",
        SubscriptionUpdate::Ignored => "ignored",
    }
}

#[cfg(target_os = "none")]
pub fn log_subscription(update: Result<SubscriptionUpdate, HardwareError>) {
    match update {
        Ok(update) => defmt::info!("link: subscription {}", subscription_label(update)),
        Err(error) => defmt::warn!(
            "link: subscription start rejected by {}",
            error.peripheral.label()
        ),
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_subscription(update: Result<SubscriptionUpdate, HardwareError>) {
    match update {
        Ok(update) => println!("link: subscription {}", subscription_label(update)),
        Err(error) => println!("link: subscription start rejected: {error}"),
    }
}

#[cfg(target_os = "none")]
pub fn log_reading(reading: AveragedReading, timestamp: FirmwareInstant) {
    defmt::info!(
        "sampler: reading #{=u32} {=u16}mV t={}us",
        reading.sequence(),
        reading.millivolts(),
        timestamp.into_embassy().as_micros()
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_reading(reading: AveragedReading, timestamp: FirmwareInstant) {
    println!(
        "sampler: reading #{} {}mV t={}us",
        reading.sequence(),
        reading.millivolts(),
        timestamp.into_embassy().as_micros()
    );
}

#[cfg(target_os = "none")]
pub fn log_delivery_error<E: core::fmt::Debug>(error: &LinkError<E>) {
    match error {
        LinkError::Transport(_) => defmt::warn!("link: notification dropped, transport busy"),
        LinkError::Restart(error) => defmt::warn!(
            "link: restart rejected by {}",
            error.peripheral.label()
        ),
    }
}

#[cfg(not(target_os = "none"))]
pub fn log_delivery_error<E: core::fmt::Debug>(error: &LinkError<E>) {
    println!("link: {error}");
}

#[cfg(target_os = "none")]
pub fn log_late_completion(timestamp: FirmwareInstant) {
    defmt::debug!(
        "sampler: batch completed after stop, discarded t={}us",
        timestamp.into_embassy().as_micros()
    );
}

#[cfg(not(target_os = "none"))]
pub fn log_late_completion(timestamp: FirmwareInstant) {
    println!(
        "sampler: batch completed after stop, discarded t={}us",
        timestamp.into_embassy().as_micros()
    );
}

#[cfg(target_os = "none")]
pub fn log_frame_error(error: sampler_core::link::frame::FrameError) {
    defmt::warn!("link: bad frame {}", defmt::Debug2Format(&error));
}

#[cfg(not(target_os = "none"))]
pub fn log_frame_error(error: sampler_core::link::frame::FrameError) {
    println!("link: bad frame {error:?}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sampler_core::telemetry::SamplerEventKind;

    #[test]
    fn elapsed_time_saturates_when_clock_runs_backwards() {
        let early = FirmwareInstant::from(Instant::from_micros(1_000));
        let late = FirmwareInstant::from(Instant::from_micros(21_000));

        assert_eq!(
            late.saturating_duration_since(early),
            Duration::from_millis(20)
        );
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn recorder_tracks_cycle_duration_in_firmware_time() {
        let mut telemetry = TelemetryRecorder::new();
        let start = FirmwareInstant::from(Instant::from_millis(10));
        let done = FirmwareInstant::from(Instant::from_millis(2_570));

        telemetry.record_cycle_started(start);
        telemetry.record_reading(
            SamplerEventKind::ReadingReady,
            AveragedReading::new(1_650, 1),
            done,
        );

        let record = telemetry.latest().copied().unwrap();
        assert_eq!(record.timestamp, done);
        match record.details {
            core_telemetry::TelemetryPayload::Reading(reading) => {
                assert_eq!(reading.cycle_duration, Some(Duration::from_millis(2_560)));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}

use embassy_futures::select::{Either, select};
use embassy_time::Timer;
use sampler_core::peripherals::PowerGate;

use super::SharedCycle;
use crate::hw::ReleaseSignal;

/// Drops the sensor rail once the newest scheduled deadline passes. A `None`
/// posted in the meantime means the rail was already released.
#[embassy_executor::task]
pub async fn run(cycle: &'static SharedCycle, release_at: &'static ReleaseSignal) -> ! {
    loop {
        let Some(mut deadline) = release_at.wait().await else {
            continue;
        };
        let expired = loop {
            match select(Timer::at(deadline), release_at.wait()).await {
                Either::First(()) => break true,
                Either::Second(Some(rescheduled)) => deadline = rescheduled,
                Either::Second(None) => break false,
            }
        };
        if expired {
            cycle.lock(|cell| cell.borrow_mut().chain_mut().power.release());
        }
    }
}

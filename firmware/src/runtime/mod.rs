use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use sampler_core::config::SamplerConfig;
use sampler_core::cycle::{SampleBuffer, SamplingChain, SamplingCycle};
use sampler_core::notify::ReadingBridge;
use static_cell::StaticCell;

use crate::hw::adc::AdcConverter;
use crate::hw::clocks::RccClocks;
use crate::hw::dma::{DmaEngine, TransferSignal};
use crate::hw::rail::SensorRail;
use crate::hw::timer::{Tim3Trigger, TriggerRoute};
use crate::hw::{ReleaseSignal, SamplerMutex};
use crate::link::{OutboundQueue, ReadySignal};
use crate::telemetry;

mod link_task;
mod rail_task;
mod sampler_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type FirmwareBridge = ReadingBridge<ReadySignal>;

pub(super) type FirmwareCycle =
    SamplingCycle<'static, SensorRail, Tim3Trigger, AdcConverter, DmaEngine<'static>, ReadySignal>;

/// The cycle is shared by the UART, DMA and rail tasks; all run in thread mode.
pub(super) type SharedCycle = Mutex<SamplerMutex, RefCell<FirmwareCycle>>;

pub(super) static READING_BRIDGE: FirmwareBridge = ReadingBridge::with_sink(ReadySignal::new());
pub(super) static TRANSFER_REQUESTS: TransferSignal = Signal::new();
pub(super) static RAIL_RELEASE: ReleaseSignal = Signal::new();
pub(super) static OUTBOUND_QUEUE: OutboundQueue = Channel::new();
static CYCLE: StaticCell<SharedCycle> = StaticCell::new();
static BATCH: StaticCell<SampleBuffer> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA6,
        PB0,
        PB1,
        TIM3,
        ADC1,
        DMA1_CH1,
        USART5,
        ..
    } = hal::init(config);

    // PA2 (ADC_IN2) stays in its reset analog mode.
    let chain = SamplingChain::new(
        SensorRail::new(Output::new(PA6, Level::Low, Speed::Low), &RAIL_RELEASE),
        Tim3Trigger::new(TIM3),
        AdcConverter::new(ADC1),
        DmaEngine::new(&TRANSFER_REQUESTS),
    );
    let mut cycle = SamplingCycle::new(chain, &READING_BRIDGE, SamplerConfig::default());
    let bring_up = cycle.initialize(&mut RccClocks, &mut TriggerRoute);
    telemetry::log_bring_up(bring_up.err());
    bring_up.expect("sampling chain bring-up");

    let cycle: &'static SharedCycle = CYCLE.init(Mutex::new(RefCell::new(cycle)));
    let batch = BATCH.init(SampleBuffer::new());

    spawner
        .spawn(sampler_task::run(cycle, &TRANSFER_REQUESTS, DMA1_CH1, batch))
        .expect("failed to spawn sampler task");

    spawner
        .spawn(rail_task::run(cycle, &RAIL_RELEASE))
        .expect("failed to spawn rail task");

    spawner
        .spawn(link_task::run(
            cycle,
            &READING_BRIDGE,
            &OUTBOUND_QUEUE,
            USART5,
            PB0,
            PB1,
        ))
        .expect("failed to spawn link task");

    core::future::pending::<()>().await;
}

use embassy_futures::join::join;
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use sampler_core::link::frame::MAX_FRAME_LEN;

use super::{FirmwareBridge, SharedCycle};
use crate::link::{OUTBOUND_QUEUE_DEPTH, OutboundQueue, RadioLink};
use crate::telemetry::FirmwareInstant;

const LINK_UART_BUFFER_SIZE: usize = MAX_FRAME_LEN * OUTBOUND_QUEUE_DEPTH;
const RADIO_UART_BAUD: u32 = 115_200;

static mut UART_TX_BUFFER: [u8; LINK_UART_BUFFER_SIZE] = [0; LINK_UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; LINK_UART_BUFFER_SIZE] = [0; LINK_UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// Runs the radio co-processor link: link events and "reading ready" signals
/// are handled in one loop, while queued notification frames drain to the
/// UART alongside it.
#[embassy_executor::task]
pub async fn run(
    cycle: &'static SharedCycle,
    bridge: &'static FirmwareBridge,
    outbound: &'static OutboundQueue,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = RADIO_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize radio UART")
    };

    let (mut uart_tx, mut uart_rx) = uart.split();
    let mut link = RadioLink::new(outbound.sender());
    let frames = outbound.receiver();

    let events = async move {
        let mut ingress = [0u8; MAX_FRAME_LEN];
        loop {
            let woken = select(uart_rx.read(&mut ingress), bridge.sink().wait()).await;
            match woken {
                Either::First(Ok(count)) if count > 0 => {
                    let now = FirmwareInstant::now();
                    cycle.lock(|cell| {
                        link.ingest(&mut *cell.borrow_mut(), &ingress[..count], now);
                    });
                }
                Either::First(Ok(_)) => {}
                Either::First(Err(_)) => {
                    defmt::warn!("link: UART read error");
                    Timer::after(Duration::from_millis(5)).await;
                }
                Either::Second(_mask) => {
                    let now = FirmwareInstant::now();
                    // Errors are logged by the link and never retried.
                    let _ = cycle.lock(|cell| link.deliver(&mut *cell.borrow_mut(), bridge, now));
                }
            }
        }
    };

    let egress = async move {
        loop {
            let frame = frames.receive().await;
            if uart_tx.write_all(&frame).await.is_err() || uart_tx.flush().await.is_err() {
                defmt::warn!("link: UART write error, frame dropped");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    };

    join(events, egress).await;
    loop {
        core::future::pending::<()>().await;
    }
}

use embassy_futures::select::{Either, select};
use embassy_stm32::Peri;
use embassy_stm32::dma::{Transfer, TransferOptions};
use embassy_stm32::peripherals::DMA1_CH1;
use sampler_core::cycle::SampleBuffer;

use super::SharedCycle;
use crate::hw::ADC_DMA_REQUEST;
use crate::hw::adc;
use crate::hw::dma::{TransferRequest, TransferSignal};
use crate::telemetry::{self, FirmwareInstant};

/// Owns the ADC DMA channel. Each arm request starts a transfer at the top of
/// the batch buffer; a completed transfer finalizes the cycle.
#[embassy_executor::task]
pub async fn run(
    cycle: &'static SharedCycle,
    requests: &'static TransferSignal,
    mut channel: Peri<'static, DMA1_CH1>,
    batch: &'static mut SampleBuffer,
) -> ! {
    loop {
        let mut request = requests.wait().await;

        while request == TransferRequest::Arm {
            let transfer = unsafe {
                Transfer::new_read(
                    channel.reborrow(),
                    ADC_DMA_REQUEST,
                    adc::data_register(),
                    batch.as_mut_slice(),
                    TransferOptions::default(),
                )
            };

            // Dropping the transfer on a new request halts the channel.
            let outcome = select(transfer, requests.wait()).await;
            match outcome {
                Either::First(()) => {
                    let reading = cycle.lock(|cell| cell.borrow_mut().complete_batch(batch));
                    if reading.is_none() {
                        telemetry::log_late_completion(FirmwareInstant::now());
                    }
                    break;
                }
                Either::Second(next) => request = next,
            }
        }
    }
}

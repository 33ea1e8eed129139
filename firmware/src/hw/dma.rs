//! Batch transfer engine front-end.
//!
//! The DMA channel is owned by the sampler task, which awaits the transfer and
//! finalizes the cycle when it completes. The engine handed to the cycle only
//! posts arm/disarm requests to that task.

use embassy_sync::signal::Signal;
use sampler_core::peripherals::{BatchTransferEngine, HardwareError};

use super::SamplerMutex;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferRequest {
    /// Start a fresh transfer at the beginning of the batch buffer.
    Arm,
    /// Abandon the in-flight transfer.
    Disarm,
}

pub type TransferSignal = Signal<SamplerMutex, TransferRequest>;

pub struct DmaEngine<'a> {
    requests: &'a TransferSignal,
}

impl<'a> DmaEngine<'a> {
    pub const fn new(requests: &'a TransferSignal) -> Self {
        Self { requests }
    }
}

impl BatchTransferEngine for DmaEngine<'_> {
    fn start(&mut self) -> Result<(), HardwareError> {
        self.requests.signal(TransferRequest::Arm);
        Ok(())
    }

    fn stop(&mut self) {
        self.requests.signal(TransferRequest::Disarm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_request_wins() {
        let requests = TransferSignal::new();
        let mut engine = DmaEngine::new(&requests);

        engine.start().unwrap();
        engine.stop();
        assert_eq!(requests.try_take(), Some(TransferRequest::Disarm));

        engine.stop();
        engine.start().unwrap();
        assert_eq!(requests.try_take(), Some(TransferRequest::Arm));
        assert_eq!(requests.try_take(), None);
    }
}

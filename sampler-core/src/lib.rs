#![no_std]

// Shared logic for the low-power voltage sampler.
//
// Everything here is free of the Rust standard library and of any particular
// HAL so the same state machine runs inside the MCU firmware, the host
// emulator, and the integration tests.

pub mod config;
pub mod cycle;
pub mod link;
pub mod notify;
pub mod peripherals;
pub mod sim;
pub mod telemetry;

//! Core firmware pieces for a BLE-controlled differential-drive rover on no-std platforms.
//!
//! For a host-side runnable setup, see the `rover-app/mock-mcu` binary.
#![no_std]

pub mod utils;

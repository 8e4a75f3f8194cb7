//! Utility re-exports and helper macros for the rover.
//!
//! This module re-exports the transport, command and control components, and
//! provides helper macros:
//!
//! - `config`: startup configuration (advertising, buffers, loop period)
//! - `connection`: BLE UART service and its stack abstraction
//! - `controllers`: command decoding, motion mapping and the control loop
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod connection;
pub mod controllers;

pub use config::RoverConfig;
pub use connection::uart::{BleEvent, BleStack, UartService};
pub use controllers::{
    command::{CommandDecoder, CommandMailbox, COMMAND_MAILBOX},
    control::ControlLoop,
    Actuators,
};
pub use embassy_time::*;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}

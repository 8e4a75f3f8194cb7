//! Module Exports
//!
//! This file exports the key modules used by the wireless command channel.
//!
//! # Modules
//! - `uart`: BLE UART service, connection tracking and receive buffering.

/// Module for the two-characteristic BLE UART service.
pub mod uart;

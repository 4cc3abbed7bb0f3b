//! BLE Inspector library
//! Scans for Bluetooth Low Energy peripherals, walks their GATT tree and
//! talks to them from the command line.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

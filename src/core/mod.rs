//! Core functionality of the inspector
//! Bluetooth access, payload decoding, the serial accessory session and
//! transcript analysis.

pub mod accessory;
pub mod assistant;
pub mod bluetooth;
pub mod decoder;

// Re-export commonly used types
pub use accessory::AccessorySession;
pub use assistant::{Analysis, Assistant, UartCommandSuggestion};
pub use bluetooth::BluetoothManager;

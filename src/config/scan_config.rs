use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, DEFAULT_SCAN_DURATION_SECS, MIN_RSSI_THRESHOLD,
    RECONNECT_DELAY_SECS,
};

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Advertisements weaker than this are ignored (dBm)
    pub min_rssi: i16,
    /// How long a one-shot scan runs
    pub duration_secs: u64,
    /// Connect to every newly discovered device to fetch its services
    pub auto_probe: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_rssi: MIN_RSSI_THRESHOLD,
            duration_secs: DEFAULT_SCAN_DURATION_SECS,
            auto_probe: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Delay before the single reconnect attempt to an auto-connect device
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: RECONNECT_DELAY_SECS,
            connect_timeout_secs: BLUETOOTH_OPERATION_TIMEOUT_SECS,
        }
    }
}

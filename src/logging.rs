use std::sync::OnceLock;

use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};

use crate::core::bluetooth::{BleEvent, EventHub, LogMessage};

static LOGGER: OnceLock<StatusLogger> = OnceLock::new();

/// Prints records to stderr and forwards them to event observers.
pub struct StatusLogger {
    hub: EventHub,
    level: Level,
}

impl StatusLogger {
    pub fn new(hub: EventHub, level: Level) -> Self {
        Self { hub, level }
    }

    /// Installs the logger. Fails if another logger is already installed.
    pub fn init(hub: EventHub, level: Level) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| StatusLogger::new(hub, level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))
    }

    fn log_message(record: &Record) -> LogMessage {
        LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

impl log::Log for StatusLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        // Debug output of dependencies (HTTP, platform stack) is too noisy
        metadata.level() <= self.level
            && (metadata.level() <= Level::Info || metadata.target().starts_with("ble_inspector"))
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.hub.emit(BleEvent::Log(Self::log_message(record)));
        }
    }

    fn flush(&self) {}
}

/// Installs [`StatusLogger`], falling back to `env_logger` when that fails.
pub fn setup_logging(hub: EventHub, verbose: bool) {
    let level = if verbose { Level::Debug } else { Level::Info };
    if StatusLogger::init(hub, level).is_err() {
        let _ = env_logger::builder()
            .filter_level(level.to_level_filter())
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn test_enabled_levels() {
        let (hub, _dispatcher) = EventHub::new();
        let logger = StatusLogger::new(hub, Level::Debug);
        let ours = Metadata::builder()
            .level(Level::Debug)
            .target("ble_inspector_lib::core")
            .build();
        let theirs = Metadata::builder()
            .level(Level::Debug)
            .target("hyper::proto")
            .build();
        let warning = Metadata::builder()
            .level(Level::Warn)
            .target("bluest")
            .build();
        assert!(logger.enabled(&ours));
        assert!(!logger.enabled(&theirs));
        assert!(logger.enabled(&warning));
    }

    #[test]
    fn test_log_message() {
        let record = Record::builder()
            .level(Level::Warn)
            .args(format_args!("Device {} disconnected", "AA"))
            .build();
        let message = StatusLogger::log_message(&record);
        assert_eq!(message.level, "WARN");
        assert_eq!(message.message, "Device AA disconnected");
        assert!(chrono::DateTime::parse_from_rfc3339(&message.timestamp).is_ok());
    }
}

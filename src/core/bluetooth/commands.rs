//! Commands written to peripheral characteristics
//! This module contains the payloads the tool sends and the writer seam used
//! to deliver them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::core::bluetooth::constants::FIND_ME_COMMAND;
use crate::core::decoder::display_uuid;

/// Unix time of the GPS epoch, 1980-01-06T00:00:00Z
pub const GPS_EPOCH_UNIX_SECS: i64 = 315_964_800;

const SECONDS_PER_WEEK: i64 = 7 * 24 * 3600;

/// How a payload is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// GPS week number and time of week in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsTime {
    pub week: i64,
    pub tow: i64,
}

impl From<DateTime<Utc>> for GpsTime {
    fn from(time: DateTime<Utc>) -> Self {
        let seconds = time.timestamp() - GPS_EPOCH_UNIX_SECS;
        Self {
            week: seconds / SECONDS_PER_WEEK,
            tow: seconds % SECONDS_PER_WEEK,
        }
    }
}

/// Payloads sent to a peripheral
#[derive(Debug, Clone, PartialEq)]
pub enum UartCommand {
    /// A terminal line, newline terminated
    Line(String),
    /// Arbitrary bytes
    Raw { data: Vec<u8>, mode: WriteMode },
    /// Immediate alert (0x01)
    FindMe,
    /// Time-range download request of the FM data logger
    FmGet {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        /// All stored data instead of only unsent data
        all: bool,
    },
}

impl UartCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Line(text) => format!("{}\n", text).into_bytes(),
            Self::Raw { data, .. } => data.clone(),
            Self::FindMe => FIND_ME_COMMAND.to_vec(),
            Self::FmGet { .. } => self.fm_get_text().unwrap_or_default().into_bytes(),
        }
    }

    pub fn write_mode(&self) -> WriteMode {
        match self {
            Self::Line(_) => WriteMode::WithoutResponse,
            Self::Raw { mode, .. } => *mode,
            Self::FindMe | Self::FmGet { .. } => WriteMode::WithResponse,
        }
    }

    fn fm_get_text(&self) -> Option<String> {
        match self {
            Self::FmGet { start, end, all } => {
                let start = GpsTime::from(*start);
                let end = GpsTime::from(*end);
                let mode = if *all { "1" } else { "0" };
                Some(format!(
                    "<GET, {},{}, {},{},{}>",
                    start.week, start.tow, end.week, end.tow, mode
                ))
            }
            _ => None,
        }
    }

    /// Transcript line recorded after the command was written.
    pub fn sent_line(&self, target: &Uuid) -> String {
        let target = display_uuid(target);
        match self {
            Self::Line(text) => format!("🚀 Sent Command: {} to {}", text, target),
            Self::FmGet { .. } => format!(
                "🚀 Sent: {} ➡️ {}",
                self.fm_get_text().unwrap_or_default(),
                target
            ),
            Self::Raw { data, .. } => format!(
                "🚀 Sent Command: {} to {}",
                crate::core::decoder::hex_string(data),
                target
            ),
            Self::FindMe => format!("🔔 Sent 'Find Me' command to {}", target),
        }
    }
}

/// Writes bytes to one characteristic
#[async_trait::async_trait]
pub trait CharacteristicWriter {
    fn uuid(&self) -> Uuid;

    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<()>;
}

/// Sends commands through a writer
pub struct CommandExecutor<T: CharacteristicWriter> {
    writer: T,
}

impl<T: CharacteristicWriter> CommandExecutor<T> {
    pub fn new(writer: T) -> Self {
        Self { writer }
    }

    /// Writes the command and returns its transcript line.
    pub async fn send(&self, command: &UartCommand) -> Result<String> {
        let data = command.to_bytes();
        info!(
            "Sending {} bytes to {} ({:?})",
            data.len(),
            display_uuid(&self.writer.uuid()),
            command.write_mode()
        );
        self.writer.write(&data, command.write_mode()).await?;
        Ok(command.sent_line(&self.writer.uuid()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    /// Records every write instead of touching hardware.
    #[derive(Clone)]
    pub(crate) struct RecordingWriter {
        pub uuid: Uuid,
        pub writes: Arc<Mutex<Vec<(Vec<u8>, WriteMode)>>>,
    }

    impl RecordingWriter {
        pub(crate) fn new(uuid: Uuid) -> Self {
            Self {
                uuid,
                writes: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait::async_trait]
    impl CharacteristicWriter for RecordingWriter {
        fn uuid(&self) -> Uuid {
            self.uuid
        }

        async fn write(&self, data: &[u8], mode: WriteMode) -> Result<()> {
            self.writes.lock().unwrap().push((data.to_vec(), mode));
            Ok(())
        }
    }

    #[test]
    fn test_gps_time() {
        let epoch = Utc.timestamp_opt(GPS_EPOCH_UNIX_SECS, 0).unwrap();
        assert_eq!(GpsTime::from(epoch), GpsTime { week: 0, tow: 0 });

        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(GpsTime::from(time), GpsTime { week: 2295, tow: 86400 });
    }

    #[test]
    fn test_fm_get_payload() {
        let command = UartCommand::FmGet {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            all: false,
        };
        assert_eq!(command.to_bytes(), b"<GET, 2295,86400, 2295,172800,0>".to_vec());
        assert_eq!(command.write_mode(), WriteMode::WithResponse);
    }

    #[tokio::test]
    async fn test_line_is_written_without_response() {
        let writer = RecordingWriter::new(crate::core::decoder::uuid_from_u16(0xFFE1));
        let executor = CommandExecutor::new(writer.clone());

        let line = executor
            .send(&UartCommand::Line("AT+VER".to_string()))
            .await
            .unwrap();

        assert_eq!(line, "🚀 Sent Command: AT+VER to FFE1");
        let writes = writer.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![(b"AT+VER\n".to_vec(), WriteMode::WithoutResponse)]
        );
    }

    #[tokio::test]
    async fn test_find_me() {
        let writer = RecordingWriter::new(crate::core::decoder::uuid_from_u16(0x2A06));
        let executor = CommandExecutor::new(writer.clone());
        executor.send(&UartCommand::FindMe).await.unwrap();
        assert_eq!(
            *writer.writes.lock().unwrap(),
            vec![(vec![0x01], WriteMode::WithResponse)]
        );
    }

    /// Fails every write the way a dropped link does.
    struct FailingWriter;

    #[async_trait::async_trait]
    impl CharacteristicWriter for FailingWriter {
        fn uuid(&self) -> Uuid {
            crate::core::decoder::uuid_from_u16(0xFFE1)
        }

        async fn write(&self, _data: &[u8], _mode: WriteMode) -> Result<()> {
            Err(crate::error::BleError::NotConnected("uart".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_failed_write_without_response_is_reported() {
        let executor = CommandExecutor::new(FailingWriter);
        let result = executor.send(&UartCommand::Line("AT".to_string())).await;
        assert!(result.is_err());
    }
}

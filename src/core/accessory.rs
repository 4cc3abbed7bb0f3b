//! Serial accessory session
//! Talks to a Bluetooth Classic accessory over an already-open byte stream,
//! such as an RFCOMM tty.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::{BleEvent, EventHub};

/// Largest chunk read from the accessory at once
pub const READ_CHUNK_SIZE: usize = 1024;

/// Transcript line for one received chunk.
pub fn render_chunk(data: &[u8]) -> String {
    let text = std::str::from_utf8(data).unwrap_or("Invalid data");
    format!("Received: {}", text)
}

pub struct AccessorySession<S> {
    writer: WriteHalf<S>,
    transcript: Arc<Mutex<Vec<String>>>,
    cancel_token: CancellationToken,
    /// Taken once the reader has been awaited
    reader_task: Option<JoinHandle<()>>,
}

impl<S> AccessorySession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Starts reading from the stream in the background.
    pub fn open(stream: S, hub: EventHub) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let cancel_token = CancellationToken::new();

        let reader_task = tokio::spawn(Self::read_loop(
            reader,
            hub,
            transcript.clone(),
            cancel_token.clone(),
        ));
        info!("Accessory session opened");

        Self {
            writer,
            transcript,
            cancel_token,
            reader_task: Some(reader_task),
        }
    }

    /// Writes the raw UTF-8 bytes of `text`.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await?;
        info!("Sent to accessory: {}", text);
        Ok(())
    }

    pub fn transcript(&self) -> Vec<String> {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_open(&self) -> bool {
        self.reader_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Waits until the accessory closes the stream.
    pub async fn closed(&mut self) {
        if let Some(task) = self.reader_task.as_mut() {
            if let Err(e) = task.await {
                error!("Accessory reader task failed: {}", e);
            }
            self.reader_task = None;
        }
    }

    pub async fn close(mut self) {
        self.cancel_token.cancel();
        self.closed().await;
        info!("Accessory session closed");
    }

    async fn read_loop(
        mut reader: ReadHalf<S>,
        hub: EventHub,
        transcript: Arc<Mutex<Vec<String>>>,
        cancel_token: CancellationToken,
    ) {
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = tokio::select! {
                read = reader.read(&mut buffer) => read,
                _ = cancel_token.cancelled() => break,
            };
            match read {
                Ok(0) => {
                    info!("Accessory closed the stream");
                    break;
                }
                Ok(n) => {
                    debug!("Read {} bytes from accessory", n);
                    let line = render_chunk(&buffer[..n]);
                    transcript
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(line.clone());
                    hub.emit(BleEvent::AccessoryReceived(line));
                }
                Err(e) => {
                    error!("Accessory read failed: {}", e);
                    hub.status(format!("Accessory read failed: {}", e));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_chunk() {
        assert_eq!(render_chunk(b"$GPRMC,1"), "Received: $GPRMC,1");
        assert_eq!(render_chunk(&[0xFF, 0xFE]), "Received: Invalid data");
    }

    #[tokio::test]
    async fn test_received_text_reaches_transcript() {
        let (client, mut accessory) = tokio::io::duplex(4096);
        let (hub, _dispatcher) = EventHub::new();
        let mut session = AccessorySession::open(client, hub);

        accessory.write_all(b"STATUS OK").await.unwrap();
        drop(accessory);
        session.closed().await;

        assert!(!session.is_open());
        assert_eq!(session.transcript(), vec!["Received: STATUS OK"]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_reported() {
        let (client, mut accessory) = tokio::io::duplex(4096);
        let (hub, _dispatcher) = EventHub::new();
        let mut session = AccessorySession::open(client, hub);

        accessory.write_all(&[0xC3, 0x28]).await.unwrap();
        drop(accessory);
        session.closed().await;

        assert_eq!(session.transcript(), vec!["Received: Invalid data"]);
    }

    #[tokio::test]
    async fn test_send_writes_raw_bytes() {
        let (client, mut accessory) = tokio::io::duplex(4096);
        let (hub, _dispatcher) = EventHub::new();
        let mut session = AccessorySession::open(client, hub);

        session.send("GET STATUS").await.unwrap();
        let mut buffer = [0u8; 10];
        accessory.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"GET STATUS");

        session.close().await;
    }
}

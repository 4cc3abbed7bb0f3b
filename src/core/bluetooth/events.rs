//! Event fan-out
//! Bluetooth tasks emit events from whatever task they run on. A single
//! dispatcher task delivers them, in order, to every live observer.

use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::bluetooth::types::PeripheralRecord;

/// A log record forwarded to observers.
#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Events produced by the Bluetooth layer.
#[derive(Debug, Clone)]
pub enum BleEvent {
    ScanStarted,
    ScanComplete,
    /// Snapshot of every discovered device after a change
    DevicesUpdated(Vec<PeripheralRecord>),
    DeviceConnected { id: String },
    DeviceDisconnected { id: String },
    /// A value was read or notified
    ValueUpdated {
        id: String,
        uuid: Uuid,
        value: Vec<u8>,
        line: String,
    },
    /// A command was written; `line` is its transcript line
    Sent { id: String, line: String },
    /// A chunk received from the serial accessory
    AccessoryReceived(String),
    /// Transient status text
    Status(String),
    Log(LogMessage),
}

/// Receives events on the dispatcher task.
pub trait BleObserver: Send + Sync {
    fn on_event(&self, event: &BleEvent);
}

type ObserverList = Arc<Mutex<Vec<Weak<dyn BleObserver>>>>;

/// Cheap, clonable handle used to emit events and register observers.
#[derive(Clone)]
pub struct EventHub {
    tx: mpsc::UnboundedSender<BleEvent>,
    observers: ObserverList,
}

impl EventHub {
    /// Creates the hub and the dispatcher that must be run to deliver events.
    pub fn new() -> (Self, EventDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observers: ObserverList = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                tx,
                observers: observers.clone(),
            },
            EventDispatcher { rx, observers },
        )
    }

    /// Registers an observer. The hub only keeps a weak reference.
    pub fn subscribe(&self, observer: &Arc<dyn BleObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.push(Arc::downgrade(observer));
    }

    /// Queues an event. Events emitted after the dispatcher stopped are dropped.
    pub fn emit(&self, event: BleEvent) {
        // No logging here, the logger itself emits through the hub
        let _ = self.tx.send(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(BleEvent::Status(message.into()));
    }
}

/// Delivers queued events to observers.
pub struct EventDispatcher {
    rx: mpsc::UnboundedReceiver<BleEvent>,
    observers: ObserverList,
}

impl EventDispatcher {
    /// Runs until every [`EventHub`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.deliver(&event);
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Delivers everything queued so far without waiting for more.
    #[cfg(test)]
    pub(crate) fn deliver_pending(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.deliver(&event);
        }
    }

    fn deliver(&self, event: &BleEvent) {
        let live: Vec<Arc<dyn BleObserver>> = {
            let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.on_event(event);
        }
    }
}

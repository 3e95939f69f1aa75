//! Client events for observers
//!
//! Workers never call back into a UI. They push events onto one bounded
//! queue. Subscribers share that queue: each event reaches exactly one of
//! them, and events emitted before a subscriber exists stay queued for it.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Event queue depth; events are dropped past this
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Something observers may want to know about
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    VoiceConnected,
    VoiceDisconnected { connection_error: bool },
    SyncConnected,
    SyncDisconnected,
    VersionMismatch { server: String, minimum: String },
    PeerDisconnected { id: String },
    ServerSettingsChanged,
    ExternalModeStarted { coalition: i32 },
    ExternalModeFailed,
    ExternalModeStopped,
    TransmitStarted { radio: usize },
    TransmitEnded { radio: usize },
    ReceiveEnded { radio: usize },
}

/// Fan-in event queue with work-queue delivery
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<ClientEvent>,
    rx: Receiver<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self { tx, rx }
    }

    /// Publish without blocking the caller
    pub fn emit(&self, event: ClientEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Handle on the shared queue. Not a broadcast: concurrent
    /// subscribers compete for events.
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.rx.clone()
    }
}

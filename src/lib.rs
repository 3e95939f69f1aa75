//! # Sim Radio
//!
//! Half-duplex radio voice client for flight simulators. Voice travels over
//! TCP with simulated propagation; radio state comes from the simulator and
//! is shared with everyone else in the session.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SIMULATOR (localhost) ──────────────────────────┐
//! │   radio snapshots (UDP 9084)     LOS results (UDP 9086)     LOS requests (9087) │
//! └──────────────┬──────────────────────────┬──────────────────────────▲────────────┘
//!                ▼                          ▼                          │
//! ┌───────────────────────────┐   ┌──────────────────────┐             │
//! │ SnapshotListener          │   │ LosListener          │─────────────┘
//! │ (network::feed)           │   │ (network::feed)      │──► PeerRoster.los
//! └─────────────┬─────────────┘   └──────────────────────┘
//!               │ crossbeam bounded       ▲ ExternalModeLoop (headless snapshots)
//!               ▼                         │
//! ┌───────────────────────────┐           │         ┌───────────────────────────┐
//! │ RadioSyncWorker           │──► StateBroadcaster ─► overlays (UDP 7080/7082)  │
//! │ (reconcile)               │           │         └───────────────────────────┘
//! │  Reconciler + presets     │──► ClientState (radio set, sending, receiving)
//! └─────────────┬─────────────┘           │
//!               │ Arc<PlayerRadioSet>     │
//!               ▼                         │
//! ┌───────────────────────────┐           │
//! │ SyncClient                │◄──────────┘
//! │ (network::sync)           │──► PeerRoster, ServerSettings, EventBus
//! └─────────────┬─────────────┘
//!               │ JSON lines over TCP
//!               ▼
//! ┌─────────────────────────────────── SERVER ──────────────────────────────────────┐
//! │         session sync (port N)                   voice relay (port N+1)          │
//! └─────────────────────────────────────────────────────────┬───────────────────▲───┘
//!                                                           ▼                   │
//!                                      ┌────────────────────────────┐           │
//!                                      │ VoiceTransport             │  send_audio
//!                                      │ (network::voice)           │───────────┘
//!                                      └─────────────┬──────────────┘
//!                                                    │ raw frames, bounded(512)
//!                                                    ▼
//!                                      ┌────────────────────────────┐
//!                                      │ SelectionEngine            │──► AudioSink
//!                                      │ (propagation)              │
//!                                      └────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod network;
pub mod propagation;
pub mod radio;
pub mod reconcile;
pub mod roster;
pub mod settings;
pub mod state;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Snapshots buffered between the feed and the reconcile worker
    pub const SNAPSHOT_QUEUE_CAPACITY: usize = 32;

    /// Received transmissions buffered ahead of playback
    pub const PLAYBACK_QUEUE_CAPACITY: usize = 256;

    /// Radio slots per participant, intercom included
    pub const RADIO_COUNT: usize = crate::radio::MAX_RADIOS;

    /// Default session sync port
    pub const DEFAULT_SYNC_PORT: u16 = 5002;
}

//! Radio Client Application
//!
//! Connects to a radio server, follows the local simulator's radio state and
//! relays received voice to the playback queue.
//!
//! Usage: `simradio-client [config.toml]`

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use simradio::{
    audio::{AudioEffects, ChannelSink},
    config::AppConfig,
    constants::*,
    events::{ClientEvent, EventBus},
    identity::new_client_id,
    network::{LosListener, SnapshotListener, StateBroadcaster, StopSignal, SyncClient, VoiceTransport},
    propagation::SelectionEngine,
    radio::PresetBank,
    reconcile::{RadioSyncWorker, OUTBOUND_CAPACITY},
    roster::PeerRoster,
    settings::ServerSettings,
    state::{ClientState, LocalIdentity},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sim Radio client");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    let client_id = new_client_id();
    tracing::info!("Client id {}", client_id);

    // Shared state
    let state = Arc::new(ClientState::new(
        client_id.clone(),
        LocalIdentity {
            name: config.client.name.clone(),
            coalition: config.client.coalition,
        },
        PresetBank::load_all(config.client.preset_dir.as_deref(), RADIO_COUNT - 1),
    ));
    let roster = Arc::new(PeerRoster::new());
    let settings = Arc::new(ServerSettings::new());
    let events = EventBus::new();
    let stop = StopSignal::new();

    let (snapshot_tx, snapshot_rx) = bounded(SNAPSHOT_QUEUE_CAPACITY);
    let (outbound_tx, outbound_rx) = bounded(OUTBOUND_CAPACITY);
    let (sink, playback_rx) = ChannelSink::new(PLAYBACK_QUEUE_CAPACITY);
    let sink = Arc::new(sink);

    let mut handles = Vec::new();

    // Simulator feed
    handles.push(SnapshotListener::new(config.feed.snapshot_port, snapshot_tx.clone()).spawn(stop.clone())?);
    handles.push(
        LosListener::new(
            config.feed.los_result_port,
            config.feed.los_request_port,
            client_id.clone(),
            roster.clone(),
            settings.clone(),
        )
        .spawn(stop.clone())?,
    );

    // Reconcile
    let broadcaster = StateBroadcaster::new(state.clone(), roster.clone(), &config.feed.broadcast_ports)?;
    let worker = RadioSyncWorker::new(state.clone(), settings.clone(), config.client.policy(), outbound_tx)
        .with_broadcaster(broadcaster);
    handles.push(worker.spawn(snapshot_rx, stop.clone())?);

    // Session sync
    let mut sync = SyncClient::new(
        config.sync()?,
        state.clone(),
        roster.clone(),
        settings.clone(),
        events.clone(),
        snapshot_tx,
        stop.clone(),
    );
    sync.start(outbound_rx)?;

    // Voice
    let engine = Arc::new(SelectionEngine::new(state.clone(), roster.clone(), settings.clone(), sink.clone()));
    let mut voice = VoiceTransport::new(config.network.voice()?, state.clone(), engine, events.clone(), stop.clone());
    voice.start()?;

    handles.push(AudioEffects::new(state.clone(), sink, events.clone()).spawn(stop.clone())?);

    // Playback has no device here; report what would be played
    let playback_stop = stop.clone();
    handles.push(thread::Builder::new().name("playback".into()).spawn(move || {
        while !playback_stop.is_stopped() {
            if let Ok(audio) = playback_rx.recv_timeout(std::time::Duration::from_millis(250)) {
                tracing::debug!(
                    "Received {} bytes from {} on radio {} ({:.3} MHz)",
                    audio.audio.len(),
                    audio.sender_id,
                    audio.received_on,
                    audio.frequency / 1e6
                );
            }
        }
    })?);

    // Event log
    let event_rx = events.subscribe();
    let event_stop = stop.clone();
    handles.push(thread::Builder::new().name("event-log".into()).spawn(move || {
        while !event_stop.is_stopped() {
            let Ok(event) = event_rx.recv_timeout(std::time::Duration::from_millis(250)) else {
                continue;
            };
            match event {
                ClientEvent::VersionMismatch { server, minimum } => {
                    tracing::error!("Server version {} is not supported (minimum {})", server, minimum);
                }
                ClientEvent::VoiceDisconnected { connection_error: true } => {
                    tracing::error!("Could not reach the voice server");
                }
                other => tracing::info!("Event: {:?}", other),
            }
        }
    })?);

    tracing::info!("Client running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    stop.stop();
    voice.stop();
    sync.stop();
    for handle in handles {
        let _ = handle.join();
    }

    tracing::info!("Stopped");
    Ok(())
}

//! Session sync client
//!
//! Line-delimited JSON over TCP. The connection thread owns the read side
//! and applies every inbound message to the roster, server settings and
//! client state. The outbound thread turns reconciled radio sets into
//! RADIO_UPDATE messages.

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::codec::{MessageType, NetworkMessage, ProtocolVersion, MINIMUM_PROTOCOL_VERSION};
use crate::error::{NetworkError, SyncError};
use crate::events::{ClientEvent, EventBus};
use crate::network::feed::{load_channel_file, ExternalModeLoop};
use crate::network::{connect_tcp, is_timeout, StopSignal};
use crate::radio::PlayerRadioSet;
use crate::roster::{PeerRecord, PeerRoster};
use crate::settings::{ServerSettingKey, ServerSettings};
use crate::state::ClientState;

/// Consecutive undecodable lines tolerated before disconnecting
pub const MAX_DECODE_ERRORS: u32 = 3;

/// Sync connection settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub server: SocketAddr,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Request external mode with this password on every connect
    pub external_mode_password: Option<String>,
    /// Radio layout used while in external mode
    pub channel_file: Option<PathBuf>,
}

impl SyncConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            external_mode_password: None,
            channel_file: None,
        }
    }
}

/// Counts consecutive decode failures; any success resets the count
#[derive(Debug, Default)]
pub struct DecodeErrorTracker {
    consecutive: u32,
}

impl DecodeErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Err once the threshold is reached
    pub fn record_failure(&mut self) -> Result<(), SyncError> {
        self.consecutive += 1;
        if self.consecutive >= MAX_DECODE_ERRORS {
            return Err(SyncError::TooManyDecodeErrors(self.consecutive));
        }
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }
}

/// What the session does after handling a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    /// Drop the connection and reconnect
    Disconnect,
    /// Drop the connection and stop reconnecting
    Fatal,
}

/// Read one newline-terminated line into `line`, riding out read timeouts.
/// Returns false when stopped.
fn read_line<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, stop: &StopSignal) -> Result<bool, NetworkError> {
    loop {
        if stop.is_stopped() {
            return Ok(false);
        }
        match reader.read_until(b'\n', line) {
            Ok(0) => return Err(NetworkError::Closed),
            Ok(_) if line.ends_with(b"\n") => return Ok(true),
            // data then EOF
            Ok(_) => return Err(NetworkError::Closed),
            Err(e) if is_timeout(&e) || e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }
}

struct Shared {
    config: SyncConfig,
    state: Arc<ClientState>,
    roster: Arc<PeerRoster>,
    settings: Arc<ServerSettings>,
    events: EventBus,
    stop: StopSignal,
    snapshots: Sender<PlayerRadioSet>,
    writer: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    /// Set once the first SYNC of the current connection is applied
    synced: AtomicBool,
    external: Mutex<Option<ExternalModeLoop>>,
}

impl Shared {
    // Outbound

    fn send(&self, message: &NetworkMessage) -> Result<(), NetworkError> {
        let line = message
            .encode_line()
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let mut writer = self.writer.lock();
        let stream = writer.as_mut().ok_or(NetworkError::NotConnected)?;
        if let Err(e) = stream.write_all(line.as_bytes()) {
            let _ = stream.shutdown(Shutdown::Both);
            *writer = None;
            self.connected.store(false, Ordering::SeqCst);
            return Err(NetworkError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    fn local_coalition(&self) -> i32 {
        if self.state.external_mode_active() {
            self.state.external_coalition()
        } else {
            self.state.identity().coalition
        }
    }

    /// Our own roster entry, optionally carrying a radio set
    fn own_record(&self, radio: Option<&PlayerRadioSet>) -> PeerRecord {
        let current = self.state.radio_set();
        let source = radio.unwrap_or(&current);
        let name = if source.name.is_empty() {
            self.state.identity().name
        } else {
            source.name.clone()
        };

        PeerRecord {
            name,
            coalition: self.local_coalition(),
            position: source.pos,
            lat_lng: source.lat_lng,
            radio_info: radio.cloned(),
            ..PeerRecord::new(self.state.client_id())
        }
    }

    fn radio_update(&self, radio: &PlayerRadioSet) -> NetworkMessage {
        NetworkMessage::new(MessageType::RadioUpdate).with_client(self.own_record(Some(radio)))
    }

    fn run_outbound(&self, outbound: Receiver<Arc<PlayerRadioSet>>) {
        loop {
            select! {
                recv(outbound) -> radio => {
                    let Ok(radio) = radio else { break };
                    if !self.connected.load(Ordering::SeqCst) {
                        continue;
                    }
                    if let Err(e) = self.send(&self.radio_update(&radio)) {
                        tracing::debug!("Radio update not sent: {}", e);
                    }
                }
                recv(self.stop.receiver()) -> _ => break,
            }
        }
    }

    // Connection

    fn run_connection(&self) {
        while !self.stop.is_stopped() {
            tracing::info!("Connecting sync to {}", self.config.server);
            match connect_tcp(self.config.server, self.config.connect_timeout) {
                Ok(stream) => {
                    let control = self.run_session(stream);
                    self.on_disconnect();
                    if control == SessionControl::Fatal {
                        tracing::error!("Sync stopped, not reconnecting");
                        return;
                    }
                }
                Err(e) => tracing::warn!("Sync connect to {} failed: {}", self.config.server, e),
            }

            if self.stop.wait_timeout(self.config.reconnect_delay) {
                break;
            }
        }
    }

    fn run_session(&self, stream: TcpStream) -> SessionControl {
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                tracing::warn!("Sync socket clone failed: {}", e);
                return SessionControl::Disconnect;
            }
        };
        *self.writer.lock() = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        self.synced.store(false, Ordering::SeqCst);
        self.roster.clear();

        if let Err(e) = self.send(&NetworkMessage::new(MessageType::Sync).with_client(self.own_record(None))) {
            tracing::warn!("Initial sync failed: {}", e);
            return SessionControl::Disconnect;
        }
        if let Some(password) = &self.config.external_mode_password {
            let mut request = NetworkMessage::new(MessageType::ExternalAwacsModePassword).with_client(self.own_record(None));
            request.external_mode_password = Some(password.clone());
            if let Err(e) = self.send(&request) {
                tracing::warn!("External mode request failed: {}", e);
                return SessionControl::Disconnect;
            }
        }
        tracing::info!("Sync connected to {}", self.config.server);
        self.events.emit(ClientEvent::SyncConnected);

        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let mut errors = DecodeErrorTracker::new();
        loop {
            line.clear();
            match read_line(&mut reader, &mut line, &self.stop) {
                Ok(true) => {}
                Ok(false) => return SessionControl::Disconnect,
                Err(e) => {
                    tracing::warn!("Sync connection lost: {}", e);
                    return SessionControl::Disconnect;
                }
            }

            let text = String::from_utf8_lossy(&line);
            if text.trim().is_empty() {
                continue;
            }

            match NetworkMessage::decode_line(&text) {
                Ok(message) => {
                    errors.record_success();
                    let control = self.handle_message(message, Instant::now());
                    if control != SessionControl::Continue {
                        return control;
                    }
                }
                Err(e) => {
                    tracing::warn!("Undecodable sync message: {}", e);
                    if let Err(e) = errors.record_failure() {
                        tracing::error!("Disconnecting: {}", e);
                        return SessionControl::Disconnect;
                    }
                }
            }
        }
    }

    fn on_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(stream) = self.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.roster.clear();
        self.state.mark_radio_set_stale();
        self.state.set_last_sent(None);
        self.stop_external_mode();
        self.events.emit(ClientEvent::SyncDisconnected);
    }

    // Inbound

    fn handle_message(&self, message: NetworkMessage, now: Instant) -> SessionControl {
        let control = match message.msg_type {
            MessageType::Ping => SessionControl::Continue,
            MessageType::Update | MessageType::RadioUpdate => {
                if let Some(settings) = message.server_settings {
                    self.apply_settings(settings);
                }
                if let Some(client) = message.client {
                    if client.id != self.state.client_id() {
                        let refresh = message.msg_type == MessageType::RadioUpdate;
                        if self.roster.upsert(client, refresh, now) {
                            tracing::debug!("New peer ({} known)", self.roster.len());
                        }
                    }
                }
                SessionControl::Continue
            }
            MessageType::Sync => match self.check_version(message.version.as_deref()) {
                Some(control) => control,
                None => {
                    let own_id = self.state.client_id();
                    let clients: Vec<PeerRecord> = message
                        .clients
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|c| c.id != own_id)
                        .collect();
                    let first = !self.synced.swap(true, Ordering::SeqCst);
                    self.roster.seed(clients, first, now);
                    self.apply_settings(message.server_settings.unwrap_or_default());
                    tracing::info!("Synced {} peers", self.roster.len());
                    SessionControl::Continue
                }
            },
            MessageType::ServerSettings => match self.check_version(message.version.as_deref()) {
                Some(control) => control,
                None => {
                    self.apply_settings(message.server_settings.unwrap_or_default());
                    SessionControl::Continue
                }
            },
            MessageType::ClientDisconnect => {
                if let Some(client) = message.client {
                    if self.roster.remove(&client.id).is_some() {
                        self.events.emit(ClientEvent::PeerDisconnected { id: client.id });
                    }
                }
                SessionControl::Continue
            }
            MessageType::VersionMismatch => {
                let server = message.version.unwrap_or_default();
                tracing::error!("Server reports version mismatch (server {})", server);
                self.events.emit(ClientEvent::VersionMismatch {
                    server,
                    minimum: MINIMUM_PROTOCOL_VERSION.to_string(),
                });
                SessionControl::Fatal
            }
            MessageType::ExternalAwacsModePassword => {
                let coalition = message.client.map(|c| c.coalition).unwrap_or(0);
                self.handle_external_auth(coalition);
                SessionControl::Continue
            }
            MessageType::ExternalAwacsModeDisconnect => {
                self.stop_external_mode();
                SessionControl::Continue
            }
        };

        if self.state.external_mode_active() && !self.settings.get_bool(ServerSettingKey::ExternalAwacsMode) {
            tracing::info!("External mode disabled by server");
            self.stop_external_mode();
        }
        control
    }

    /// None when compatible, else how to end the session
    fn check_version(&self, advertised: Option<&str>) -> Option<SessionControl> {
        match ProtocolVersion::check_compatible(advertised) {
            Ok(_) => None,
            Err(SyncError::VersionMismatch { server, minimum }) => {
                tracing::error!("Server version {} is older than {}", server, minimum);
                self.events.emit(ClientEvent::VersionMismatch { server, minimum });
                Some(SessionControl::Fatal)
            }
            Err(e) => {
                tracing::error!("Incompatible server: {}", e);
                Some(SessionControl::Fatal)
            }
        }
    }

    fn apply_settings(&self, settings: HashMap<String, String>) {
        self.settings.replace(settings);
        self.events.emit(ClientEvent::ServerSettingsChanged);
    }

    fn handle_external_auth(&self, coalition: i32) {
        if coalition == 0 {
            tracing::warn!("External mode rejected by server");
            self.stop_external_mode();
            self.events.emit(ClientEvent::ExternalModeFailed);
            return;
        }

        self.stop_external_mode();
        self.state.set_external_mode(true, coalition);
        let radios = load_channel_file(self.config.channel_file.as_deref());
        match ExternalModeLoop::start(self.state.clone(), self.snapshots.clone(), radios, self.stop.clone()) {
            Ok(external) => {
                *self.external.lock() = Some(external);
                tracing::info!("External mode active for coalition {}", coalition);
                self.events.emit(ClientEvent::ExternalModeStarted { coalition });
            }
            Err(e) => {
                tracing::error!("Failed to start external mode: {}", e);
                self.state.set_external_mode(false, 0);
                self.events.emit(ClientEvent::ExternalModeFailed);
            }
        }
    }

    fn stop_external_mode(&self) {
        let running = self.external.lock().take();
        if let Some(external) = running {
            external.stop();
        }
        if self.state.external_mode_active() {
            self.state.set_external_mode(false, 0);
            self.state.mark_radio_set_stale();
            self.state.set_last_sent(None);
            self.events.emit(ClientEvent::ExternalModeStopped);
        }
    }
}

/// Session control client
pub struct SyncClient {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl SyncClient {
    pub fn new(
        config: SyncConfig,
        state: Arc<ClientState>,
        roster: Arc<PeerRoster>,
        settings: Arc<ServerSettings>,
        events: EventBus,
        snapshots: Sender<PlayerRadioSet>,
        stop: StopSignal,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state,
                roster,
                settings,
                events,
                stop,
                snapshots,
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                synced: AtomicBool::new(false),
                external: Mutex::new(None),
            }),
            handles: Vec::new(),
        }
    }

    /// Spawn the connection and outbound threads. `outbound` carries
    /// reconciled radio sets to publish.
    pub fn start(&mut self, outbound: Receiver<Arc<PlayerRadioSet>>) -> std::io::Result<()> {
        let shared = self.shared.clone();
        self.handles.push(
            thread::Builder::new()
                .name("sync-connection".into())
                .spawn(move || shared.run_connection())?,
        );

        let shared = self.shared.clone();
        self.handles.push(
            thread::Builder::new()
                .name("sync-outbound".into())
                .spawn(move || shared.run_outbound(outbound))?,
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Apply one inbound message as if it arrived on the wire
    pub fn handle_message(&self, message: NetworkMessage, now: Instant) -> SessionControl {
        self.shared.handle_message(message, now)
    }

    pub fn stop(&mut self) {
        self.shared.stop.stop();
        if let Some(stream) = self.shared.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        self.shared.stop_external_mode();
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}

//! Local simulator feed
//!
//! ```text
//!   simulator ──UDP 9084──► SnapshotListener ──► reconcile worker
//!   simulator ──UDP 9086──► LosListener ──► roster
//!   LosListener ──UDP 9087──► simulator (LOS check requests)
//!   reconcile worker ──► StateBroadcaster ──UDP 7080/7082──► overlays
//! ```

use crossbeam_channel::{select, Sender, TrySendError};
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::NetworkError;
use crate::network::{bind_udp, is_timeout, StopSignal};
use crate::radio::{PlayerRadioSet, RadioChannel, RadioSwitchControls, MAX_RADIOS};
use crate::roster::{LosResult, PeerRoster};
use crate::settings::{ServerSettingKey, ServerSettings};
use crate::state::{ClientState, ReceivingState, SendingState};

/// Delay between attempts to bind a busy port
pub const BIND_RETRY: Duration = Duration::from_millis(500);

/// How often LOS checks are requested from the simulator
pub const LOS_REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Largest datagram accepted from the simulator
const MAX_DATAGRAM: usize = 65_507;

/// Unit id reported while in external mode
pub const EXTERNAL_UNIT_ID: u32 = 100_000_001;

pub const EXTERNAL_UNIT_NAME: &str = "External AWACS";

/// Cadence of synthetic snapshots in external mode
pub const EXTERNAL_INTERVAL: Duration = Duration::from_millis(200);

/// Bind `port`, retrying until it succeeds or stop is signalled
fn bind_with_retry(port: u16, stop: &StopSignal) -> Option<UdpSocket> {
    let mut warned = false;
    loop {
        match bind_udp(port) {
            Ok(socket) => return Some(socket),
            Err(e) => {
                if !warned {
                    tracing::warn!("Unable to bind UDP {}: {} (retrying)", port, e);
                    warned = true;
                }
                if stop.wait_timeout(BIND_RETRY) {
                    return None;
                }
            }
        }
    }
}

/// Receives radio snapshots from the simulator
pub struct SnapshotListener {
    port: u16,
    snapshots: Sender<PlayerRadioSet>,
}

impl SnapshotListener {
    pub fn new(port: u16, snapshots: Sender<PlayerRadioSet>) -> Self {
        Self { port, snapshots }
    }

    pub fn spawn(self, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("feed-snapshots".into())
            .spawn(move || self.run(stop))
    }

    fn run(self, stop: StopSignal) {
        let Some(socket) = bind_with_retry(self.port, &stop) else {
            return;
        };
        tracing::info!("Listening for radio snapshots on UDP {}", self.port);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !stop.is_stopped() {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    tracing::warn!("Snapshot receive error: {}", e);
                    continue;
                }
            };

            let snapshot = match serde_json::from_slice::<PlayerRadioSet>(&buf[..len]) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::debug!("Dropping malformed snapshot: {}", e);
                    continue;
                }
            };

            match self.snapshots.try_send(snapshot) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => tracing::debug!("Snapshot queue full, dropping"),
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        tracing::info!("Snapshot listener stopped");
    }
}

/// Exchanges line-of-sight checks with the simulator
pub struct LosListener {
    result_port: u16,
    request_addr: SocketAddr,
    own_id: String,
    roster: Arc<PeerRoster>,
    settings: Arc<ServerSettings>,
}

impl LosListener {
    pub fn new(
        result_port: u16,
        request_port: u16,
        own_id: String,
        roster: Arc<PeerRoster>,
        settings: Arc<ServerSettings>,
    ) -> Self {
        Self {
            result_port,
            request_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, request_port)),
            own_id,
            roster,
            settings,
        }
    }

    pub fn spawn(self, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("feed-los".into())
            .spawn(move || self.run(stop))
    }

    /// Apply one datagram of results. Returns how many peers were updated.
    pub fn apply_results(&self, data: &[u8]) -> usize {
        match serde_json::from_slice::<Vec<LosResult>>(data) {
            Ok(results) => {
                for result in &results {
                    self.roster.set_line_of_sight(&result.id, result.los);
                }
                results.len()
            }
            Err(e) => {
                tracing::debug!("Dropping malformed LOS result: {}", e);
                0
            }
        }
    }

    /// Serialized request for every positioned peer, or None when LOS is off
    /// or there is nobody to check
    pub fn build_request(&self) -> Option<Vec<u8>> {
        if !self.settings.get_bool(ServerSettingKey::LosEnabled) {
            return None;
        }
        let requests = self.roster.los_requests(&self.own_id);
        if requests.is_empty() {
            return None;
        }
        serde_json::to_vec(&requests).ok()
    }

    fn run(self, stop: StopSignal) {
        let Some(socket) = bind_with_retry(self.result_port, &stop) else {
            return;
        };
        tracing::info!("Listening for LOS results on UDP {}", self.result_port);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut last_request: Option<Instant> = None;
        while !stop.is_stopped() {
            let due = last_request
                .map(|t| t.elapsed() >= LOS_REQUEST_INTERVAL)
                .unwrap_or(true);
            if due {
                last_request = Some(Instant::now());
                if let Some(request) = self.build_request() {
                    if let Err(e) = socket.send_to(&request, self.request_addr) {
                        tracing::debug!("LOS request failed: {}", e);
                    }
                }
            }

            match socket.recv_from(&mut buf) {
                Ok((len, _)) => {
                    self.apply_results(&buf[..len]);
                }
                Err(e) if is_timeout(&e) => {}
                Err(e) => tracing::debug!("LOS receive error: {}", e),
            }
        }
        tracing::info!("LOS listener stopped");
    }
}

/// Combined radio state for local overlays
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CombinedState<'a> {
    pub radio_info: &'a PlayerRadioSet,
    pub radio_sending_state: SendingState,
    pub radio_receiving_state: Vec<Option<ReceivingState>>,
    pub client_count_connected: usize,
    pub client_count_ingame: usize,
}

/// Pushes the combined state to local consumers after every reconcile
pub struct StateBroadcaster {
    socket: UdpSocket,
    targets: Vec<SocketAddr>,
    state: Arc<ClientState>,
    roster: Arc<PeerRoster>,
}

impl StateBroadcaster {
    pub fn new(state: Arc<ClientState>, roster: Arc<PeerRoster>, ports: &[u16]) -> Result<Self, NetworkError> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        Ok(Self {
            socket,
            targets: ports
                .iter()
                .map(|port| SocketAddr::from((Ipv4Addr::LOCALHOST, *port)))
                .collect(),
            state,
            roster,
        })
    }

    /// Newline-terminated JSON for the current state
    pub fn render(&self, now: Instant) -> Option<String> {
        let radio = self.state.radio_set();
        let receiving = self
            .state
            .receiving_states()
            .into_iter()
            .map(|slot| slot.filter(|r| r.is_receiving(now)))
            .collect();

        let combined = CombinedState {
            radio_info: &radio,
            radio_sending_state: self.state.sending(),
            radio_receiving_state: receiving,
            client_count_connected: self.roster.len(),
            client_count_ingame: self.roster.in_game_count(now),
        };

        match serde_json::to_string(&combined) {
            Ok(mut json) => {
                json.push('\n');
                Some(json)
            }
            Err(e) => {
                tracing::warn!("Failed to serialize combined state: {}", e);
                None
            }
        }
    }

    pub fn broadcast(&self) {
        let Some(payload) = self.render(Instant::now()) else {
            return;
        };
        for target in &self.targets {
            if let Err(e) = self.socket.send_to(payload.as_bytes(), target) {
                tracing::debug!("State broadcast to {} failed: {}", target, e);
            }
        }
    }
}

/// Load the radio layout for external mode. Any failure yields a full set
/// of blank channels.
pub fn load_channel_file(path: Option<&Path>) -> Vec<RadioChannel> {
    let blank = || vec![RadioChannel::blank(); MAX_RADIOS];
    let Some(path) = path else {
        return blank();
    };

    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to read channel file {}: {}", path.display(), e);
            return blank();
        }
    };

    match serde_json::from_str::<Vec<RadioChannel>>(&text) {
        Ok(mut radios) => {
            radios.resize_with(MAX_RADIOS, RadioChannel::blank);
            radios
        }
        Err(e) => {
            tracing::warn!("Failed to parse channel file {}: {}", path.display(), e);
            blank()
        }
    }
}

/// Synthetic snapshot fed to the reconciler while in external mode
pub fn external_snapshot(name: &str, radios: &[RadioChannel]) -> PlayerRadioSet {
    PlayerRadioSet {
        name: name.to_string(),
        unit: EXTERNAL_UNIT_NAME.to_string(),
        unit_id: EXTERNAL_UNIT_ID,
        radios: radios.to_vec(),
        selected: 1,
        ptt: false,
        control: RadioSwitchControls::Hotas,
        ..PlayerRadioSet::new()
    }
}

/// Headless radio source used while external mode is active. Feeds the
/// reconcile worker exactly like the simulator would.
pub struct ExternalModeLoop {
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl ExternalModeLoop {
    pub fn start(
        state: Arc<ClientState>,
        snapshots: Sender<PlayerRadioSet>,
        radios: Vec<RadioChannel>,
        shutdown: StopSignal,
    ) -> std::io::Result<Self> {
        // next reconcile must go out immediately
        state.set_last_sent(None);

        let stop = StopSignal::new();
        let local = stop.clone();
        let handle = thread::Builder::new().name("external-mode".into()).spawn(move || {
            tracing::info!("External mode loop started");
            loop {
                select! {
                    recv(local.receiver()) -> _ => break,
                    recv(shutdown.receiver()) -> _ => break,
                    default(EXTERNAL_INTERVAL) => {}
                }

                let snapshot = external_snapshot(&state.identity().name, &radios);
                match snapshots.try_send(snapshot) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => tracing::debug!("Snapshot queue full, skipping external tick"),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            tracing::info!("External mode loop stopped");
        })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

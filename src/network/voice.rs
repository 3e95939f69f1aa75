//! Voice transport
//!
//! One TCP connection to the voice server, three threads:
//!
//! ```text
//!   voice-connection: connect ─► probe ─► read frames ─┐
//!                        ▲                             │ bounded(512)
//!                        └──── 2 s back-off ◄── fault  ▼
//!   voice-decode:     decode ─► SelectionEngine ─► AudioSink
//!   voice-keepalive:  keepalive frame every 60 s while idle
//! ```
//!
//! The connection thread only moves bytes; decoding and selection happen
//! on the decode thread so a slow sink never stalls the socket.

use bytes::Bytes;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::io::Read;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::codec::voice::{LENGTH_PREFIX, MAX_FRAME_LENGTH};
use crate::codec::{TransmitChannel, VoiceFrame};
use crate::error::NetworkError;
use crate::events::{ClientEvent, EventBus};
use crate::network::{connect_tcp, is_timeout, StopSignal};
use crate::propagation::SelectionEngine;
use crate::radio::PlayerRadioSet;
use crate::state::{ClientState, SendingState};

/// Raw frames buffered between the socket and the decode worker
pub const VOICE_QUEUE_CAPACITY: usize = 512;

/// Voice connection settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub server: SocketAddr,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub reconnect_delay: Duration,
}

impl VoiceConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Channels a transmission goes out on, in keying order. Identical
/// (frequency, modulation, key) triples are sent once.
pub fn transmit_channels(radio: &PlayerRadioSet, keyed: &[usize]) -> Vec<TransmitChannel> {
    let mut channels: Vec<TransmitChannel> = Vec::with_capacity(keyed.len());
    for &index in keyed {
        let Some(channel) = radio.radio(index) else {
            continue;
        };
        let triple = TransmitChannel::new(channel.freq, channel.modulation, channel.effective_key());
        if !channels.contains(&triple) {
            channels.push(triple);
        }
    }
    channels
}

/// Fill `buf` completely, riding out read timeouts. Returns false when
/// stopped part way.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8], stop: &StopSignal) -> Result<bool, NetworkError> {
    let mut filled = 0;
    while filled < buf.len() {
        if stop.is_stopped() {
            return Ok(false);
        }
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(NetworkError::Closed),
            Ok(n) => filled += n,
            Err(e) if is_timeout(&e) || e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }
    Ok(true)
}

/// Read one length-prefixed frame, prefix included.
///
/// Returns `Ok(None)` when stopped. A close in the middle of a frame is an
/// error, as is a length that cannot even cover its own prefix.
pub fn read_frame<R: Read>(reader: &mut R, stop: &StopSignal) -> Result<Option<Bytes>, NetworkError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    if !fill(reader, &mut prefix, stop)? {
        return Ok(None);
    }

    let declared = u16::from_le_bytes(prefix) as usize;
    if declared < LENGTH_PREFIX || declared > MAX_FRAME_LENGTH {
        return Err(NetworkError::ReceiveFailed(format!("invalid frame length {}", declared)));
    }

    let mut frame = vec![0u8; declared];
    frame[..LENGTH_PREFIX].copy_from_slice(&prefix);
    if !fill(reader, &mut frame[LENGTH_PREFIX..], stop)? {
        return Ok(None);
    }
    Ok(Some(Bytes::from(frame)))
}

struct Shared {
    config: VoiceConfig,
    state: Arc<ClientState>,
    events: EventBus,
    stop: StopSignal,
    writer: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    sequence: AtomicU64,
}

impl Shared {
    fn write_frame(&self, frame: &VoiceFrame) -> Result<(), NetworkError> {
        let bytes = frame.encode().map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let mut writer = self.writer.lock();
        let stream = writer.as_mut().ok_or(NetworkError::NotConnected)?;
        if let Err(e) = stream.write_all(&bytes) {
            // wakes the reader so the connection loop notices
            let _ = stream.shutdown(Shutdown::Both);
            *writer = None;
            self.connected.store(false, Ordering::SeqCst);
            return Err(NetworkError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    fn run_connection(&self, frames: Sender<Bytes>) {
        let mut ever_connected = false;

        while !self.stop.is_stopped() {
            tracing::info!("Connecting voice to {}", self.config.server);
            match connect_tcp(self.config.server, self.config.connect_timeout) {
                Ok(stream) => {
                    ever_connected = true;
                    match self.run_session(stream, &frames) {
                        Ok(()) => tracing::info!("Voice session ended"),
                        Err(e) => tracing::warn!("Voice connection lost: {}", e),
                    }
                    self.close();
                    self.events.emit(ClientEvent::VoiceDisconnected { connection_error: false });
                }
                Err(e) => {
                    tracing::error!("Voice connect to {} failed: {}", self.config.server, e);
                    if !ever_connected {
                        self.events.emit(ClientEvent::VoiceDisconnected { connection_error: true });
                        return;
                    }
                }
            }

            if self.stop.wait_timeout(self.config.reconnect_delay) {
                break;
            }
        }
    }

    fn run_session(&self, stream: TcpStream, frames: &Sender<Bytes>) -> Result<(), NetworkError> {
        let writer = stream
            .try_clone()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        *self.writer.lock() = Some(writer);
        self.sequence.store(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);

        self.write_frame(&VoiceFrame::probe(self.state.client_id()))?;
        tracing::info!("Voice connected to {}", self.config.server);
        self.events.emit(ClientEvent::VoiceConnected);

        let mut reader = stream;
        while let Some(frame) = read_frame(&mut reader, &self.stop)? {
            if !self.stop.send_blocking(frames, frame) {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(stream) = self.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.end_transmission();
    }

    fn end_transmission(&self) {
        let previous = self.state.sending();
        if previous.is_sending {
            self.state.set_sending(SendingState::default());
            self.events.emit(ClientEvent::TransmitEnded {
                radio: previous.sending_on,
            });
        }
    }
}

fn run_decoder(engine: Arc<SelectionEngine>, frames: Receiver<Bytes>, stop: StopSignal) {
    loop {
        select! {
            recv(frames) -> raw => {
                let Ok(raw) = raw else { break };
                match VoiceFrame::decode(&raw) {
                    Ok(frame) => {
                        engine.process(&frame, Instant::now());
                    }
                    Err(e) => tracing::debug!("Dropping undecodable voice frame: {}", e),
                }
            }
            recv(stop.receiver()) -> _ => break,
        }
    }
}

/// TCP voice client
pub struct VoiceTransport {
    shared: Arc<Shared>,
    engine: Arc<SelectionEngine>,
    handles: Vec<JoinHandle<()>>,
}

impl VoiceTransport {
    pub fn new(
        config: VoiceConfig,
        state: Arc<ClientState>,
        engine: Arc<SelectionEngine>,
        events: EventBus,
        stop: StopSignal,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state,
                events,
                stop,
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                sequence: AtomicU64::new(1),
            }),
            engine,
            handles: Vec::new(),
        }
    }

    /// Spawn the connection, decode and keepalive threads
    pub fn start(&mut self) -> std::io::Result<()> {
        let (tx, rx) = bounded(VOICE_QUEUE_CAPACITY);

        let shared = self.shared.clone();
        self.handles.push(
            thread::Builder::new()
                .name("voice-connection".into())
                .spawn(move || shared.run_connection(tx))?,
        );

        let engine = self.engine.clone();
        let stop = self.shared.stop.clone();
        self.handles.push(
            thread::Builder::new()
                .name("voice-decode".into())
                .spawn(move || run_decoder(engine, rx, stop))?,
        );

        let shared = self.shared.clone();
        self.handles.push(thread::Builder::new().name("voice-keepalive".into()).spawn(move || {
            while !shared.stop.wait_timeout(shared.config.keepalive_interval) {
                if shared.connected.load(Ordering::SeqCst) && !shared.state.sending().is_sending {
                    let frame = VoiceFrame::keepalive(shared.state.client_id());
                    if let Err(e) = shared.write_frame(&frame) {
                        tracing::debug!("Keepalive failed: {}", e);
                    }
                }
            }
        })?);

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Transmit one encoded audio frame on the selected radio (and any
    /// simultaneous radios). Returns true when a frame was sent.
    pub fn send_audio(&self, audio: Bytes) -> bool {
        let radio = self.shared.state.radio_set();
        let now = Instant::now();

        if !self.is_connected() || !self.shared.state.ptt_active() || !radio.is_current(now) || audio.is_empty() {
            self.shared.end_transmission();
            return false;
        }

        let keyed = radio.transmitting_radios(radio.selected);
        self.transmit(&radio, &keyed, audio, now)
    }

    /// Transmit on an explicit radio without PTT or staleness checks, for
    /// automated participants
    pub fn send_audio_on(&self, radio_id: usize, audio: Bytes) -> bool {
        let radio = self.shared.state.radio_set();
        if !self.is_connected() || audio.is_empty() {
            self.shared.end_transmission();
            return false;
        }

        let keyed: Vec<usize> = radio
            .radio(radio_id)
            .filter(|r| r.can_transmit())
            .map(|_| vec![radio_id])
            .unwrap_or_default();
        self.transmit(&radio, &keyed, audio, Instant::now())
    }

    /// Stop transmitting without sending anything
    pub fn end_transmission(&self) {
        self.shared.end_transmission();
    }

    fn transmit(&self, radio: &PlayerRadioSet, keyed: &[usize], audio: Bytes, now: Instant) -> bool {
        let channels = transmit_channels(radio, keyed);
        let Some(&primary) = keyed.first() else {
            self.shared.end_transmission();
            return false;
        };

        let frame = VoiceFrame {
            sender_id: self.shared.state.client_id().to_string(),
            unit_id: radio.unit_id,
            sequence: self.shared.sequence.fetch_add(1, Ordering::SeqCst),
            channels,
            audio,
        };

        if let Err(e) = self.shared.write_frame(&frame) {
            tracing::warn!("Voice send failed: {}", e);
            self.shared.end_transmission();
            return false;
        }

        let previous = self.shared.state.sending();
        if !previous.is_sending || previous.sending_on != primary {
            if previous.is_sending {
                self.shared.events.emit(ClientEvent::TransmitEnded {
                    radio: previous.sending_on,
                });
            }
            tracing::debug!("Transmitting on radio {}", primary);
            self.shared.events.emit(ClientEvent::TransmitStarted { radio: primary });
        }
        self.shared.state.set_sending(SendingState {
            is_sending: true,
            sending_on: primary,
            last_sent_at: Some(now),
        });
        true
    }

    /// Signal stop, drop the connection and wait for the threads
    pub fn stop(&mut self) {
        self.shared.stop.stop();
        self.shared.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for VoiceTransport {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ChannelSink;
    use crate::radio::{Modulation, PresetBank, RadioChannel, MAX_RADIOS};
    use crate::roster::PeerRoster;
    use crate::settings::ServerSettings;
    use crate::state::LocalIdentity;
    use std::io::Cursor;
    use std::net::TcpListener;

    const OWN_ID: &str = "AbCdEfGhIjKlMnOpQrStUv";
    const OTHER_ID: &str = "ZyXwVuTsRqPoNmLkJiHgFe";

    /// Hands out at most `chunk` bytes per read and times out every other call
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
        stall: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.stall = !self.stall;
            if self.stall {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            let len = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..len])
        }
    }

    fn frame(sender: &str, freq: f64) -> VoiceFrame {
        VoiceFrame {
            sender_id: sender.into(),
            unit_id: 7,
            sequence: 3,
            channels: vec![TransmitChannel::new(freq, Modulation::Am, 0)],
            audio: Bytes::from_static(b"opus-bytes"),
        }
    }

    fn tuned_radio() -> PlayerRadioSet {
        let mut radio = PlayerRadioSet::new();
        radio.unit_id = 5;
        radio.selected = 1;
        radio.radios[1] = RadioChannel {
            freq: 251e6,
            freq_min: 225e6,
            freq_max: 400e6,
            modulation: Modulation::Am,
            ..RadioChannel::blank()
        };
        radio.last_update = Some(Instant::now());
        radio
    }

    #[test]
    fn test_read_frame_reassembles_chunks() {
        let mut wire = frame(OTHER_ID, 251e6).encode().unwrap().to_vec();
        wire.extend_from_slice(&frame(OTHER_ID, 124e6).encode().unwrap());
        let mut reader = Trickle {
            inner: Cursor::new(wire),
            chunk: 3,
            stall: false,
        };
        let stop = StopSignal::new();

        let first = read_frame(&mut reader, &stop).unwrap().unwrap();
        assert_eq!(VoiceFrame::decode(&first).unwrap(), frame(OTHER_ID, 251e6));
        let second = read_frame(&mut reader, &stop).unwrap().unwrap();
        assert_eq!(VoiceFrame::decode(&second).unwrap().channels[0].frequency, 124e6);
        assert!(matches!(read_frame(&mut reader, &stop), Err(NetworkError::Closed)));
    }

    #[test]
    fn test_read_frame_partial_is_fault() {
        let wire = frame(OTHER_ID, 251e6).encode().unwrap();
        let mut reader = Cursor::new(wire[..wire.len() - 4].to_vec());
        assert!(matches!(
            read_frame(&mut reader, &StopSignal::new()),
            Err(NetworkError::Closed)
        ));
    }

    #[test]
    fn test_read_frame_stops() {
        let stop = StopSignal::new();
        stop.stop();
        let mut reader = Cursor::new(vec![1u8, 2, 3]);
        assert!(read_frame(&mut reader, &stop).unwrap().is_none());
    }

    #[test]
    fn test_transmit_channels_dedup() {
        let mut radio = tuned_radio();
        radio.simultaneous_transmission = true;
        radio.radios[1].simul = true;
        radio.radios[2] = radio.radios[1].clone();
        radio.radios[3] = RadioChannel {
            enc: true,
            enc_key: 3,
            ..radio.radios[1].clone()
        };

        let keyed = radio.transmitting_radios(1);
        assert_eq!(keyed, vec![1, 2, 3]);
        let channels = transmit_channels(&radio, &keyed);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].encryption, 0);
        assert_eq!(channels[1].encryption, 3);
    }

    fn transport(server: SocketAddr) -> (VoiceTransport, Arc<ClientState>, EventBus, Receiver<crate::audio::ClientAudio>) {
        let state = Arc::new(ClientState::new(
            OWN_ID.into(),
            LocalIdentity::default(),
            PresetBank::load_all(None, MAX_RADIOS - 1),
        ));
        let (sink, audio) = ChannelSink::new(16);
        let engine = Arc::new(SelectionEngine::new(
            state.clone(),
            Arc::new(PeerRoster::new()),
            Arc::new(ServerSettings::new()),
            Arc::new(sink),
        ));
        let events = EventBus::new();
        let mut config = VoiceConfig::new(server);
        config.connect_timeout = Duration::from_secs(2);
        config.reconnect_delay = Duration::from_millis(100);
        let transport = VoiceTransport::new(config, state.clone(), engine, events.clone(), StopSignal::new());
        (transport, state, events, audio)
    }

    #[test]
    fn test_first_connect_failure_is_terminal() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (mut transport, _state, events, _audio) = transport(SocketAddr::from(([127, 0, 0, 1], port)));
        transport.start().unwrap();

        let event = events.subscribe().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, ClientEvent::VoiceDisconnected { connection_error: true });
        transport.stop();
    }

    #[test]
    fn test_session_probe_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (mut transport, state, events, audio) = transport(listener.local_addr().unwrap());
        transport.start().unwrap();

        let (mut server, _) = listener.accept().unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let server_stop = StopSignal::new();

        let probe = read_frame(&mut server, &server_stop).unwrap().unwrap();
        let probe = VoiceFrame::decode(&probe).unwrap();
        assert_eq!(probe.sender_id, OWN_ID);
        assert_eq!(probe.channels[0].modulation, Modulation::HaveQuick);
        let events = events.subscribe();
        assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok(ClientEvent::VoiceConnected));

        // outbound: needs PTT and a current radio set
        assert!(!transport.send_audio(Bytes::from_static(b"voice")));
        state.replace_radio_set(tuned_radio());
        state.set_local_ptt(true);
        assert!(transport.send_audio(Bytes::from_static(b"voice")));
        assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok(ClientEvent::TransmitStarted { radio: 1 }));

        let sent = VoiceFrame::decode(&read_frame(&mut server, &server_stop).unwrap().unwrap()).unwrap();
        assert_eq!(sent.unit_id, 5);
        assert_eq!(sent.sequence, 1);
        assert_eq!(sent.channels, vec![TransmitChannel::new(251e6, Modulation::Am, 0)]);
        assert_eq!(&sent.audio[..], b"voice");

        state.set_local_ptt(false);
        assert!(!transport.send_audio(Bytes::from_static(b"voice")));
        assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok(ClientEvent::TransmitEnded { radio: 1 }));
        assert!(!state.sending().is_sending);

        // inbound: a frame on our frequency reaches the sink
        state.replace_radio_set(tuned_radio());
        server.write_all(&frame(OTHER_ID, 251e6).encode().unwrap()).unwrap();
        let played = audio.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(played.sender_id, OTHER_ID);
        assert_eq!(played.received_on, 1);

        transport.stop();
    }

    #[test]
    fn test_reconnects_after_server_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (mut transport, _state, events, _audio) = transport(listener.local_addr().unwrap());
        transport.start().unwrap();
        let events = events.subscribe();
        let server_stop = StopSignal::new();

        let (mut first, _) = listener.accept().unwrap();
        first.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let probe = VoiceFrame::decode(&read_frame(&mut first, &server_stop).unwrap().unwrap()).unwrap();
        assert_eq!(probe.sender_id, OWN_ID);
        assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok(ClientEvent::VoiceConnected));
        drop(first);

        assert_eq!(
            events.recv_timeout(Duration::from_secs(5)),
            Ok(ClientEvent::VoiceDisconnected { connection_error: false })
        );

        let (mut second, _) = listener.accept().unwrap();
        second.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let probe = VoiceFrame::decode(&read_frame(&mut second, &server_stop).unwrap().unwrap()).unwrap();
        assert_eq!(probe.sender_id, OWN_ID);
        assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok(ClientEvent::VoiceConnected));
        assert!(transport.is_connected());

        transport.stop();
    }
}

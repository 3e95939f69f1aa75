//! Audio delivery boundary
//!
//! Decoded voice never goes through this crate's own codec: the selection
//! engine hands opaque encoded audio to an [`AudioSink`], and the effects
//! tick tells the sink when a channel has gone quiet.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::events::{ClientEvent, EventBus};
use crate::network::StopSignal;
use crate::radio::{Modulation, MAX_RADIOS};
use crate::state::ClientState;

/// Interval between end-of-transmission checks
pub const EFFECTS_TICK: Duration = Duration::from_millis(50);

/// One received transmission, ready for playback
#[derive(Debug, Clone, PartialEq)]
pub struct ClientAudio {
    pub sender_id: String,
    pub unit_id: u32,
    pub sequence: u64,
    pub audio: Bytes,
    /// Local channel the audio was received on
    pub received_on: usize,
    pub frequency: f64,
    pub modulation: Modulation,
    pub encryption: u8,
    pub decryptable: bool,
    pub volume: f32,
    pub is_secondary: bool,
    /// 0 is clear, 1 or more is total loss
    pub line_of_sight_loss: f32,
    /// Distance as a fraction of the maximum range
    pub receiving_power_loss: f64,
    pub received_at: Instant,
}

/// Playback side of the client
pub trait AudioSink: Send + Sync {
    fn play(&self, audio: ClientAudio);

    /// A channel stopped receiving
    fn end_of_transmission(&self, _radio: usize) {}
}

/// Sink that forwards audio over a bounded channel, dropping when full
pub struct ChannelSink {
    tx: Sender<ClientAudio>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<ClientAudio>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl AudioSink for ChannelSink {
    fn play(&self, audio: ClientAudio) {
        if let Err(TrySendError::Full(audio)) = self.tx.try_send(audio) {
            tracing::debug!("Playback queue full, dropping frame {} from {}", audio.sequence, audio.sender_id);
        }
    }
}

/// Periodic end-of-transmission detection
pub struct AudioEffects {
    state: Arc<ClientState>,
    sink: Arc<dyn AudioSink>,
    events: EventBus,
}

impl AudioEffects {
    pub fn new(state: Arc<ClientState>, sink: Arc<dyn AudioSink>, events: EventBus) -> Self {
        Self { state, sink, events }
    }

    /// Mark every channel that went quiet since the last tick. Simultaneous
    /// receptions end silently. Returns the channels that played the effect.
    pub fn tick(&self, now: Instant) -> Vec<usize> {
        let mut ended = Vec::new();

        for radio in 0..MAX_RADIOS {
            let play = self
                .state
                .with_receiving(radio, |slot| match slot {
                    Some(rx) if !rx.is_receiving(now) && !rx.played_end_of_transmission => {
                        rx.played_end_of_transmission = true;
                        !rx.is_simultaneous
                    }
                    _ => false,
                })
                .unwrap_or(false);

            if play {
                self.sink.end_of_transmission(radio);
                self.events.emit(ClientEvent::ReceiveEnded { radio });
                ended.push(radio);
            }
        }

        ended
    }

    /// Run the tick on its own thread until stopped
    pub fn spawn(self, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("audio-effects".into())
            .spawn(move || {
                while !stop.wait_timeout(EFFECTS_TICK) {
                    self.tick(Instant::now());
                }
                tracing::debug!("Audio effects stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::PresetBank;
    use crate::state::{LocalIdentity, ReceivingState};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        ended: Mutex<Vec<usize>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&self, _audio: ClientAudio) {}

        fn end_of_transmission(&self, radio: usize) {
            self.ended.lock().push(radio);
        }
    }

    fn setup() -> (Arc<ClientState>, Arc<RecordingSink>, AudioEffects, EventBus) {
        let state = Arc::new(ClientState::new(
            "AbCdEfGhIjKlMnOpQrStUv".into(),
            LocalIdentity::default(),
            PresetBank::load_all(None, MAX_RADIOS - 1),
        ));
        let sink = Arc::new(RecordingSink::default());
        let events = EventBus::new();
        let effects = AudioEffects::new(state.clone(), sink.clone(), events.clone());
        (state, sink, effects, events)
    }

    #[test]
    fn test_effect_plays_once_after_quiet() {
        let (state, sink, effects, events) = setup();
        let rx = events.subscribe();
        let t0 = Instant::now();
        state.set_receiving(1, ReceivingState::new(1, false, false, t0));

        assert!(effects.tick(t0 + Duration::from_millis(100)).is_empty());
        assert_eq!(effects.tick(t0 + Duration::from_millis(300)), vec![1]);
        assert!(effects.tick(t0 + Duration::from_millis(400)).is_empty());

        assert_eq!(*sink.ended.lock(), vec![1]);
        assert_eq!(rx.try_recv(), Ok(ClientEvent::ReceiveEnded { radio: 1 }));
        assert!(state.receiving(1).unwrap().played_end_of_transmission);
    }

    #[test]
    fn test_simultaneous_ends_silently() {
        let (state, sink, effects, _events) = setup();
        let t0 = Instant::now();
        state.set_receiving(2, ReceivingState::new(2, false, true, t0));

        assert!(effects.tick(t0 + Duration::from_secs(1)).is_empty());
        assert!(sink.ended.lock().is_empty());
        assert!(state.receiving(2).unwrap().played_end_of_transmission);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::new(1);
        let audio = ClientAudio {
            sender_id: "AbCdEfGhIjKlMnOpQrStUv".into(),
            unit_id: 1,
            sequence: 1,
            audio: Bytes::from_static(b"x"),
            received_on: 1,
            frequency: 251e6,
            modulation: Modulation::Am,
            encryption: 0,
            decryptable: true,
            volume: 1.0,
            is_secondary: false,
            line_of_sight_loss: 0.0,
            receiving_power_loss: 0.0,
            received_at: Instant::now(),
        };
        sink.play(audio.clone());
        sink.play(audio);
        assert_eq!(rx.len(), 1);
    }
}

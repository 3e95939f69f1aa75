//! Inbound voice selection
//!
//! For each transmit triple of a frame: find the local channel that hears
//! it, apply the physical gates, score the survivors and hand the best one
//! to the audio sink. Every survivor updates its channel's receive state.

use std::sync::Arc;
use std::time::Instant;

use crate::audio::{AudioSink, ClientAudio};
use crate::codec::{TransmitChannel, VoiceFrame};
use crate::propagation::range::{self, SenderFix};
use crate::radio::channel::MIN_RECEIVE_FREQ_HZ;
use crate::radio::{freq_close_enough, Modulation, PlayerRadioSet, RadioChannel};
use crate::roster::PeerRoster;
use crate::settings::{ServerSettingKey, ServerSettings};
use crate::state::{ClientState, ReceivingState};

pub const SCORE_DECRYPTABLE: u8 = 16;
pub const SCORE_SELECTED: u8 = 8;
pub const SCORE_AUDIBLE: u8 = 4;

/// Channels that cannot receive because they are keyed.
///
/// Only applies with half-duplex radios enabled and PTT held. Intercom is
/// never blocked.
pub fn blocked_channels(radio: &PlayerRadioSet, half_duplex: bool, ptt_active: bool) -> Vec<usize> {
    let mut blocked = Vec::new();
    if !half_duplex || !ptt_active {
        return blocked;
    }

    if let Some(selected) = radio.selected_radio() {
        if !selected.is_intercom() {
            blocked.push(radio.selected);
        }
    }

    if radio.simultaneous_transmission {
        for (i, channel) in radio.radios.iter().enumerate() {
            if i != radio.selected && channel.simul && !channel.is_disabled() && !channel.is_intercom() {
                blocked.push(i);
            }
        }
    }

    blocked
}

/// A local channel able to hear one triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub received_on: usize,
    pub is_secondary: bool,
    pub decryptable: bool,
}

fn decryptable(channel: &RadioChannel, key: u8) -> bool {
    key == 0 || (channel.enc && channel.enc_key == key)
}

/// Find the local channel that hears `triple`.
///
/// Intercom only links radios in the same unit. A decryptable primary
/// match returns at once; otherwise the last match seen wins.
pub fn resolve(
    radio: &PlayerRadioSet,
    blocked: &[usize],
    triple: &TransmitChannel,
    sender_unit_id: u32,
) -> Option<Resolved> {
    if triple.modulation == Modulation::Disabled {
        return None;
    }

    if triple.modulation == Modulation::Intercom {
        let same_unit = radio.unit_id > 0 && sender_unit_id == radio.unit_id;
        if !same_unit {
            return None;
        }
        return radio
            .radios
            .iter()
            .position(|c| c.is_intercom())
            .map(|i| Resolved {
                received_on: i,
                is_secondary: false,
                decryptable: decryptable(&radio.radios[i], triple.encryption),
            });
    }

    let mut best = None;

    for (i, channel) in radio.radios.iter().enumerate() {
        if channel.is_disabled() || blocked.contains(&i) {
            continue;
        }

        let can_decrypt = decryptable(channel, triple.encryption);

        if channel.modulation == triple.modulation
            && channel.freq > MIN_RECEIVE_FREQ_HZ
            && freq_close_enough(channel.freq, triple.frequency)
        {
            let hit = Resolved {
                received_on: i,
                is_secondary: false,
                decryptable: can_decrypt,
            };
            if can_decrypt {
                return Some(hit);
            }
            best = Some(hit);
        } else if channel.sec_freq > MIN_RECEIVE_FREQ_HZ
            && freq_close_enough(channel.sec_freq, triple.frequency)
        {
            best = Some(Resolved {
                received_on: i,
                is_secondary: true,
                decryptable: can_decrypt,
            });
        }
    }

    best
}

/// A triple that survived resolution and the physical gates
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub received_on: usize,
    pub triple: TransmitChannel,
    pub decryptable: bool,
    pub is_secondary: bool,
    pub volume: f32,
    pub line_of_sight_loss: f32,
    pub receiving_power_loss: f64,
    pub score: u8,
}

pub fn score(decryptable: bool, is_selected: bool, volume: f32) -> u8 {
    let mut score = 0;
    if decryptable {
        score += SCORE_DECRYPTABLE;
    }
    if is_selected {
        score += SCORE_SELECTED;
    }
    if volume > 0.0 {
        score += SCORE_AUDIBLE;
    }
    score
}

/// Everything ranking needs besides the frame
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub radio: &'a PlayerRadioSet,
    pub blocked: &'a [usize],
    pub los_enabled: bool,
    pub distance_enabled: bool,
    pub sender: Option<&'a SenderFix>,
}

/// Qualifying candidates, best first. Equal scores keep triple order.
pub fn rank(frame: &VoiceFrame, ctx: &SelectionContext<'_>) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(frame.channels.len());

    for triple in &frame.channels {
        let Some(hit) = resolve(ctx.radio, ctx.blocked, triple, frame.unit_id) else {
            continue;
        };
        let channel = &ctx.radio.radios[hit.received_on];

        let (line_of_sight_loss, receiving_power_loss) = if channel.is_intercom() {
            (0.0, 0.0)
        } else {
            let Some(los) = range::line_of_sight(ctx.los_enabled, &ctx.radio.pos, ctx.sender) else {
                continue;
            };
            let Some(power) =
                range::in_range(ctx.distance_enabled, &ctx.radio.pos, ctx.sender, triple.frequency)
            else {
                continue;
            };
            (los, power)
        };

        candidates.push(Candidate {
            received_on: hit.received_on,
            triple: *triple,
            decryptable: hit.decryptable,
            is_secondary: hit.is_secondary,
            volume: channel.volume,
            line_of_sight_loss,
            receiving_power_loss,
            score: score(hit.decryptable, hit.received_on == ctx.radio.selected, channel.volume),
        });
    }

    // stable: ties keep discovery order
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates
}

/// Runs selection against live client state for each decoded frame
pub struct SelectionEngine {
    state: Arc<ClientState>,
    roster: Arc<PeerRoster>,
    settings: Arc<ServerSettings>,
    sink: Arc<dyn AudioSink>,
}

impl SelectionEngine {
    pub fn new(
        state: Arc<ClientState>,
        roster: Arc<PeerRoster>,
        settings: Arc<ServerSettings>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            state,
            roster,
            settings,
            sink,
        }
    }

    /// Select and deliver one frame. Returns the channel whose audio played.
    pub fn process(&self, frame: &VoiceFrame, now: Instant) -> Option<usize> {
        let radio = self.state.radio_set();
        if !radio.is_current(now) {
            return None;
        }

        let blocked = blocked_channels(
            &radio,
            self.settings.get_bool(ServerSettingKey::IrlRadioTx),
            self.state.ptt_active(),
        );
        let sender = self
            .roster
            .position_and_los(&frame.sender_id)
            .map(|(position, line_of_sight_loss)| SenderFix {
                position,
                line_of_sight_loss,
            });

        let ctx = SelectionContext {
            radio: &radio,
            blocked: &blocked,
            los_enabled: self.settings.get_bool(ServerSettingKey::LosEnabled),
            distance_enabled: self.settings.get_bool(ServerSettingKey::DistanceEnabled),
            sender: sender.as_ref(),
        };

        let ranked = rank(frame, &ctx);
        let simultaneous = ranked.len() > 1;

        for (i, candidate) in ranked.iter().enumerate() {
            self.state.set_receiving(
                candidate.received_on,
                ReceivingState::new(candidate.received_on, candidate.is_secondary, simultaneous && i > 0, now),
            );
        }

        let winner = ranked.into_iter().next()?;
        let received_on = winner.received_on;
        self.sink.play(ClientAudio {
            sender_id: frame.sender_id.clone(),
            unit_id: frame.unit_id,
            sequence: frame.sequence,
            audio: frame.audio.clone(),
            received_on,
            frequency: winner.triple.frequency,
            modulation: winner.triple.modulation,
            encryption: winner.triple.encryption,
            decryptable: winner.decryptable,
            volume: winner.volume,
            is_secondary: winner.is_secondary,
            line_of_sight_loss: winner.line_of_sight_loss,
            receiving_power_loss: winner.receiving_power_loss,
            received_at: now,
        });
        Some(received_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{Position, PresetBank, MAX_RADIOS};
    use crate::roster::PeerRecord;
    use crate::state::LocalIdentity;
    use bytes::Bytes;
    use parking_lot::Mutex;

    const SENDER: &str = "AbCdEfGhIjKlMnOpQrStUv";

    fn channel(freq: f64, modulation: Modulation) -> RadioChannel {
        RadioChannel {
            name: "radio".into(),
            freq,
            freq_min: 1e6,
            freq_max: 500e6,
            modulation,
            ..RadioChannel::blank()
        }
    }

    fn radio_set() -> PlayerRadioSet {
        let mut set = PlayerRadioSet::new();
        set.unit_id = 42;
        set.pos = Position::new(1.0, 1000.0, 1.0);
        set.radios[0] = channel(100.0, Modulation::Intercom);
        set.radios[1] = channel(251e6, Modulation::Am);
        set.radios[2] = channel(251e6, Modulation::Am);
        set.radios[3] = channel(30e6, Modulation::Fm);
        set.selected = 1;
        set
    }

    fn frame(channels: Vec<TransmitChannel>, unit_id: u32) -> VoiceFrame {
        VoiceFrame {
            sender_id: SENDER.into(),
            unit_id,
            sequence: 1,
            channels,
            audio: Bytes::from_static(b"voice"),
        }
    }

    fn ctx<'a>(radio: &'a PlayerRadioSet, blocked: &'a [usize], sender: Option<&'a SenderFix>) -> SelectionContext<'a> {
        SelectionContext {
            radio,
            blocked,
            los_enabled: true,
            distance_enabled: true,
            sender,
        }
    }

    #[test]
    fn test_scoring_prefers_decryptable_over_selected() {
        // A: decryptable, not selected, volume 0 => 16
        // B: not decryptable, selected, volume > 0 => 12
        let mut radio = radio_set();
        radio.radios[1].freq = 124e6;
        radio.radios[1].volume = 1.0;
        radio.radios[2].volume = 0.0;
        radio.radios[2].enc = true;
        radio.radios[2].enc_key = 5;

        let f = frame(
            vec![
                TransmitChannel::new(124e6, Modulation::Am, 9),
                TransmitChannel::new(251e6, Modulation::Am, 5),
            ],
            7,
        );
        let fix = SenderFix {
            position: Position::new(10.0, 1000.0, 10.0),
            line_of_sight_loss: 0.0,
        };
        let ranked = rank(&f, &ctx(&radio, &[], Some(&fix)));

        assert_eq!(ranked.len(), 2);
        assert_eq!((ranked[0].received_on, ranked[0].score), (2, 16));
        assert_eq!((ranked[1].received_on, ranked[1].score), (1, 12));
    }

    #[test]
    fn test_total_los_loss_blocks_except_intercom() {
        let radio = radio_set();
        let fix = SenderFix {
            position: Position::new(10.0, 1000.0, 10.0),
            line_of_sight_loss: 1.0,
        };

        let f = frame(vec![TransmitChannel::new(251e6, Modulation::Am, 0)], 7);
        assert!(rank(&f, &ctx(&radio, &[], Some(&fix))).is_empty());

        let f = frame(vec![TransmitChannel::new(100.0, Modulation::Intercom, 0)], 42);
        let ranked = rank(&f, &ctx(&radio, &[], Some(&fix)));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].received_on, 0);
    }

    #[test]
    fn test_intercom_requires_same_unit() {
        let radio = radio_set();
        let triple = TransmitChannel::new(100.0, Modulation::Intercom, 0);
        assert!(resolve(&radio, &[], &triple, 43).is_none());
        assert_eq!(resolve(&radio, &[], &triple, 42).map(|r| r.received_on), Some(0));

        let mut no_unit = radio_set();
        no_unit.unit_id = 0;
        assert!(resolve(&no_unit, &[], &triple, 0).is_none());
    }

    #[test]
    fn test_resolve_tolerance_and_modulation() {
        let radio = radio_set();
        let near = TransmitChannel::new(251e6 + 400.0, Modulation::Am, 0);
        let off = TransmitChannel::new(251e6 + 600.0, Modulation::Am, 0);
        let wrong_mod = TransmitChannel::new(251e6, Modulation::Fm, 0);
        assert_eq!(resolve(&radio, &[], &near, 7).map(|r| r.received_on), Some(1));
        assert!(resolve(&radio, &[], &off, 7).is_none());
        assert!(resolve(&radio, &[], &wrong_mod, 7).is_none());
    }

    #[test]
    fn test_resolve_prefers_decryptable_match() {
        let mut radio = radio_set();
        radio.radios[2].enc = true;
        radio.radios[2].enc_key = 3;
        let triple = TransmitChannel::new(251e6, Modulation::Am, 3);

        let hit = resolve(&radio, &[], &triple, 7).unwrap();
        assert_eq!(hit.received_on, 2);
        assert!(hit.decryptable);
    }

    #[test]
    fn test_resolve_guard_frequency() {
        let mut radio = radio_set();
        radio.radios[1].sec_freq = 243e6;
        let hit = resolve(&radio, &[], &TransmitChannel::new(243e6, Modulation::Am, 0), 7).unwrap();
        assert_eq!(hit.received_on, 1);
        assert!(hit.is_secondary);
    }

    #[test]
    fn test_blocked_channels() {
        let mut radio = radio_set();
        radio.radios[3].simul = true;
        radio.radios[0].simul = true;

        assert!(blocked_channels(&radio, false, true).is_empty());
        assert!(blocked_channels(&radio, true, false).is_empty());
        assert_eq!(blocked_channels(&radio, true, true), vec![1]);

        radio.simultaneous_transmission = true;
        assert_eq!(blocked_channels(&radio, true, true), vec![1, 3]);

        radio.selected = 0;
        assert_eq!(blocked_channels(&radio, true, true), vec![3]);
    }

    #[test]
    fn test_blocked_channel_not_resolved() {
        let radio = radio_set();
        let triple = TransmitChannel::new(251e6, Modulation::Am, 0);
        assert_eq!(resolve(&radio, &[1], &triple, 7).map(|r| r.received_on), Some(2));
        assert!(resolve(&radio, &[1, 2], &triple, 7).is_none());
    }

    #[test]
    fn test_unknown_sender_fails_gates() {
        let radio = radio_set();
        let f = frame(vec![TransmitChannel::new(251e6, Modulation::Am, 0)], 7);
        assert!(rank(&f, &ctx(&radio, &[], None)).is_empty());
    }

    #[test]
    fn test_rank_is_deterministic() {
        let radio = radio_set();
        let fix = SenderFix {
            position: Position::new(10.0, 1000.0, 10.0),
            line_of_sight_loss: 0.1,
        };
        let f = frame(
            vec![
                TransmitChannel::new(30e6, Modulation::Fm, 0),
                TransmitChannel::new(251e6, Modulation::Am, 0),
            ],
            7,
        );
        let first = rank(&f, &ctx(&radio, &[], Some(&fix)));
        for _ in 0..10 {
            assert_eq!(rank(&f, &ctx(&radio, &[], Some(&fix))), first);
        }
        assert_eq!(first[0].received_on, 1);
    }

    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<ClientAudio>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&self, audio: ClientAudio) {
            self.played.lock().push(audio);
        }
    }

    fn engine() -> (SelectionEngine, Arc<ClientState>, Arc<RecordingSink>) {
        let state = Arc::new(ClientState::new(
            "ZyXwVuTsRqPoNmLkJiHgFe".into(),
            LocalIdentity::default(),
            PresetBank::load_all(None, MAX_RADIOS - 1),
        ));
        let roster = Arc::new(PeerRoster::new());
        let now = Instant::now();
        roster.upsert(
            PeerRecord {
                position: Position::new(10.0, 1000.0, 10.0),
                ..PeerRecord::new(SENDER)
            },
            false,
            now,
        );
        let sink = Arc::new(RecordingSink::default());
        let engine = SelectionEngine::new(state.clone(), roster, Arc::new(ServerSettings::new()), sink.clone());
        (engine, state, sink)
    }

    #[test]
    fn test_engine_plays_top_and_marks_simultaneous() {
        let (engine, state, sink) = engine();
        let now = Instant::now();
        let mut radio = radio_set();
        radio.last_update = Some(now);
        state.replace_radio_set(radio);

        let f = frame(
            vec![
                TransmitChannel::new(30e6, Modulation::Fm, 0),
                TransmitChannel::new(251e6, Modulation::Am, 0),
            ],
            7,
        );
        assert_eq!(engine.process(&f, now), Some(1));

        let played = sink.played.lock();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].received_on, 1);
        assert!(played[0].decryptable);

        assert!(!state.receiving(1).unwrap().is_simultaneous);
        assert!(state.receiving(3).unwrap().is_simultaneous);
    }

    #[test]
    fn test_engine_ignores_frames_when_stale() {
        let (engine, state, sink) = engine();
        state.replace_radio_set(radio_set());
        let f = frame(vec![TransmitChannel::new(251e6, Modulation::Am, 0)], 7);
        assert_eq!(engine.process(&f, Instant::now()), None);
        assert!(sink.played.lock().is_empty());
    }
}

//! Radio state reconciliation
//!
//! Merges each simulator snapshot into the locally held radio set. The
//! simulator owns some fields, the client overlay owns others, and a change
//! of aircraft resets most of what the client owned.

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::network::feed::StateBroadcaster;
use crate::network::StopSignal;
use crate::radio::{
    freq_close_enough, EncryptionMode, FreqMode, IffStatus, PlayerRadioSet, RadioChannel, RadioSwitchControls,
    SimultaneousTransmissionControl, VolumeMode, MAX_RADIOS, UNIT_ID_OFFSET,
};
use crate::settings::{ServerSettingKey, ServerSettings};
use crate::state::{ClientState, SendingState};

/// IDENT reverts to NORMAL after this long
pub const IDENT_TIMEOUT: Duration = Duration::from_secs(40);

/// Re-send the radio set at least this often
pub const RESEND_AFTER: Duration = Duration::from_secs(5);

/// Follow-up work on a radio's preset bank
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresetAction {
    Reload { radio: usize, min: f64, max: f64 },
    Clear { radio: usize },
}

/// Client-side policy toggles
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReconcilePolicy {
    pub always_allow_hotas_controls: bool,
    pub allow_simulator_ptt: bool,
    pub auto_select_preset_channel: bool,
}

/// Inputs besides the two radio sets
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    pub expansion_allowed: bool,
    pub encryption_allowed: bool,
    pub external_mode_active: bool,
    pub policy: ReconcilePolicy,
    pub sending: SendingState,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub radio_set: PlayerRadioSet,
    pub changed: bool,
    pub iff_changed: bool,
    pub preset_actions: Vec<PresetAction>,
}

/// Whether the merged set should go out to the session
pub fn needs_send(changed: bool, iff_changed: bool, last_sent: Option<Instant>, now: Instant) -> bool {
    changed
        || iff_changed
        || last_sent
            .map(|t| now.saturating_duration_since(t) >= RESEND_AFTER)
            .unwrap_or(true)
}

/// Snapshot merger. Holds only the IDENT timer between calls.
#[derive(Debug, Default)]
pub struct Reconciler {
    ident_start: Option<Instant>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(
        &mut self,
        previous: &PlayerRadioSet,
        incoming: &PlayerRadioSet,
        ctx: &ReconcileContext,
        now: Instant,
    ) -> Reconciliation {
        let mut next = previous.clone();
        next.radios.resize_with(MAX_RADIOS, RadioChannel::blank);
        let mut changed = false;
        let mut preset_actions = Vec::new();

        next.name = incoming.name.clone();
        next.unit = incoming.unit.clone();
        next.pos = incoming.pos;
        next.lat_lng = incoming.lat_lng;
        next.in_aircraft = incoming.in_aircraft;
        next.simultaneous_transmission_control = incoming.simultaneous_transmission_control;
        next.control = if ctx.policy.always_allow_hotas_controls {
            RadioSwitchControls::Hotas
        } else {
            incoming.control
        };

        let new_aircraft = previous.unit_id != incoming.unit_id || !previous.is_current(now);

        // spectators keep their previous unit id
        if !(previous.is_spectator() && incoming.is_spectator()) {
            next.unit_id = incoming.unit_id;
        }
        // only a change between two real aircraft overrides local tuning
        let override_all =
            previous.unit_id != incoming.unit_id && !previous.is_spectator() && !incoming.is_spectator();

        if new_aircraft {
            next.iff = incoming.iff.clone();
        }

        if override_all || next.control == RadioSwitchControls::InCockpit {
            next.selected = incoming.selected;
        }
        if override_all {
            changed = true;
        }

        let mut any_simul = false;
        let simulator_simul = next.simultaneous_transmission_control == SimultaneousTransmissionControl::Simulator;

        for i in 0..MAX_RADIOS {
            let spectator_hidden = !ctx.external_mode_active && (i == 0 || i > 3) && next.unit_id >= UNIT_ID_OFFSET;
            let update = match incoming.radios.get(i) {
                Some(update) if !spectator_hidden => update,
                _ => {
                    next.radios[i].normalize_blank();
                    continue;
                }
            };

            if (update.expansion && !ctx.expansion_allowed) || update.is_disabled() {
                next.radios[i].normalize_blank();
                continue;
            }

            if update.simul {
                any_simul = true;
            }

            let (before_freq, before_sec_freq) = previous
                .radios
                .get(i)
                .map(|c| (c.freq, c.sec_freq))
                .unwrap_or((1.0, 0.0));
            let channel = &mut next.radios[i];

            channel.freq_min = update.freq_min;
            channel.freq_max = update.freq_max;
            channel.name = update.name.clone();
            channel.modulation = update.modulation;
            channel.freq_mode = update.freq_mode;
            channel.guard_freq_mode = update.guard_freq_mode;
            channel.vol_mode = update.vol_mode;
            channel.expansion = update.expansion;
            channel.enc_mode = if ctx.encryption_allowed {
                update.enc_mode
            } else {
                EncryptionMode::NoEncryption
            };
            if simulator_simul {
                channel.simul = update.simul;
            }

            if update.freq_mode == FreqMode::Cockpit || override_all {
                channel.freq = update.freq;
                channel.sec_freq = if update.guard_freq_mode == FreqMode::Overlay {
                    if new_aircraft || channel.sec_freq == 0.0 {
                        0.0
                    } else {
                        update.sec_freq
                    }
                } else {
                    update.sec_freq
                };
                channel.channel = update.channel;

                if !freq_close_enough(before_freq, channel.freq) || !freq_close_enough(before_sec_freq, channel.sec_freq) {
                    changed = true;
                }
            } else {
                if channel.sec_freq != 0.0 {
                    channel.sec_freq = update.sec_freq;
                }
                channel.clamp_freq();
            }

            if override_all {
                channel.enc = false;
                channel.enc_key = 0;
            }

            match channel.enc_mode {
                EncryptionMode::NoEncryption => {
                    channel.enc = false;
                    channel.enc_key = 0;
                }
                EncryptionMode::JustOverlay => {
                    if channel.enc_key == 0 {
                        channel.enc_key = 1;
                    }
                }
                EncryptionMode::CockpitToggleOverlayCode => {
                    channel.enc = update.enc;
                    if channel.enc_key == 0 {
                        channel.enc_key = 1;
                    }
                }
                EncryptionMode::Full => {
                    channel.enc = update.enc;
                    channel.enc_key = update.enc_key;
                }
            }

            if update.vol_mode == VolumeMode::Cockpit || override_all {
                channel.volume = update.volume;
            }

            if new_aircraft && i > 0 {
                if channel.freq_mode == FreqMode::Overlay {
                    preset_actions.push(PresetAction::Reload {
                        radio: i,
                        min: channel.freq_min,
                        max: channel.freq_max,
                    });
                    channel.channel = -1;
                } else {
                    preset_actions.push(PresetAction::Clear { radio: i });
                }
            }
        }

        if simulator_simul {
            next.simultaneous_transmission = any_simul;
        }

        next.ptt = ctx.policy.allow_simulator_ptt && incoming.ptt;

        self.update_ident(&mut next, &ctx.sending, now);

        next.last_update = Some(now);

        let iff_changed = next.iff != previous.iff;
        Reconciliation {
            radio_set: next,
            changed,
            iff_changed,
            preset_actions,
        }
    }

    fn update_ident(&mut self, next: &mut PlayerRadioSet, sending: &SendingState, now: Instant) {
        let ptt = next.ptt;
        let Some(iff) = next.iff.as_mut() else {
            self.ident_start = None;
            return;
        };

        if !ptt && iff.mic > 0 && sending.is_sending && sending.sending_on as i32 == iff.mic {
            iff.status = IffStatus::Ident;
        }

        if iff.status == IffStatus::Ident {
            let started = *self.ident_start.get_or_insert(now);
            if now.saturating_duration_since(started) > IDENT_TIMEOUT {
                iff.status = IffStatus::Normal;
            }
        } else {
            self.ident_start = None;
        }
    }
}

/// Outbound queue depth toward the sync client
pub const OUTBOUND_CAPACITY: usize = 16;

/// Worker that reconciles every snapshot the feed delivers
pub struct RadioSyncWorker {
    reconciler: Reconciler,
    state: Arc<ClientState>,
    settings: Arc<ServerSettings>,
    policy: ReconcilePolicy,
    outbound: Sender<Arc<PlayerRadioSet>>,
    broadcaster: Option<StateBroadcaster>,
}

impl RadioSyncWorker {
    pub fn new(
        state: Arc<ClientState>,
        settings: Arc<ServerSettings>,
        policy: ReconcilePolicy,
        outbound: Sender<Arc<PlayerRadioSet>>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(),
            state,
            settings,
            policy,
            outbound,
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: StateBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Merge one snapshot. Returns true when an update was queued.
    pub fn process(&mut self, snapshot: &PlayerRadioSet, now: Instant) -> bool {
        let previous = self.state.radio_set();
        let ctx = ReconcileContext {
            expansion_allowed: self.settings.get_bool(ServerSettingKey::RadioExpansion),
            encryption_allowed: self.settings.get_bool(ServerSettingKey::AllowRadioEncryption),
            external_mode_active: self.state.external_mode_active(),
            policy: self.policy,
            sending: self.state.sending(),
        };

        let result = self.reconciler.reconcile(&previous, snapshot, &ctx, now);
        if result.radio_set.unit_id != previous.unit_id {
            tracing::info!("New unit {} ({})", result.radio_set.unit, result.radio_set.unit_id);
        }
        self.state.replace_radio_set(result.radio_set);

        for action in &result.preset_actions {
            self.apply_preset_action(*action);
        }

        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast();
        }

        if !needs_send(result.changed, result.iff_changed, self.state.last_sent(), now) {
            return false;
        }

        match self.outbound.try_send(self.state.radio_set()) {
            Ok(()) => {
                tracing::debug!("Queued radio update (changed: {})", result.changed);
                self.state.set_last_sent(Some(now));
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Outbound queue full, skipping radio update");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn apply_preset_action(&self, action: PresetAction) {
        match action {
            PresetAction::Reload { radio, min, max } => {
                let auto_select = self.policy.auto_select_preset_channel;
                let selected = self
                    .state
                    .with_preset_bank(radio, |bank| {
                        bank.reload(min, max);
                        if auto_select {
                            bank.channel_up().map(|(index, preset)| (index, preset.frequency))
                        } else {
                            None
                        }
                    })
                    .flatten();

                if let Some((index, frequency)) = selected {
                    self.state.update_radio_set(|r| {
                        if let Some(channel) = r.radios.get_mut(radio) {
                            channel.freq = frequency;
                            channel.channel = index as i32;
                        }
                    });
                }
            }
            PresetAction::Clear { radio } => {
                self.state.with_preset_bank(radio, |bank| bank.clear());
            }
        }
    }

    pub fn spawn(mut self, snapshots: Receiver<PlayerRadioSet>, stop: StopSignal) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("radio-reconcile".into())
            .spawn(move || {
                tracing::info!("Radio reconcile worker started");
                loop {
                    select! {
                        recv(snapshots) -> snapshot => match snapshot {
                            Ok(snapshot) => {
                                self.process(&snapshot, Instant::now());
                            }
                            Err(_) => break,
                        },
                        recv(stop.receiver()) -> _ => break,
                    }
                }
                tracing::info!("Radio reconcile worker stopped");
            })
    }
}

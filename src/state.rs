//! Shared client state
//!
//! One `ClientState` is created at startup and handed to every worker as an
//! `Arc`. The radio set is swapped whole so readers always see a consistent
//! snapshot; send and receive indicators lock independently.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::radio::{PlayerRadioSet, PresetBank, MAX_RADIOS};

/// A channel counts as receiving for this long after its last frame
pub const RECEIVE_WINDOW: Duration = Duration::from_millis(200);

/// Reception indicator for one local channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivingState {
    #[serde(skip)]
    pub last_received_at: Instant,
    pub is_secondary: bool,
    pub is_simultaneous: bool,
    pub played_end_of_transmission: bool,
    pub received_on: usize,
}

impl ReceivingState {
    pub fn new(received_on: usize, is_secondary: bool, is_simultaneous: bool, now: Instant) -> Self {
        Self {
            last_received_at: now,
            is_secondary,
            is_simultaneous,
            played_end_of_transmission: false,
            received_on,
        }
    }

    pub fn is_receiving(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_received_at) < RECEIVE_WINDOW
    }
}

/// Transmit indicator, written only by the voice transport
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendingState {
    pub is_sending: bool,
    pub sending_on: usize,
    #[serde(skip)]
    pub last_sent_at: Option<Instant>,
}

/// Local participant identity as announced to the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalIdentity {
    pub name: String,
    pub coalition: i32,
}

pub struct ClientState {
    client_id: String,
    radio: RwLock<Arc<PlayerRadioSet>>,
    sending: Mutex<SendingState>,
    receiving: Vec<Mutex<Option<ReceivingState>>>,
    /// When a radio update last went out to the session
    last_sent: Mutex<Option<Instant>>,
    local_ptt: AtomicBool,
    identity: RwLock<LocalIdentity>,
    external_mode_active: AtomicBool,
    external_coalition: AtomicI32,
    presets: Mutex<Vec<PresetBank>>,
}

impl ClientState {
    pub fn new(client_id: String, identity: LocalIdentity, presets: Vec<PresetBank>) -> Self {
        Self {
            client_id,
            radio: RwLock::new(Arc::new(PlayerRadioSet::new())),
            sending: Mutex::new(SendingState::default()),
            receiving: (0..MAX_RADIOS).map(|_| Mutex::new(None)).collect(),
            last_sent: Mutex::new(None),
            local_ptt: AtomicBool::new(false),
            identity: RwLock::new(identity),
            external_mode_active: AtomicBool::new(false),
            external_coalition: AtomicI32::new(0),
            presets: Mutex::new(presets),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    // Radio set

    /// Current radio set snapshot
    pub fn radio_set(&self) -> Arc<PlayerRadioSet> {
        self.radio.read().clone()
    }

    pub fn replace_radio_set(&self, radio: PlayerRadioSet) {
        *self.radio.write() = Arc::new(radio);
    }

    /// Copy-modify-replace under the write lock
    pub fn update_radio_set<R>(&self, f: impl FnOnce(&mut PlayerRadioSet) -> R) -> R {
        let mut guard = self.radio.write();
        let mut next = (**guard).clone();
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Make the next snapshot count as a new aircraft
    pub fn mark_radio_set_stale(&self) {
        self.update_radio_set(|r| r.last_update = None);
    }

    // Transmit / receive

    pub fn sending(&self) -> SendingState {
        self.sending.lock().clone()
    }

    pub fn set_sending(&self, state: SendingState) {
        *self.sending.lock() = state;
    }

    pub fn receiving(&self, radio: usize) -> Option<ReceivingState> {
        self.receiving.get(radio).and_then(|slot| slot.lock().clone())
    }

    pub fn set_receiving(&self, radio: usize, state: ReceivingState) {
        if let Some(slot) = self.receiving.get(radio) {
            *slot.lock() = Some(state);
        }
    }

    /// Run `f` against one receive slot while holding its lock
    pub fn with_receiving<R>(&self, radio: usize, f: impl FnOnce(&mut Option<ReceivingState>) -> R) -> Option<R> {
        self.receiving.get(radio).map(|slot| f(&mut slot.lock()))
    }

    pub fn receiving_states(&self) -> Vec<Option<ReceivingState>> {
        self.receiving.iter().map(|slot| slot.lock().clone()).collect()
    }

    pub fn last_sent(&self) -> Option<Instant> {
        *self.last_sent.lock()
    }

    pub fn set_last_sent(&self, at: Option<Instant>) {
        *self.last_sent.lock() = at;
    }

    pub fn local_ptt(&self) -> bool {
        self.local_ptt.load(Ordering::SeqCst)
    }

    pub fn set_local_ptt(&self, pressed: bool) {
        self.local_ptt.store(pressed, Ordering::SeqCst);
    }

    /// Local or simulator push-to-talk
    pub fn ptt_active(&self) -> bool {
        self.local_ptt() || self.radio.read().ptt
    }

    // Identity and external mode

    pub fn identity(&self) -> LocalIdentity {
        self.identity.read().clone()
    }

    pub fn set_coalition(&self, coalition: i32) {
        self.identity.write().coalition = coalition;
    }

    pub fn external_mode_active(&self) -> bool {
        self.external_mode_active.load(Ordering::SeqCst)
    }

    pub fn set_external_mode(&self, active: bool, coalition: i32) {
        self.external_mode_active.store(active, Ordering::SeqCst);
        self.external_coalition.store(coalition, Ordering::SeqCst);
    }

    pub fn external_coalition(&self) -> i32 {
        self.external_coalition.load(Ordering::SeqCst)
    }

    // Presets

    /// Run `f` against the bank for `radio` (radios 1..)
    pub fn with_preset_bank<R>(&self, radio: usize, f: impl FnOnce(&mut PresetBank) -> R) -> Option<R> {
        let mut banks = self.presets.lock();
        banks.iter_mut().find(|b| b.radio() == radio).map(f)
    }
}

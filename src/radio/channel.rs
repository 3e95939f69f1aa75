//! A single radio slot and its enumerated modes
//!
//! Enumerations travel as small integers in JSON, matching the values the
//! simulator feed and the session server use.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Name given to any channel normalized to the blank state
pub const NO_RADIO_NAME: &str = "No Radio";

/// Frequencies closer than this are considered the same channel
pub const FREQ_TOLERANCE_HZ: f64 = 500.0;

/// Below this a frequency is treated as unset for reception
pub const MIN_RECEIVE_FREQ_HZ: f64 = 10_000.0;

/// Below this a non-intercom channel cannot transmit
pub const MIN_TRANSMIT_FREQ_HZ: f64 = 100.0;

/// Compare two frequencies using the channel tolerance
pub fn freq_close_enough(a: f64, b: f64) -> bool {
    (a - b).abs() < FREQ_TOLERANCE_HZ
}

/// Radio modulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Modulation {
    Am = 0,
    Fm = 1,
    Intercom = 2,
    #[default]
    Disabled = 3,
    HaveQuick = 4,
    Satcom = 5,
    Mids = 6,
}

impl From<Modulation> for u8 {
    fn from(m: Modulation) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for Modulation {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Modulation::Am),
            1 => Ok(Modulation::Fm),
            2 => Ok(Modulation::Intercom),
            3 => Ok(Modulation::Disabled),
            4 => Ok(Modulation::HaveQuick),
            5 => Ok(Modulation::Satcom),
            6 => Ok(Modulation::Mids),
            other => Err(CodecError::UnknownModulation(other)),
        }
    }
}

/// Who drives a frequency (or guard frequency) selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FreqMode {
    /// Simulator cockpit controls own the value
    #[default]
    Cockpit = 0,
    /// Client overlay/panel owns the value
    Overlay = 1,
}

impl From<FreqMode> for u8 {
    fn from(m: FreqMode) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for FreqMode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FreqMode::Cockpit),
            1 => Ok(FreqMode::Overlay),
            other => Err(CodecError::MalformedMessage(format!("unknown frequency mode {}", other))),
        }
    }
}

/// Who drives the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum VolumeMode {
    #[default]
    Cockpit = 0,
    Overlay = 1,
}

impl From<VolumeMode> for u8 {
    fn from(m: VolumeMode) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for VolumeMode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(VolumeMode::Cockpit),
            1 => Ok(VolumeMode::Overlay),
            other => Err(CodecError::MalformedMessage(format!("unknown volume mode {}", other))),
        }
    }
}

/// How encryption state is owned between simulator and client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EncryptionMode {
    #[default]
    NoEncryption = 0,
    /// Client owns both the toggle and the key
    JustOverlay = 1,
    /// Simulator owns both the toggle and the key
    Full = 2,
    /// Simulator owns the toggle, client owns the key
    CockpitToggleOverlayCode = 3,
}

impl From<EncryptionMode> for u8 {
    fn from(m: EncryptionMode) -> u8 {
        m as u8
    }
}

impl TryFrom<u8> for EncryptionMode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EncryptionMode::NoEncryption),
            1 => Ok(EncryptionMode::JustOverlay),
            2 => Ok(EncryptionMode::Full),
            3 => Ok(EncryptionMode::CockpitToggleOverlayCode),
            other => Err(CodecError::MalformedMessage(format!("unknown encryption mode {}", other))),
        }
    }
}

/// One radio slot on a participant's radio set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadioChannel {
    pub name: String,
    pub freq: f64,
    pub sec_freq: f64,
    pub freq_min: f64,
    pub freq_max: f64,
    pub modulation: Modulation,
    pub freq_mode: FreqMode,
    pub guard_freq_mode: FreqMode,
    pub enc_mode: EncryptionMode,
    pub enc: bool,
    pub enc_key: u8,
    pub vol_mode: VolumeMode,
    pub volume: f32,
    pub simul: bool,
    /// Active preset index, -1 when no preset is selected
    pub channel: i32,
    pub expansion: bool,
}

impl Default for RadioChannel {
    fn default() -> Self {
        Self::blank()
    }
}

impl RadioChannel {
    /// The canonical "no radio" channel
    pub fn blank() -> Self {
        Self {
            name: NO_RADIO_NAME.to_string(),
            freq: 1.0,
            sec_freq: 0.0,
            freq_min: 1.0,
            freq_max: 1.0,
            modulation: Modulation::Disabled,
            freq_mode: FreqMode::Cockpit,
            guard_freq_mode: FreqMode::Cockpit,
            enc_mode: EncryptionMode::NoEncryption,
            enc: false,
            enc_key: 0,
            vol_mode: VolumeMode::Cockpit,
            volume: 1.0,
            simul: false,
            channel: -1,
            expansion: false,
        }
    }

    /// Reset to the blank state. Volume is client-owned and survives.
    pub fn normalize_blank(&mut self) {
        self.freq = 1.0;
        self.freq_min = 1.0;
        self.freq_max = 1.0;
        self.sec_freq = 0.0;
        self.modulation = Modulation::Disabled;
        self.name = NO_RADIO_NAME.to_string();
        self.freq_mode = FreqMode::Cockpit;
        self.guard_freq_mode = FreqMode::Cockpit;
        self.enc_mode = EncryptionMode::NoEncryption;
        self.enc = false;
        self.enc_key = 0;
        self.vol_mode = VolumeMode::Cockpit;
    }

    pub fn is_disabled(&self) -> bool {
        self.modulation == Modulation::Disabled
    }

    pub fn is_intercom(&self) -> bool {
        self.modulation == Modulation::Intercom
    }

    /// Key that goes on the wire for this channel (0 when encryption is off)
    pub fn effective_key(&self) -> u8 {
        if self.enc {
            self.enc_key
        } else {
            0
        }
    }

    /// Whether this channel may be keyed for transmission
    pub fn can_transmit(&self) -> bool {
        !self.is_disabled() && (self.freq > MIN_TRANSMIT_FREQ_HZ || self.is_intercom())
    }

    /// Clamp the frequency into the channel bounds
    pub fn clamp_freq(&mut self) {
        if self.freq > self.freq_max {
            self.freq = self.freq_max;
        } else if self.freq < self.freq_min {
            self.freq = self.freq_min;
        }
    }
}

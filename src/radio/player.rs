//! A participant's complete radio configuration

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::CodecError;
use crate::radio::channel::RadioChannel;

/// Number of radio slots per participant (slot 0 is intercom)
pub const MAX_RADIOS: usize = 11;

/// Unit ids at or above this mark spectators and other non-aircraft entities
pub const UNIT_ID_OFFSET: u32 = 100_000_000;

/// A radio set not updated within this window is stale
pub const RADIO_STALE_AFTER: Duration = Duration::from_secs(10);

/// Who drives radio selection switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RadioSwitchControls {
    #[default]
    Hotas = 0,
    InCockpit = 1,
}

impl From<RadioSwitchControls> for u8 {
    fn from(c: RadioSwitchControls) -> u8 {
        c as u8
    }
}

impl TryFrom<u8> for RadioSwitchControls {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RadioSwitchControls::Hotas),
            1 => Ok(RadioSwitchControls::InCockpit),
            other => Err(CodecError::MalformedMessage(format!("unknown switch control {}", other))),
        }
    }
}

/// Who owns the simultaneous-transmission toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SimultaneousTransmissionControl {
    #[default]
    Client = 0,
    Simulator = 1,
}

impl From<SimultaneousTransmissionControl> for u8 {
    fn from(c: SimultaneousTransmissionControl) -> u8 {
        c as u8
    }
}

impl TryFrom<u8> for SimultaneousTransmissionControl {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SimultaneousTransmissionControl::Client),
            1 => Ok(SimultaneousTransmissionControl::Simulator),
            other => Err(CodecError::MalformedMessage(format!(
                "unknown simultaneous transmission control {}",
                other
            ))),
        }
    }
}

/// Transponder status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum IffStatus {
    Off = 0,
    #[default]
    Normal = 1,
    Ident = 2,
}

impl From<IffStatus> for u8 {
    fn from(s: IffStatus) -> u8 {
        s as u8
    }
}

impl TryFrom<u8> for IffStatus {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(IffStatus::Off),
            1 => Ok(IffStatus::Normal),
            2 => Ok(IffStatus::Ident),
            other => Err(CodecError::MalformedMessage(format!("unknown IFF status {}", other))),
        }
    }
}

/// Transponder (IFF) sub-state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transponder {
    pub status: IffStatus,
    pub control: u8,
    pub mode1: i32,
    pub mode3: i32,
    pub mode4: bool,
    /// Radio index whose transmissions trigger IDENT, -1 for none
    pub mic: i32,
}

impl Default for Transponder {
    fn default() -> Self {
        Self {
            status: IffStatus::Normal,
            control: 0,
            mode1: -1,
            mode3: -1,
            mode4: false,
            mic: -1,
        }
    }
}

/// Simulator world position in metres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The simulator reports (0, _, 0) when it has no real position
    pub fn is_unknown(&self) -> bool {
        self.x == 0.0 && self.z == 0.0
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Geographic position, passed through untouched
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
}

/// One participant's radio set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerRadioSet {
    pub name: String,
    pub unit: String,
    pub unit_id: u32,
    pub radios: Vec<RadioChannel>,
    pub selected: usize,
    pub ptt: bool,
    pub in_aircraft: bool,
    pub control: RadioSwitchControls,
    pub simultaneous_transmission: bool,
    pub simultaneous_transmission_control: SimultaneousTransmissionControl,
    pub pos: Position,
    pub lat_lng: LatLng,
    pub iff: Option<Transponder>,
    #[serde(skip)]
    pub last_update: Option<Instant>,
}

impl Default for PlayerRadioSet {
    fn default() -> Self {
        Self {
            name: String::new(),
            unit: String::new(),
            unit_id: 0,
            radios: vec![RadioChannel::blank(); MAX_RADIOS],
            selected: 0,
            ptt: false,
            in_aircraft: false,
            control: RadioSwitchControls::Hotas,
            simultaneous_transmission: false,
            simultaneous_transmission_control: SimultaneousTransmissionControl::Client,
            pos: Position::default(),
            lat_lng: LatLng::default(),
            iff: None,
            last_update: None,
        }
    }
}

impl PlayerRadioSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updated within the staleness window
    pub fn is_current(&self, now: Instant) -> bool {
        self.last_update
            .map(|t| now.saturating_duration_since(t) < RADIO_STALE_AFTER)
            .unwrap_or(false)
    }

    pub fn is_spectator(&self) -> bool {
        self.unit_id >= UNIT_ID_OFFSET
    }

    pub fn radio(&self, index: usize) -> Option<&RadioChannel> {
        self.radios.get(index)
    }

    pub fn selected_radio(&self) -> Option<&RadioChannel> {
        self.radios.get(self.selected)
    }

    /// Radios keyed when transmitting on `primary`: the primary itself plus,
    /// with simultaneous transmission on, every simul-eligible radio.
    pub fn transmitting_radios(&self, primary: usize) -> Vec<usize> {
        let mut keyed = Vec::new();

        if let Some(radio) = self.radios.get(primary) {
            if radio.can_transmit() {
                keyed.push(primary);
            }
        }

        if self.simultaneous_transmission {
            for (i, radio) in self.radios.iter().enumerate() {
                if i != primary && radio.simul && radio.can_transmit() {
                    keyed.push(i);
                }
            }
        }

        keyed
    }
}

//! Radio data model: channels, radio sets and preset banks

pub mod channel;
pub mod player;
pub mod presets;

pub use channel::{
    freq_close_enough, EncryptionMode, FreqMode, Modulation, RadioChannel, VolumeMode,
};
pub use player::{
    IffStatus, LatLng, PlayerRadioSet, Position, RadioSwitchControls,
    SimultaneousTransmissionControl, Transponder, MAX_RADIOS, UNIT_ID_OFFSET,
};
pub use presets::{PresetBank, PresetChannel};

//! Preset channel banks for overlay-driven radios
//!
//! Each radio above the intercom slot owns one bank. A bank holds every
//! preset loaded from disk and exposes the subset that fits the radio's
//! current frequency bounds.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// A named preset frequency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetChannel {
    pub name: String,
    /// Frequency in Hz
    pub frequency: f64,
}

/// Presets for a single radio
#[derive(Debug, Clone, Default)]
pub struct PresetBank {
    radio: usize,
    available: Vec<PresetChannel>,
    channels: Vec<PresetChannel>,
    min: f64,
    max: f64,
    selected: Option<usize>,
}

impl PresetBank {
    pub fn new(radio: usize, available: Vec<PresetChannel>) -> Self {
        Self {
            radio,
            available,
            ..Default::default()
        }
    }

    /// Load the bank for `radio` from `<dir>/radio-<n>.json`
    pub fn load(dir: &Path, radio: usize) -> Result<Self, ConfigError> {
        let path = dir.join(format!("radio-{}.json", radio));
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let available: Vec<PresetChannel> =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::new(radio, available))
    }

    /// Load banks for radios 1..=count, falling back to an empty bank
    pub fn load_all(dir: Option<&Path>, count: usize) -> Vec<Self> {
        (1..=count)
            .map(|radio| match dir {
                Some(dir) => Self::load(dir, radio).unwrap_or_else(|e| {
                    tracing::debug!("No presets for radio {}: {}", radio, e);
                    Self::new(radio, Vec::new())
                }),
                None => Self::new(radio, Vec::new()),
            })
            .collect()
    }

    pub fn radio(&self) -> usize {
        self.radio
    }

    /// Presets that fit the current bounds
    pub fn channels(&self) -> &[PresetChannel] {
        &self.channels
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Rebuild the visible list for new frequency bounds and deselect
    pub fn reload(&mut self, min: f64, max: f64) {
        self.min = min;
        self.max = max;
        self.channels = self
            .available
            .iter()
            .filter(|p| p.frequency >= min && p.frequency <= max)
            .cloned()
            .collect();
        self.selected = None;
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.selected = None;
    }

    /// Step to the next preset, wrapping
    pub fn channel_up(&mut self) -> Option<(usize, &PresetChannel)> {
        if self.channels.is_empty() {
            return None;
        }
        let next = match self.selected {
            Some(i) if i + 1 < self.channels.len() => i + 1,
            Some(_) => 0,
            None => 0,
        };
        self.selected = Some(next);
        Some((next, &self.channels[next]))
    }

    /// Step to the previous preset, wrapping
    pub fn channel_down(&mut self) -> Option<(usize, &PresetChannel)> {
        if self.channels.is_empty() {
            return None;
        }
        let prev = match self.selected {
            Some(0) | None => self.channels.len() - 1,
            Some(i) => i - 1,
        };
        self.selected = Some(prev);
        Some((prev, &self.channels[prev]))
    }
}

//! Server-published settings

use parking_lot::RwLock;
use std::collections::HashMap;

/// Settings the client acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerSettingKey {
    LosEnabled,
    DistanceEnabled,
    IrlRadioTx,
    RadioExpansion,
    AllowRadioEncryption,
    ExternalAwacsMode,
}

impl ServerSettingKey {
    pub fn name(&self) -> &'static str {
        match self {
            ServerSettingKey::LosEnabled => "LOS_ENABLED",
            ServerSettingKey::DistanceEnabled => "DISTANCE_ENABLED",
            ServerSettingKey::IrlRadioTx => "IRL_RADIO_TX",
            ServerSettingKey::RadioExpansion => "RADIO_EXPANSION",
            ServerSettingKey::AllowRadioEncryption => "ALLOW_RADIO_ENCRYPTION",
            ServerSettingKey::ExternalAwacsMode => "EXTERNAL_AWACS_MODE",
        }
    }

    /// Value assumed until the server says otherwise
    pub fn default_value(&self) -> bool {
        matches!(self, ServerSettingKey::AllowRadioEncryption)
    }
}

/// Key/value store replaced wholesale on every settings message
#[derive(Debug, Default)]
pub struct ServerSettings {
    values: RwLock<HashMap<String, String>>,
}

impl ServerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, values: HashMap<String, String>) {
        *self.values.write() = values;
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }

    pub fn set_bool(&self, key: ServerSettingKey, value: bool) {
        self.values
            .write()
            .insert(key.name().to_string(), value.to_string());
    }

    /// Boolean value, falling back to the key default when absent or unparsable
    pub fn get_bool(&self, key: ServerSettingKey) -> bool {
        self.values
            .read()
            .get(key.name())
            .and_then(|v| parse_bool(v))
            .unwrap_or_else(|| key.default_value())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.read().get(name).cloned()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ServerSettings::new();
        assert!(!settings.get_bool(ServerSettingKey::LosEnabled));
        assert!(!settings.get_bool(ServerSettingKey::IrlRadioTx));
        assert!(settings.get_bool(ServerSettingKey::AllowRadioEncryption));
    }

    #[test]
    fn test_replace_and_parse() {
        let settings = ServerSettings::new();
        let mut values = HashMap::new();
        values.insert("LOS_ENABLED".to_string(), "True".to_string());
        values.insert("ALLOW_RADIO_ENCRYPTION".to_string(), "false".to_string());
        values.insert("DISTANCE_ENABLED".to_string(), "maybe".to_string());
        settings.replace(values);

        assert!(settings.get_bool(ServerSettingKey::LosEnabled));
        assert!(!settings.get_bool(ServerSettingKey::AllowRadioEncryption));
        assert!(!settings.get_bool(ServerSettingKey::DistanceEnabled));

        settings.set_bool(ServerSettingKey::IrlRadioTx, true);
        assert!(settings.get_bool(ServerSettingKey::IrlRadioTx));
        assert_eq!(settings.get("LOS_ENABLED").as_deref(), Some("True"));
    }
}

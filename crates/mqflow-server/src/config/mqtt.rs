//! MQTT feature configuration.

use serde::Deserialize;

/// MQTT feature configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Maximum QoS level granted to any client (0, 1, or 2).
    #[serde(default = "default_max_qos")]
    pub max_qos: u8,

    /// Whether retained messages are available.
    #[serde(default = "default_true")]
    pub retain_available: bool,

    /// Deliver one copy of a message per matching subscription instead
    /// of one per client. Pre-MQTT 5 clients only; MQTT 5 defines the
    /// per-subscription behavior.
    #[serde(default)]
    pub allow_duplicate_messages: bool,
}

fn default_max_qos() -> u8 {
    2
}
fn default_true() -> bool {
    true
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            max_qos: 2,
            retain_available: true,
            allow_duplicate_messages: false,
        }
    }
}

impl MqttConfig {
    /// Validate the MQTT configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_qos > 2 {
            return Err("max_qos must be 0, 1, or 2".into());
        }
        Ok(())
    }
}

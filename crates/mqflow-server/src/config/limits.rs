//! Delivery queue and inflight limits configuration.

use serde::Deserialize;

/// Default maximum inflight QoS 1/2 messages per client per direction.
pub const DEFAULT_MAX_INFLIGHT_MESSAGES: u16 = 20;

/// Default maximum queued messages per client.
pub const DEFAULT_MAX_QUEUED_MESSAGES: u32 = 1000;

/// Limits configuration.
///
/// A value of 0 means unbounded throughout. The queued limits are
/// interpreted relative to the inflight window: `max_queued_messages`
/// is the additional backlog permitted beyond `max_inflight_messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent QoS 1/2 messages in flight, per client and
    /// direction (0 = unbounded).
    #[serde(default = "default_max_inflight_messages")]
    pub max_inflight_messages: u16,

    /// Byte budget for QoS 1/2 payloads in flight (0 = unbounded).
    #[serde(default)]
    pub max_inflight_bytes: u64,

    /// Maximum queued messages per client (0 = unbounded).
    #[serde(default = "default_max_queued_messages")]
    pub max_queued_messages: u32,

    /// Byte budget for queued payloads (0 = unbounded).
    #[serde(default)]
    pub max_queued_bytes: u64,

    /// Queue QoS 0 messages for offline persistent clients. When false,
    /// QoS 0 messages to an offline client are dropped.
    #[serde(default)]
    pub queue_qos0_messages: bool,
}

fn default_max_inflight_messages() -> u16 {
    DEFAULT_MAX_INFLIGHT_MESSAGES
}
fn default_max_queued_messages() -> u32 {
    DEFAULT_MAX_QUEUED_MESSAGES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_inflight_messages: DEFAULT_MAX_INFLIGHT_MESSAGES,
            max_inflight_bytes: 0,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            max_queued_bytes: 0,
            queue_qos0_messages: false,
        }
    }
}

impl LimitsConfig {
    /// Limits with every budget disabled, useful for embedders that
    /// apply their own back-pressure.
    pub fn unbounded() -> Self {
        Self {
            max_inflight_messages: 0,
            max_inflight_bytes: 0,
            max_queued_messages: 0,
            max_queued_bytes: 0,
            queue_qos0_messages: false,
        }
    }
}

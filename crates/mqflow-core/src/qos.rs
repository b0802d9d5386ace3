//! MQTT Quality of Service levels.

use crate::error::ProtocolError;

/// MQTT Quality of Service level.
///
/// Ordered so that `min` on two levels yields the effective delivery
/// level (a subscription never upgrades the publish QoS).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    /// At least once; acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// Exactly once; PUBREC/PUBREL/PUBCOMP handshake.
    ExactlyOnce = 2,
}

impl QoS {
    /// Numeric protocol value (0, 1 or 2).
    #[inline]
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQos(value)),
        }
    }
}

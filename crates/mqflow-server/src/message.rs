//! Message records: the shared base message and per-client delivery records.
//!
//! A published message is held once as a [`BaseMessage`] in the shared
//! store; every delivery to a subscriber is a lightweight [`ClientMsg`]
//! that references it by id. The base message dies when the last
//! delivery record releases its reference.

use ahash::AHashSet;
use bytes::Bytes;

use mqflow_core::QoS;

/// 64-bit store id stamped on every base message.
pub type DbId = u64;

/// Where a message entered the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Published by a connected client.
    Client,
    /// Generated by the broker itself ($SYS, will messages).
    Broker,
    /// Forwarded from a bridged broker.
    Bridge,
}

/// Delivery direction relative to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Peer to broker (publishes we received).
    In,
    /// Broker to peer (publishes we deliver).
    Out,
}

/// Per-delivery protocol state.
///
/// The `Publish*` states mark a message ready for its next PUBLISH
/// write; the `WaitFor*` states are parked awaiting a peer ack;
/// `Queued` messages have not been admitted to flight yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgState {
    /// Unknown state, e.g. from a corrupt restore. Never written.
    Invalid,
    PublishQos0,
    PublishQos1,
    PublishQos2,
    WaitForPuback,
    WaitForPubrec,
    SendPubrec,
    WaitForPubrel,
    ResendPubrel,
    WaitForPubcomp,
    ResendPubcomp,
    Queued,
}

impl MsgState {
    /// True for the states the write path turns into a PUBLISH.
    #[inline]
    pub fn is_publish(self) -> bool {
        matches!(
            self,
            MsgState::PublishQos0 | MsgState::PublishQos1 | MsgState::PublishQos2
        )
    }

    /// Initial flight state for a message of the given QoS.
    pub fn publish_for(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => MsgState::PublishQos0,
            QoS::AtLeastOnce => MsgState::PublishQos1,
            QoS::ExactlyOnce => MsgState::PublishQos2,
        }
    }
}

/// The canonical, reference-counted copy of a published message.
#[derive(Debug)]
pub struct BaseMessage {
    /// Store id; unique within the broker, sortable by creation time.
    pub db_id: DbId,
    pub topic: Bytes,
    pub payload: Bytes,
    /// Raw MQTT v5 properties, forwarded as-is.
    pub properties: Option<Bytes>,
    pub qos: QoS,
    pub retain: bool,
    pub origin: Origin,
    /// Client id of the publisher ("" for broker-originated messages).
    pub source_id: String,
    pub source_username: Option<String>,
    /// Listener port the publish arrived on, if any.
    pub source_listener: Option<u16>,
    /// Wire packet id used by the publisher.
    pub source_mid: u16,
    /// Wall-clock seconds at which the message expires; 0 = never.
    pub expiry_time: u64,
    /// Client ids this message has already been delivered to, for
    /// duplicate suppression on overlapping subscriptions.
    pub dest_ids: AHashSet<String>,
    /// Number of `ClientMsg` records referencing this message.
    pub ref_count: u32,
}

impl BaseMessage {
    /// Create a message with the wire-level fields set; source and
    /// store identity are stamped by [`crate::MessageDb::store_message`].
    pub fn new(
        topic: Bytes,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        properties: Option<Bytes>,
    ) -> Self {
        Self {
            db_id: 0,
            topic,
            payload,
            properties,
            qos,
            retain,
            origin: Origin::Broker,
            source_id: String::new(),
            source_username: None,
            source_listener: None,
            source_mid: 0,
            expiry_time: 0,
            dest_ids: AHashSet::new(),
            ref_count: 0,
        }
    }

    #[inline]
    pub fn payload_len(&self) -> u32 {
        self.payload.len() as u32
    }

    /// True if the message carries an expiry time that has passed.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry_time != 0 && now > self.expiry_time
    }

    /// Seconds of lifetime left, for the outgoing publish properties.
    /// Only meaningful when not expired; 0 when no expiry is set.
    #[inline]
    pub fn expiry_interval(&self, now: u64) -> u32 {
        if self.expiry_time == 0 {
            0
        } else {
            self.expiry_time.saturating_sub(now) as u32
        }
    }
}

/// A single delivery attempt, bound to one client and direction.
#[derive(Debug, Clone)]
pub struct ClientMsg {
    /// Per-client monotonic id, used as the persistence key.
    pub cmsg_id: u64,
    /// Id of the referenced [`BaseMessage`] in the store.
    pub base_id: DbId,
    /// Wire packet id used in acks for this delivery.
    pub mid: u16,
    pub direction: Direction,
    pub state: MsgState,
    pub dup: bool,
    /// Effective QoS: the publish QoS capped by the client's maximum.
    pub qos: QoS,
    pub retain: bool,
    pub subscription_identifier: u32,
    /// Payload size of the referenced message, cached so that lane
    /// accounting never needs a store lookup.
    pub payload_len: u32,
}

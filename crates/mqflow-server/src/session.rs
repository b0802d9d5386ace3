//! Per-client session state for the delivery engine.
//!
//! Each client owns two [`MsgData`] lanes pairs, one per direction:
//! `inflight` holds messages sent (or about to be sent) and awaiting
//! their ack flow, `queued` holds admitted messages not yet released
//! into flight. Both are insertion-ordered; delivery order always
//! equals insertion order.

use std::collections::VecDeque;

use mqflow_core::QoS;

use crate::config::Config;
use crate::message::{ClientMsg, Direction};
use crate::util::FlightQuota;

/// How a bridge connection is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStartType {
    /// Connect at startup and keep the connection open.
    Automatic,
    /// Connect on demand when messages are waiting.
    Lazy,
    /// Connect once and never reconnect.
    Once,
}

/// Delivery-relevant state of a bridge session.
///
/// Bridge configuration itself lives with the embedder; the delivery
/// engine only needs the flags that change admission and cleanup.
#[derive(Debug, Clone)]
pub struct BridgeState {
    pub start_type: BridgeStartType,
    /// Discard remote-session state on reconnect.
    pub clean_start: bool,
    /// Discard local-session state on reconnect.
    pub clean_start_local: bool,
    /// Backlog size that triggers a lazy reconnect.
    pub threshold: u32,
    /// Set when the queued backlog crossed the threshold; cleared by
    /// the bridge driver once it initiates the connection.
    pub lazy_reconnect: bool,
}

/// Per-client delivery statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
}

/// One direction's delivery lanes and counters.
///
/// The `12`-suffixed counters track only QoS 1/2 payloads; QoS 0
/// messages count toward the plain pair alone.
#[derive(Debug, Default)]
pub struct MsgData {
    pub inflight: VecDeque<ClientMsg>,
    pub queued: VecDeque<ClientMsg>,

    pub inflight_count: u32,
    pub inflight_bytes: u64,
    pub inflight_count12: u32,
    pub inflight_bytes12: u64,

    pub queued_count: u32,
    pub queued_bytes: u64,
    pub queued_count12: u32,
    pub queued_bytes12: u64,

    /// Remaining QoS 1/2 flight slots.
    pub quota: FlightQuota,
}

impl MsgData {
    pub fn new(inflight_maximum: u16) -> Self {
        Self {
            quota: FlightQuota::new(inflight_maximum),
            ..Default::default()
        }
    }

    /// Configured ceiling on concurrent QoS 1/2 flight (0 = unbounded).
    #[inline]
    pub fn inflight_maximum(&self) -> u16 {
        self.quota.maximum()
    }

    pub fn add_inflight_stats(&mut self, msg: &ClientMsg) {
        self.inflight_count += 1;
        self.inflight_bytes += msg.payload_len as u64;
        if msg.qos != QoS::AtMostOnce {
            self.inflight_count12 += 1;
            self.inflight_bytes12 += msg.payload_len as u64;
        }
    }

    pub fn remove_inflight_stats(&mut self, msg: &ClientMsg) {
        self.inflight_count -= 1;
        self.inflight_bytes -= msg.payload_len as u64;
        if msg.qos != QoS::AtMostOnce {
            self.inflight_count12 -= 1;
            self.inflight_bytes12 -= msg.payload_len as u64;
        }
    }

    pub fn add_queued_stats(&mut self, msg: &ClientMsg) {
        self.queued_count += 1;
        self.queued_bytes += msg.payload_len as u64;
        if msg.qos != QoS::AtMostOnce {
            self.queued_count12 += 1;
            self.queued_bytes12 += msg.payload_len as u64;
        }
    }

    pub fn remove_queued_stats(&mut self, msg: &ClientMsg) {
        self.queued_count -= 1;
        self.queued_bytes -= msg.payload_len as u64;
        if msg.qos != QoS::AtMostOnce {
            self.queued_count12 -= 1;
            self.queued_bytes12 -= msg.payload_len as u64;
        }
    }

    /// Move the head of `queued` to the tail of `inflight`, consuming a
    /// flight slot. Head-to-tail is what preserves publisher order.
    ///
    /// The caller sets the message state before dequeuing.
    pub fn dequeue_first(&mut self) {
        if let Some(msg) = self.queued.pop_front() {
            self.remove_queued_stats(&msg);
            self.quota.consume();
            self.add_inflight_stats(&msg);
            self.inflight.push_back(msg);
        }
    }

    /// Zero every lane counter. The lists themselves are untouched;
    /// used by reconnect reset before re-deriving from the lanes.
    pub fn reset_counters(&mut self) {
        self.inflight_count = 0;
        self.inflight_bytes = 0;
        self.inflight_count12 = 0;
        self.inflight_bytes12 = 0;
        self.queued_count = 0;
        self.queued_bytes = 0;
        self.queued_count12 = 0;
        self.queued_bytes12 = 0;
    }

    /// Position of the inflight entry with the given wire mid.
    pub fn inflight_position(&self, mid: u16) -> Option<usize> {
        self.inflight.iter().position(|m| m.mid == mid)
    }

    /// Position of the queued entry with the given wire mid.
    pub fn queued_position(&self, mid: u16) -> Option<usize> {
        self.queued.iter().position(|m| m.mid == mid)
    }
}

/// Per-client delivery context.
pub struct ClientSession {
    /// Client id. Empty until the session is identified; inserts into
    /// an unidentified session are silently skipped.
    pub id: String,
    /// MQTT protocol version (3 = 3.1, 4 = 3.1.1, 5 = 5.0).
    pub protocol_version: u8,
    /// Authenticated username, if any; stamped onto stored messages.
    pub username: Option<String>,
    /// Listener port this client connected through.
    pub listener_port: Option<u16>,
    /// Maximum QoS granted to this client; deliveries are capped to it.
    pub max_qos: QoS,
    pub clean_start: bool,
    /// Whether this session is mirrored by the persistence backend.
    pub is_persisted: bool,
    /// Latched on the first admission drop, cleared by the session
    /// layer on the next successful admission; suppresses log flooding.
    pub is_dropping: bool,
    /// Bridge session state, if this client is a bridge connection.
    pub bridge: Option<BridgeState>,
    /// Depth of the network write queue, maintained by the connection
    /// layer; consulted by QoS 0 admission for connected clients.
    pub out_packet_count: usize,
    /// Last per-client message id handed out.
    pub last_cmsg_id: u64,
    pub msgs_in: MsgData,
    pub msgs_out: MsgData,
    pub stats: SessionStats,

    connected: bool,
}

impl ClientSession {
    pub fn new(id: impl Into<String>, config: &Config) -> Self {
        let max_inflight = config.limits.max_inflight_messages;
        Self {
            id: id.into(),
            protocol_version: 4,
            username: None,
            listener_port: None,
            max_qos: QoS::try_from(config.mqtt.max_qos).unwrap_or(QoS::ExactlyOnce),
            clean_start: true,
            is_persisted: false,
            is_dropping: false,
            bridge: None,
            out_packet_count: 0,
            last_cmsg_id: 0,
            msgs_in: MsgData::new(max_inflight),
            msgs_out: MsgData::new(max_inflight),
            stats: SessionStats::default(),
            connected: false,
        }
    }

    /// Whether a network connection is currently attached.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Called by the connection layer when the transport opens/closes.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Lanes for one direction.
    #[inline]
    pub fn msgs(&self, dir: Direction) -> &MsgData {
        match dir {
            Direction::In => &self.msgs_in,
            Direction::Out => &self.msgs_out,
        }
    }

    /// Mutable lanes for one direction.
    #[inline]
    pub fn msgs_mut(&mut self, dir: Direction) -> &mut MsgData {
        match dir {
            Direction::In => &mut self.msgs_in,
            Direction::Out => &mut self.msgs_out,
        }
    }

    /// Allocate the next per-client message id.
    pub fn next_cmsg_id(&mut self) -> u64 {
        self.last_cmsg_id += 1;
        self.last_cmsg_id
    }

    /// True for lazy-start bridges, which may queue while offline.
    pub fn is_lazy_bridge(&self) -> bool {
        matches!(
            self.bridge,
            Some(BridgeState {
                start_type: BridgeStartType::Lazy,
                ..
            })
        )
    }
}

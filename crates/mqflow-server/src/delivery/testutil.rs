//! Shared fixtures for the delivery tests.

use bytes::Bytes;

use mqflow_core::{QoS, Result, SendError};

use crate::config::Config;
use crate::db::MessageDb;
use crate::hooks::{
    FanoutDispatcher, FanoutOutcome, NullPersist, PacketSink, PersistNotifier, PublishOut,
};
use crate::message::{BaseMessage, DbId, Origin};
use crate::session::{BridgeStartType, BridgeState, ClientSession, MsgData};

pub fn db_default() -> MessageDb {
    MessageDb::open(Config::default(), Box::new(NullPersist))
}

pub fn db_with_limits(
    max_inflight: u16,
    max_inflight_bytes: u64,
    max_queued: u32,
    max_queued_bytes: u64,
) -> MessageDb {
    let mut config = Config::default();
    config.limits.max_inflight_messages = max_inflight;
    config.limits.max_inflight_bytes = max_inflight_bytes;
    config.limits.max_queued_messages = max_queued;
    config.limits.max_queued_bytes = max_queued_bytes;
    MessageDb::open(config, Box::new(NullPersist))
}

pub fn connected_client(id: &str, db: &MessageDb) -> ClientSession {
    let mut client = ClientSession::new(id, &db.config);
    client.set_connected(true);
    client
}

pub fn offline_client(id: &str, db: &MessageDb) -> ClientSession {
    let mut client = ClientSession::new(id, &db.config);
    client.clean_start = false;
    client
}

pub fn bridge_state(start_type: BridgeStartType, clean_start_local: bool) -> BridgeState {
    BridgeState {
        start_type,
        clean_start: false,
        clean_start_local,
        threshold: 10,
        lazy_reconnect: false,
    }
}

/// Store a broker-originated message and return its id.
pub fn seed_message(db: &mut MessageDb, qos: QoS, payload: &[u8]) -> DbId {
    let msg = BaseMessage::new(
        Bytes::from_static(b"test/topic"),
        Bytes::copy_from_slice(payload),
        qos,
        false,
        None,
    );
    db.store_message(msg, None, 0, None, Origin::Broker).unwrap()
}

/// Store a message as a client QoS 2 publish with the given wire mid.
pub fn seed_qos2_publish(db: &mut MessageDb, source_mid: u16, payload: &[u8]) -> DbId {
    let mut msg = BaseMessage::new(
        Bytes::from_static(b"test/topic"),
        Bytes::copy_from_slice(payload),
        QoS::ExactlyOnce,
        false,
        None,
    );
    msg.source_mid = source_mid;
    db.store_message(msg, None, 0, None, Origin::Client).unwrap()
}

/// Check invariant: lane counters equal a walk of the lists.
pub fn assert_lane_counters_consistent(data: &MsgData) {
    assert_eq!(data.inflight_count as usize, data.inflight.len());
    assert_eq!(data.queued_count as usize, data.queued.len());
    assert_eq!(
        data.inflight_bytes,
        data.inflight.iter().map(|m| m.payload_len as u64).sum::<u64>()
    );
    assert_eq!(
        data.queued_bytes,
        data.queued.iter().map(|m| m.payload_len as u64).sum::<u64>()
    );
    assert_eq!(
        data.inflight_count12 as usize,
        data.inflight.iter().filter(|m| m.qos != QoS::AtMostOnce).count()
    );
    assert_eq!(
        data.queued_count12 as usize,
        data.queued.iter().filter(|m| m.qos != QoS::AtMostOnce).count()
    );
    assert_eq!(
        data.inflight_bytes12,
        data.inflight
            .iter()
            .filter(|m| m.qos != QoS::AtMostOnce)
            .map(|m| m.payload_len as u64)
            .sum::<u64>()
    );
    assert_eq!(
        data.queued_bytes12,
        data.queued
            .iter()
            .filter(|m| m.qos != QoS::AtMostOnce)
            .map(|m| m.payload_len as u64)
            .sum::<u64>()
    );
}

/// A packet recorded by [`MockSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentPacket {
    Publish {
        mid: u16,
        qos: QoS,
        dup: bool,
        retain: bool,
        expiry_interval: u32,
    },
    Pubrec {
        mid: u16,
    },
    Pubrel {
        mid: u16,
    },
}

/// How the mock sink responds to sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Ok,
    WouldBlock,
    Oversize,
}

/// Recording sink with a configurable failure mode.
pub struct MockSink {
    pub sent: Vec<SentPacket>,
    pub mode: SinkMode,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            mode: SinkMode::Ok,
        }
    }

    pub fn failing(mode: SinkMode) -> Self {
        Self {
            sent: Vec::new(),
            mode,
        }
    }

    fn result(&self) -> std::result::Result<(), SendError> {
        match self.mode {
            SinkMode::Ok => Ok(()),
            SinkMode::WouldBlock => Err(SendError::Io(std::io::Error::from(
                std::io::ErrorKind::WouldBlock,
            ))),
            SinkMode::Oversize => Err(SendError::OversizePacket),
        }
    }
}

impl PacketSink for MockSink {
    fn send_publish(&mut self, publish: &PublishOut<'_>) -> std::result::Result<(), SendError> {
        let rc = self.result();
        if rc.is_ok() {
            self.sent.push(SentPacket::Publish {
                mid: publish.mid,
                qos: publish.qos,
                dup: publish.dup,
                retain: publish.retain,
                expiry_interval: publish.expiry_interval,
            });
        }
        rc
    }

    fn send_pubrec(&mut self, mid: u16, _reason: u8) -> std::result::Result<(), SendError> {
        let rc = self.result();
        if rc.is_ok() {
            self.sent.push(SentPacket::Pubrec { mid });
        }
        rc
    }

    fn send_pubrel(&mut self, mid: u16) -> std::result::Result<(), SendError> {
        let rc = self.result();
        if rc.is_ok() {
            self.sent.push(SentPacket::Pubrel { mid });
        }
        rc
    }
}

/// Dispatcher stub that counts calls; optionally takes a reference so
/// the stored message survives the unreferenced sweep.
pub struct CountingFanout {
    pub calls: usize,
    pub last_base_id: Option<DbId>,
    keep: bool,
}

impl CountingFanout {
    pub fn no_subscribers() -> Self {
        Self {
            calls: 0,
            last_base_id: None,
            keep: false,
        }
    }

    pub fn keep_reference() -> Self {
        Self {
            calls: 0,
            last_base_id: None,
            keep: true,
        }
    }
}

impl FanoutDispatcher for CountingFanout {
    fn queue_messages(
        &mut self,
        db: &mut MessageDb,
        _source_id: &str,
        _topic: &Bytes,
        _qos: QoS,
        _retain: bool,
        base_id: DbId,
    ) -> Result<FanoutOutcome> {
        self.calls += 1;
        self.last_base_id = Some(base_id);
        if self.keep {
            db.store.ref_inc(base_id);
            Ok(FanoutOutcome::Delivered)
        } else {
            Ok(FanoutOutcome::NoSubscribers)
        }
    }
}

/// Persistence notifier that records each hook invocation. Clone it
/// before boxing so the test keeps a handle on the event log.
#[derive(Default, Clone)]
pub struct RecordingPersist {
    events: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
}

impl RecordingPersist {
    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl PersistNotifier for RecordingPersist {
    fn base_msg_add(&mut self, msg: &crate::message::BaseMessage) {
        self.push(format!("base_add:{}", msg.db_id));
    }

    fn base_msg_delete(&mut self, msg: &crate::message::BaseMessage) {
        self.push(format!("base_delete:{}", msg.db_id));
    }

    fn client_msg_add(&mut self, client_id: &str, msg: &crate::message::ClientMsg) {
        self.push(format!("cmsg_add:{}:{}", client_id, msg.cmsg_id));
    }

    fn client_msg_update(&mut self, client_id: &str, msg: &crate::message::ClientMsg) {
        self.push(format!("cmsg_update:{}:{}", client_id, msg.cmsg_id));
    }

    fn client_msg_delete(&mut self, client_id: &str, msg: &crate::message::ClientMsg) {
        self.push(format!("cmsg_delete:{}:{}", client_id, msg.cmsg_id));
    }
}

//! Boundary traits for the delivery engine's external collaborators.
//!
//! The network writer, the subscription matcher and the persistence
//! backend all live outside this crate; the delivery engine reaches
//! them through these traits and never blocks inside them. Send
//! callbacks must not reenter the engine.

use std::io;

use bytes::Bytes;

use mqflow_core::{QoS, Result, SendError};

use crate::db::MessageDb;
use crate::message::{BaseMessage, ClientMsg, DbId};

/// A fully-resolved outgoing PUBLISH, borrowed from the stored message
/// and its delivery record.
#[derive(Debug)]
pub struct PublishOut<'a> {
    pub mid: u16,
    pub topic: &'a Bytes,
    pub payload: &'a Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub subscription_identifier: u32,
    pub properties: Option<&'a Bytes>,
    /// Remaining message lifetime in seconds; 0 = no expiry set.
    pub expiry_interval: u32,
}

/// Per-client packet writer provided by the network layer.
///
/// Sends are non-blocking: a full socket buffer surfaces as a
/// `WouldBlock` I/O error and the delivery state is left unchanged for
/// a later retry.
pub trait PacketSink {
    fn send_publish(&mut self, publish: &PublishOut<'_>) -> std::result::Result<(), SendError>;
    fn send_pubrec(&mut self, mid: u16, reason: u8) -> std::result::Result<(), SendError>;
    fn send_pubrel(&mut self, mid: u16) -> std::result::Result<(), SendError>;
}

/// Sink for sessions with no attached connection. Every send fails
/// with `NotConnected`; the write paths check the connection flag
/// first, so this is only reached by misuse.
#[derive(Debug, Default)]
pub struct NullSink;

impl PacketSink for NullSink {
    fn send_publish(&mut self, _publish: &PublishOut<'_>) -> std::result::Result<(), SendError> {
        Err(SendError::Io(io::Error::from(io::ErrorKind::NotConnected)))
    }

    fn send_pubrec(&mut self, _mid: u16, _reason: u8) -> std::result::Result<(), SendError> {
        Err(SendError::Io(io::Error::from(io::ErrorKind::NotConnected)))
    }

    fn send_pubrel(&mut self, _mid: u16) -> std::result::Result<(), SendError> {
        Err(SendError::Io(io::Error::from(io::ErrorKind::NotConnected)))
    }
}

/// Result of handing a message to the subscription matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// At least one subscriber matched.
    Delivered,
    /// No subscription matched the topic.
    NoSubscribers,
}

/// The subscription matcher. Implementations route the stored message
/// to every matching subscriber by calling
/// [`crate::delivery::message_insert_outgoing`] once per match.
pub trait FanoutDispatcher {
    fn queue_messages(
        &mut self,
        db: &mut MessageDb,
        source_id: &str,
        topic: &Bytes,
        qos: QoS,
        retain: bool,
        base_id: DbId,
    ) -> Result<FanoutOutcome>;
}

/// Persistence notifications, fired once per state-changing mutation.
///
/// Best effort: failures are the backend's problem, the delivery
/// engine never retries or rolls back.
pub trait PersistNotifier {
    fn base_msg_add(&mut self, _msg: &BaseMessage) {}
    fn base_msg_delete(&mut self, _msg: &BaseMessage) {}
    fn client_msg_add(&mut self, _client_id: &str, _msg: &ClientMsg) {}
    fn client_msg_update(&mut self, _client_id: &str, _msg: &ClientMsg) {}
    fn client_msg_delete(&mut self, _client_id: &str, _msg: &ClientMsg) {}
}

/// No-op notifier for embedders without a persistence backend.
#[derive(Debug, Default)]
pub struct NullPersist;

impl PersistNotifier for NullPersist {}

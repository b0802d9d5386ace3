//! mqflow-server - the per-client message delivery engine.
//!
//! This crate tracks outstanding publish deliveries for every connected
//! (or persistently-remembered) client, sequences the QoS 1/2
//! handshakes, enforces inflight and queue budgets, and moves messages
//! through reconnect and expiry. Payloads are held once in a shared
//! reference-counted store; each per-client delivery record points back
//! at its stored message.
//!
//! The network layer, packet codec, subscription matcher and
//! persistence backend are external collaborators reached through the
//! traits in [`hooks`].

pub mod config;
pub mod db;
pub mod delivery;
pub mod hooks;
pub mod message;
pub mod metrics;
pub mod msgid;
pub mod session;
pub mod store;
pub mod util;

pub use db::MessageDb;
pub use delivery::InsertOutcome;
pub use hooks::{FanoutDispatcher, FanoutOutcome, PacketSink, PersistNotifier, PublishOut};
pub use message::{BaseMessage, ClientMsg, DbId, Direction, MsgState, Origin};
pub use session::{BridgeStartType, BridgeState, ClientSession, MsgData};
pub use store::MessageStore;

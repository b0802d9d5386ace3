//! The broker delivery context.
//!
//! Everything the delivery paths share across clients lives here and
//! is passed explicitly: the message store, the id generator, the
//! configuration snapshot, the wall clock and the persistence
//! notifier. All operations run to completion on the owning thread;
//! there are no locks and no suspension points.

use std::time::{SystemTime, UNIX_EPOCH};

use mqflow_core::Result;

use crate::config::Config;
use crate::hooks::PersistNotifier;
use crate::message::{BaseMessage, DbId, Origin};
use crate::metrics::BrokerMetrics;
use crate::msgid::MessageIdGenerator;
use crate::session::ClientSession;
use crate::store::MessageStore;

/// Shared delivery state, passed into every delivery operation.
pub struct MessageDb {
    pub config: Config,
    pub store: MessageStore,
    pub persist: Box<dyn PersistNotifier>,
    pub metrics: BrokerMetrics,
    idgen: MessageIdGenerator,
    now_real_s: u64,
}

impl MessageDb {
    /// Open the delivery context with the given configuration and
    /// persistence notifier.
    pub fn open(config: Config, persist: Box<dyn PersistNotifier>) -> Self {
        let idgen = MessageIdGenerator::new(config.node_id);
        let mut db = Self {
            config,
            store: MessageStore::new(),
            persist,
            metrics: BrokerMetrics::new(),
            idgen,
            now_real_s: 0,
        };
        db.refresh_now();
        log::debug!("Message store opened (node id {})", db.config.node_id);
        db
    }

    /// Tear down at shutdown. Drops every stored message without
    /// persistence notifications.
    pub fn close(&mut self) {
        self.store.clean();
    }

    /// Wall-clock seconds as last refreshed.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now_real_s
    }

    /// Pin the clock (embedders driving their own time source, tests).
    pub fn set_now(&mut self, now_real_s: u64) {
        self.now_real_s = now_real_s;
    }

    /// Refresh the clock from the system time. Called once per
    /// housekeeping tick, not per operation.
    pub fn refresh_now(&mut self) {
        self.now_real_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
    }

    /// Generate the next message id.
    pub fn next_msg_id(&mut self) -> DbId {
        self.idgen.next_id()
    }

    /// Seed the id generator from the highest restored id so that
    /// monotonicity holds across restarts.
    pub fn seed_message_ids(&mut self, last_id: DbId) {
        self.idgen.seed(last_id);
    }

    /// Stamp a message with its source, expiry and store id, then
    /// insert it into the store.
    ///
    /// `expiry_interval` is the publisher's message expiry in seconds
    /// (0 = never expires). Pass a `db_id` only when restoring a
    /// previously-stamped message.
    pub fn store_message(
        &mut self,
        mut msg: BaseMessage,
        source: Option<&ClientSession>,
        expiry_interval: u32,
        db_id: Option<DbId>,
        origin: Origin,
    ) -> Result<DbId> {
        if let Some(client) = source {
            msg.source_id = client.id.clone();
            msg.source_username = client.username.clone();
            msg.source_listener = client.listener_port;
        } else {
            msg.source_id = String::new();
        }
        msg.origin = origin;
        msg.expiry_time = if expiry_interval > 0 {
            self.now_real_s + u64::from(expiry_interval)
        } else {
            0
        };
        msg.db_id = match db_id {
            Some(id) => id,
            None => self.next_msg_id(),
        };

        let id = msg.db_id;
        self.store.add(msg)?;
        Ok(id)
    }

    /// Remove a stored message regardless of references. The delete
    /// hook fires when `notify` is set.
    pub fn msg_store_remove(&mut self, id: DbId, notify: bool) {
        let Self { store, persist, .. } = self;
        store.remove(id, notify, persist.as_mut());
    }

    /// Release one reference on a stored message; removes and notifies
    /// on the last one. Returns true if the entry was removed.
    pub fn msg_store_ref_dec(&mut self, id: DbId) -> bool {
        let Self { store, persist, .. } = self;
        store.ref_dec(id, persist.as_mut())
    }

    /// Sweep unreferenced store entries. Returns the number removed.
    pub fn msg_store_compact(&mut self) -> usize {
        let Self { store, persist, .. } = self;
        store.compact(persist.as_mut())
    }
}

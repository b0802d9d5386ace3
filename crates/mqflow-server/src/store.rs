//! Shared message store.
//!
//! One entry per logical published message, keyed by its 64-bit id.
//! Entries are reference-counted by the per-client delivery records
//! (and optionally a retained-message holder); the entry is removed
//! and the persistence backend notified when the last reference is
//! released.

use ahash::AHashMap;

use mqflow_core::{Error, Result};

use crate::hooks::PersistNotifier;
use crate::message::{BaseMessage, DbId};

/// Process-wide message index with count/byte gauges.
#[derive(Default)]
pub struct MessageStore {
    msgs: AHashMap<DbId, BaseMessage>,
    bytes: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Total payload bytes held by the store.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[inline]
    pub fn get(&self, id: DbId) -> Option<&BaseMessage> {
        self.msgs.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: DbId) -> Option<&mut BaseMessage> {
        self.msgs.get_mut(&id)
    }

    /// Insert a stamped message. Fails with `AlreadyExists` if the id
    /// is present (e.g. a duplicate restore).
    pub fn add(&mut self, msg: BaseMessage) -> Result<()> {
        match self.msgs.entry(msg.db_id) {
            std::collections::hash_map::Entry::Occupied(_) => Err(Error::AlreadyExists),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.bytes += msg.payload.len() as u64;
                entry.insert(msg);
                Ok(())
            }
        }
    }

    /// Detach and free an entry regardless of its reference count. If
    /// `notify` is set the persistence delete hook fires.
    pub fn remove(&mut self, id: DbId, notify: bool, persist: &mut dyn PersistNotifier) {
        if let Some(msg) = self.msgs.remove(&id) {
            self.bytes -= msg.payload.len() as u64;
            if notify {
                persist.base_msg_delete(&msg);
            }
        }
    }

    /// Take a reference on behalf of a new delivery record.
    pub fn ref_inc(&mut self, id: DbId) {
        if let Some(msg) = self.msgs.get_mut(&id) {
            msg.ref_count += 1;
        }
    }

    /// Release a reference; removes and notifies when the count hits
    /// zero. Returns true if the entry was removed.
    pub fn ref_dec(&mut self, id: DbId, persist: &mut dyn PersistNotifier) -> bool {
        let Some(msg) = self.msgs.get_mut(&id) else {
            return false;
        };
        msg.ref_count -= 1;
        if msg.ref_count == 0 {
            self.remove(id, true, persist);
            true
        } else {
            false
        }
    }

    /// Sweep entries nothing references any more (invariant repair
    /// after a restore). Returns the number of entries removed.
    pub fn compact(&mut self, persist: &mut dyn PersistNotifier) -> usize {
        let stale: Vec<DbId> = self
            .msgs
            .values()
            .filter(|m| m.ref_count == 0)
            .map(|m| m.db_id)
            .collect();
        for id in &stale {
            self.remove(*id, true, persist);
        }
        if !stale.is_empty() {
            log::debug!("Compacted {} unreferenced stored messages", stale.len());
        }
        stale.len()
    }

    /// Unconditional teardown at shutdown; no notifications.
    pub fn clean(&mut self) {
        self.msgs.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullPersist;
    use bytes::Bytes;
    use mqflow_core::QoS;

    fn base(id: DbId, payload: &'static [u8]) -> BaseMessage {
        let mut msg = BaseMessage::new(
            Bytes::from_static(b"t"),
            Bytes::from_static(payload),
            QoS::AtLeastOnce,
            false,
            None,
        );
        msg.db_id = id;
        msg
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut store = MessageStore::new();
        store.add(base(1, b"abc")).unwrap();
        assert!(matches!(
            store.add(base(1, b"abc")),
            Err(Error::AlreadyExists)
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.bytes(), 3);
    }

    #[test]
    fn test_ref_dec_removes_at_zero() {
        let mut store = MessageStore::new();
        let mut persist = NullPersist;
        store.add(base(1, b"abcd")).unwrap();

        store.ref_inc(1);
        store.ref_inc(1);
        assert!(!store.ref_dec(1, &mut persist));
        assert!(store.get(1).is_some());

        assert!(store.ref_dec(1, &mut persist));
        assert!(store.get(1).is_none());
        assert_eq!(store.bytes(), 0);
    }

    #[test]
    fn test_compact_sweeps_unreferenced() {
        let mut store = MessageStore::new();
        let mut persist = NullPersist;
        store.add(base(1, b"a")).unwrap();
        store.add(base(2, b"b")).unwrap();
        store.ref_inc(2);

        assert_eq!(store.compact(&mut persist), 1);
        assert!(store.get(1).is_none());
        assert!(store.get(2).is_some());
    }

    #[test]
    fn test_clean() {
        let mut store = MessageStore::new();
        store.add(base(1, b"a")).unwrap();
        store.add(base(2, b"b")).unwrap();
        store.clean();
        assert!(store.is_empty());
        assert_eq!(store.bytes(), 0);
    }

    #[test]
    fn test_delete_notification_fires() {
        struct Recorder {
            deleted: Vec<DbId>,
        }
        impl PersistNotifier for Recorder {
            fn base_msg_delete(&mut self, msg: &BaseMessage) {
                self.deleted.push(msg.db_id);
            }
        }

        let mut store = MessageStore::new();
        let mut persist = Recorder { deleted: Vec::new() };
        store.add(base(9, b"x")).unwrap();
        store.ref_inc(9);
        store.ref_dec(9, &mut persist);
        assert_eq!(persist.deleted, vec![9]);

        // clean() never notifies.
        store.add(base(10, b"y")).unwrap();
        store.clean();
        assert_eq!(persist.deleted, vec![9]);
    }
}

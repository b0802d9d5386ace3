//! Periodic expiry sweep.
//!
//! Walks all four lanes and retires every message whose stored expiry
//! time has passed. Inflight QoS 1/2 removals hand their flight slot
//! back; queued removals never held one. Driven by the housekeeping
//! loop and by session reload.

use mqflow_core::QoS;

use crate::db::MessageDb;
use crate::delivery::{remove_inflight, remove_queued};
use crate::message::Direction;
use crate::session::ClientSession;

/// Remove every expired message from this client's lanes.
pub fn expire_all_messages(db: &mut MessageDb, client: &mut ClientSession) {
    let now = db.now();

    for dir in [Direction::Out, Direction::In] {
        let mut idx = 0;
        while idx < client.msgs(dir).inflight.len() {
            let (base_id, qos) = {
                let msg = &client.msgs(dir).inflight[idx];
                (msg.base_id, msg.qos)
            };
            if db.store.get(base_id).is_some_and(|b| b.is_expired(now)) {
                if qos != QoS::AtMostOnce {
                    client.msgs_mut(dir).quota.restore();
                }
                remove_inflight(db, client, dir, idx);
                db.metrics.add_msgs_expired(1);
            } else {
                idx += 1;
            }
        }

        let mut idx = 0;
        while idx < client.msgs(dir).queued.len() {
            let base_id = client.msgs(dir).queued[idx].base_id;
            if db.store.get(base_id).is_some_and(|b| b.is_expired(now)) {
                remove_queued(db, client, dir, idx);
                db.metrics.add_msgs_expired(1);
            } else {
                idx += 1;
            }
        }
    }
}

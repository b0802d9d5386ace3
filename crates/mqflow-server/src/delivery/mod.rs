//! Per-client delivery operations.
//!
//! Insertion admits a newly-matched message to the inflight or queued
//! lane (or drops it), the write paths in [`write`] drain inflight and
//! promote queued messages, and the ack handlers in [`ack`] advance
//! the QoS 1/2 state machines. [`reconnect`] re-normalizes a resumed
//! session and [`expiry`] sweeps out-of-date messages.

pub mod ack;
pub mod admission;
pub mod expiry;
pub mod reconnect;
pub mod write;

#[cfg(test)]
pub(crate) mod testutil;

use std::collections::VecDeque;

use bytes::Bytes;

use mqflow_core::{Error, QoS, Result};

use crate::db::MessageDb;
use crate::hooks::{FanoutDispatcher, FanoutOutcome, PacketSink};
use crate::message::{BaseMessage, ClientMsg, DbId, Direction, MsgState, Origin};
use crate::session::{BridgeStartType, ClientSession};

pub use admission::{ready_for_flight, ready_for_queue};
pub use ack::{
    message_delete_outgoing, message_release_incoming, message_remove_incoming,
    message_update_outgoing,
};
pub use expiry::expire_all_messages;
pub use reconnect::message_reconnect_reset;
pub use write::{
    write_inflight_out_all, write_inflight_out_latest, write_queued_in, write_queued_out,
};

/// Result of an insert: admitted to flight, parked in the queue, or
/// refused. A duplicate-suppressed insert reports `Accepted` without
/// creating a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Accepted,
    Queued,
    Dropped,
}

/// Latch the per-client dropping flag (logging the first occurrence)
/// and count the drop.
fn note_drop(db: &MessageDb, client: &mut ClientSession) {
    if !client.is_dropping {
        client.is_dropping = true;
        log::warn!(
            "Outgoing messages are being dropped for client {}.",
            client.id
        );
    }
    db.metrics.add_msgs_dropped(1);
}

/// Unlink an inflight record, firing the persistence delete hook and
/// releasing its store reference.
pub(crate) fn remove_inflight(
    db: &mut MessageDb,
    client: &mut ClientSession,
    dir: Direction,
    idx: usize,
) {
    let ClientSession {
        id,
        msgs_in,
        msgs_out,
        ..
    } = client;
    let msgs = match dir {
        Direction::In => msgs_in,
        Direction::Out => msgs_out,
    };
    let Some(msg) = msgs.inflight.remove(idx) else {
        return;
    };
    msgs.remove_inflight_stats(&msg);
    db.persist.client_msg_delete(id, &msg);
    db.msg_store_ref_dec(msg.base_id);
}

/// Unlink a queued record, firing the persistence delete hook and
/// releasing its store reference.
pub(crate) fn remove_queued(
    db: &mut MessageDb,
    client: &mut ClientSession,
    dir: Direction,
    idx: usize,
) {
    let ClientSession {
        id,
        msgs_in,
        msgs_out,
        ..
    } = client;
    let msgs = match dir {
        Direction::In => msgs_in,
        Direction::Out => msgs_out,
    };
    let Some(msg) = msgs.queued.remove(idx) else {
        return;
    };
    msgs.remove_queued_stats(&msg);
    db.persist.client_msg_delete(id, &msg);
    db.msg_store_ref_dec(msg.base_id);
}

/// Insert a message matched for delivery to this client.
///
/// Connected clients try flight first, then (QoS > 0) the queue;
/// offline clients only queue. Anything else is dropped. When `update`
/// is set the writer is drained immediately afterwards.
///
/// `cmsg_id` of 0 allocates the next per-client id; restores pass the
/// persisted one.
#[allow(clippy::too_many_arguments)]
pub fn message_insert_outgoing(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
    cmsg_id: u64,
    mid: u16,
    qos: QoS,
    retain: bool,
    base_id: DbId,
    subscription_identifier: u32,
    update: bool,
    persist: bool,
) -> Result<InsertOutcome> {
    if client.id.is_empty() {
        // Disconnected but not entirely freed; nothing to deliver to.
        return Ok(InsertOutcome::Accepted);
    }

    client.stats.messages_sent += 1;

    let payload_len = {
        let base = db.store.get(base_id).ok_or(Error::NotFound)?;
        // Already sent to this client? Stale retained messages are the
        // exception and go out regardless.
        if client.protocol_version != 5
            && !db.config.mqtt.allow_duplicate_messages
            && !retain
            && base.dest_ids.contains(client.id.as_str())
        {
            return Ok(InsertOutcome::Accepted);
        }
        base.payload_len()
    };

    if !client.is_connected() {
        // Only QoS > 0 is worth holding for an offline client, unless
        // queueing QoS 0 is explicitly enabled or a lazy bridge will
        // pick the backlog up on reconnect.
        if qos == QoS::AtMostOnce
            && !db.config.limits.queue_qos0_messages
            && !client.is_lazy_bridge()
        {
            note_drop(db, client);
            return Ok(InsertOutcome::Dropped);
        }
        if client.bridge.as_ref().is_some_and(|b| b.clean_start_local) {
            note_drop(db, client);
            return Ok(InsertOutcome::Dropped);
        }
    }

    let (state, outcome) = if client.is_connected() {
        if ready_for_flight(db, client, Direction::Out, qos) {
            (MsgState::publish_for(qos), InsertOutcome::Accepted)
        } else if qos != QoS::AtMostOnce && ready_for_queue(db, client, Direction::Out, qos) {
            (MsgState::Queued, InsertOutcome::Queued)
        } else {
            note_drop(db, client);
            return Ok(InsertOutcome::Dropped);
        }
    } else if ready_for_queue(db, client, Direction::Out, qos) {
        (MsgState::Queued, InsertOutcome::Queued)
    } else {
        note_drop(db, client);
        return Ok(InsertOutcome::Dropped);
    };

    let cmsg_id = if cmsg_id != 0 {
        cmsg_id
    } else {
        client.next_cmsg_id()
    };
    let msg = ClientMsg {
        cmsg_id,
        base_id,
        mid,
        direction: Direction::Out,
        state,
        dup: false,
        qos: qos.min(client.max_qos),
        retain,
        subscription_identifier,
        payload_len,
    };
    let eff_qos = msg.qos;
    db.store.ref_inc(base_id);

    if state == MsgState::Queued {
        client.msgs_out.add_queued_stats(&msg);
        client.msgs_out.queued.push_back(msg);
    } else {
        client.msgs_out.add_inflight_stats(&msg);
        client.msgs_out.inflight.push_back(msg);
    }

    if persist && client.is_persisted {
        let MessageDb {
            store,
            persist: notifier,
            ..
        } = db;
        if let Some(base) = store.get(base_id) {
            notifier.base_msg_add(base);
        }
        let inserted = if state == MsgState::Queued {
            client.msgs_out.queued.back()
        } else {
            client.msgs_out.inflight.back()
        };
        if let Some(inserted) = inserted {
            notifier.client_msg_add(&client.id, inserted);
        }
    }

    // Record the destination so overlapping subscriptions don't
    // deliver twice.
    if !db.config.mqtt.allow_duplicate_messages && !retain {
        if let Some(base) = db.store.get_mut(base_id) {
            base.dest_ids.insert(client.id.clone());
        }
    }

    // Lazy bridges reconnect once enough backlog accumulates.
    let backlog = client.msgs_out.inflight_count + client.msgs_out.queued_count;
    let connected = client.is_connected();
    if let Some(bridge) = client.bridge.as_mut() {
        if bridge.start_type == BridgeStartType::Lazy && !connected && backlog >= bridge.threshold
        {
            bridge.lazy_reconnect = true;
        }
    }

    if eff_qos != QoS::AtMostOnce && state != MsgState::Queued {
        client.msgs_out.quota.consume();
    }

    if update {
        write_inflight_out_latest(db, client, sink)?;
        write_queued_out(db, client)?;
    }

    Ok(outcome)
}

/// Track an incoming QoS 2 publish until its PUBREL arrives.
///
/// The record is admitted to the incoming inflight lane in
/// `WaitForPubrel`, or queued when the receive window is full.
pub fn message_insert_incoming(
    db: &mut MessageDb,
    client: &mut ClientSession,
    cmsg_id: u64,
    base_id: DbId,
    persist: bool,
) -> Result<InsertOutcome> {
    if client.id.is_empty() {
        return Ok(InsertOutcome::Accepted);
    }

    let (base_qos, payload_len, source_mid, retain) = {
        let base = db.store.get(base_id).ok_or(Error::NotFound)?;
        (base.qos, base.payload_len(), base.source_mid, base.retain)
    };

    let (state, outcome) = if ready_for_flight(db, client, Direction::In, base_qos) {
        (MsgState::WaitForPubrel, InsertOutcome::Accepted)
    } else if base_qos != QoS::AtMostOnce && ready_for_queue(db, client, Direction::In, base_qos)
    {
        (MsgState::Queued, InsertOutcome::Queued)
    } else {
        client.stats.messages_dropped += 1;
        note_drop(db, client);
        return Ok(InsertOutcome::Dropped);
    };

    let cmsg_id = if cmsg_id != 0 {
        cmsg_id
    } else {
        client.next_cmsg_id()
    };
    let msg = ClientMsg {
        cmsg_id,
        base_id,
        mid: source_mid,
        direction: Direction::In,
        state,
        dup: false,
        qos: base_qos.min(client.max_qos),
        retain,
        subscription_identifier: 0,
        payload_len,
    };
    db.store.ref_inc(base_id);

    if state == MsgState::Queued {
        client.msgs_in.add_queued_stats(&msg);
        client.msgs_in.queued.push_back(msg);
    } else {
        client.msgs_in.add_inflight_stats(&msg);
        client.msgs_in.inflight.push_back(msg);
    }

    if persist && client.is_persisted {
        let MessageDb {
            store,
            persist: notifier,
            ..
        } = db;
        if let Some(base) = store.get(base_id) {
            notifier.base_msg_add(base);
        }
        let inserted = if state == MsgState::Queued {
            client.msgs_in.queued.back()
        } else {
            client.msgs_in.inflight.back()
        };
        if let Some(inserted) = inserted {
            notifier.client_msg_add(&client.id, inserted);
        }
    }

    if base_qos != QoS::AtMostOnce {
        client.msgs_in.quota.consume();
    }

    Ok(outcome)
}

fn delete_lane(db: &mut MessageDb, lane: &mut VecDeque<ClientMsg>) {
    while let Some(msg) = lane.pop_front() {
        db.msg_store_ref_dec(msg.base_id);
    }
}

/// Drop every incoming delivery record and zero the counters.
pub fn messages_delete_incoming(db: &mut MessageDb, client: &mut ClientSession) {
    delete_lane(db, &mut client.msgs_in.inflight);
    delete_lane(db, &mut client.msgs_in.queued);
    client.msgs_in.reset_counters();
}

/// Drop every outgoing delivery record and zero the counters.
pub fn messages_delete_outgoing(db: &mut MessageDb, client: &mut ClientSession) {
    delete_lane(db, &mut client.msgs_out.inflight);
    delete_lane(db, &mut client.msgs_out.queued);
    client.msgs_out.reset_counters();
}

/// Session-teardown deletion, gated by clean-start semantics: a
/// persistent session keeps its records unless `force_free` is set.
pub fn messages_delete(db: &mut MessageDb, client: &mut ClientSession, force_free: bool) {
    let bridge_clean_start = client.bridge.as_ref().is_some_and(|b| b.clean_start);
    let bridge_clean_start_local = client.bridge.as_ref().is_some_and(|b| b.clean_start_local);

    if force_free || client.clean_start || bridge_clean_start {
        messages_delete_incoming(db, client);
    }

    if force_free
        || bridge_clean_start_local
        || (client.bridge.is_none() && client.clean_start)
    {
        messages_delete_outgoing(db, client);
    }
}

/// Store a message built from raw inputs and hand it to the
/// subscription matcher. Convenience path for broker-originated
/// publishes ($SYS, will messages) and simple callers.
#[allow(clippy::too_many_arguments)]
pub fn messages_easy_queue(
    db: &mut MessageDb,
    source: Option<&ClientSession>,
    fanout: &mut dyn FanoutDispatcher,
    topic: Bytes,
    qos: QoS,
    payload: Bytes,
    retain: bool,
    expiry_interval: u32,
    properties: Option<Bytes>,
) -> Result<FanoutOutcome> {
    if topic.is_empty() {
        return Err(Error::Invalid("empty topic"));
    }
    let retain = retain && db.config.mqtt.retain_available;
    let source_id = source.map(|c| c.id.clone()).unwrap_or_default();
    let origin = if source.is_some() {
        Origin::Client
    } else {
        Origin::Broker
    };

    let msg = BaseMessage::new(topic.clone(), payload, qos, retain, properties);
    let base_id = db.store_message(msg, source, expiry_interval, None, origin)?;

    let rc = fanout.queue_messages(db, &source_id, &topic, qos, retain, base_id);

    // No subscriber took a reference: drop the stored copy again.
    if db.store.get(base_id).is_some_and(|m| m.ref_count == 0) {
        db.msg_store_remove(base_id, false);
    }

    rc
}

/// Find the stored message behind an incoming publish by the
/// publisher's wire mid, across both incoming lanes.
pub fn message_store_find(client: &ClientSession, mid: u16) -> Option<DbId> {
    client
        .msgs_in
        .inflight
        .iter()
        .chain(client.msgs_in.queued.iter())
        .find(|m| m.mid == mid)
        .map(|m| m.base_id)
}

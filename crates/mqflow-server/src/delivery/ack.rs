//! Ack reception: advancing and completing delivery state machines.
//!
//! Outgoing acks (PUBACK, PUBREC, PUBCOMP) update or remove records in
//! the outgoing lanes; incoming PUBREL releases a held QoS 2 publish
//! to the subscription matcher. Every completion pulls queued messages
//! into the freed window.

use mqflow_core::{Error, ProtocolError, QoS, Result};

use crate::db::MessageDb;
use crate::delivery::admission::ready_for_flight;
use crate::delivery::write::{write_inflight_out_latest, write_queued_in};
use crate::delivery::{remove_inflight, remove_queued};
use crate::hooks::{FanoutDispatcher, PacketSink};
use crate::message::{Direction, MsgState};
use crate::session::ClientSession;

/// Record a peer ack by rewriting the state of an outgoing inflight
/// message (e.g. PUBREC received: `WaitForPubrec` -> `WaitForPubrel`).
pub fn message_update_outgoing(
    db: &mut MessageDb,
    client: &mut ClientSession,
    mid: u16,
    state: MsgState,
    qos: QoS,
    persist: bool,
) -> Result<()> {
    let ClientSession { id, msgs_out, .. } = client;
    if let Some(idx) = msgs_out.inflight_position(mid) {
        let msg = &mut msgs_out.inflight[idx];
        if msg.qos != qos {
            return Err(ProtocolError::AckQosMismatch(mid).into());
        }
        msg.state = state;
        if persist {
            db.persist.client_msg_update(id, msg);
        }
        return Ok(());
    }
    Err(Error::NotFound)
}

/// Complete an outgoing delivery (PUBACK for QoS 1, PUBCOMP for QoS 2)
/// and pull queued messages into the freed window.
///
/// QoS 2 completions must arrive in the expected state; anything else
/// is a protocol violation and the session should disconnect.
pub fn message_delete_outgoing(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
    mid: u16,
    expect_state: MsgState,
    qos: QoS,
) -> Result<()> {
    let mut deleted = false;

    if let Some(idx) = client.msgs_out.inflight_position(mid) {
        let msg = &client.msgs_out.inflight[idx];
        if msg.qos != qos {
            return Err(ProtocolError::AckQosMismatch(mid).into());
        }
        if qos == QoS::ExactlyOnce && msg.state != expect_state {
            return Err(ProtocolError::AckOutOfOrder(mid).into());
        }
        remove_inflight(db, client, Direction::Out, idx);
        deleted = true;
    }

    if !deleted {
        if let Some(idx) = client.msgs_out.queued_position(mid) {
            let msg = &client.msgs_out.queued[idx];
            if msg.qos != qos {
                return Err(ProtocolError::AckQosMismatch(mid).into());
            }
            if qos == QoS::ExactlyOnce && msg.state != expect_state {
                return Err(ProtocolError::AckOutOfOrder(mid).into());
            }
            remove_queued(db, client, Direction::Out, idx);
        }
    }

    // Release queued messages into the freed window, oldest first.
    loop {
        let head_qos = match client.msgs_out.queued.front() {
            Some(head) => head.qos,
            None => break,
        };
        if !ready_for_flight(db, client, Direction::Out, head_qos) {
            break;
        }
        {
            let ClientSession { id, msgs_out, .. } = client;
            if let Some(head) = msgs_out.queued.front_mut() {
                head.state = MsgState::publish_for(head_qos);
                db.persist.client_msg_update(id, head);
            }
        }
        client.msgs_out.dequeue_first();
    }

    write_inflight_out_latest(db, client, sink)
}

/// Drop a held incoming QoS 2 publish (PUBREC with an error reason).
pub fn message_remove_incoming(
    db: &mut MessageDb,
    client: &mut ClientSession,
    mid: u16,
) -> Result<()> {
    if let Some(idx) = client.msgs_in.inflight_position(mid) {
        let base_id = client.msgs_in.inflight[idx].base_id;
        let base_qos = db.store.get(base_id).map(|b| b.qos);
        if base_qos != Some(QoS::ExactlyOnce) {
            return Err(ProtocolError::AckNotQos2(mid).into());
        }
        remove_inflight(db, client, Direction::In, idx);
        return Ok(());
    }
    Err(Error::NotFound)
}

/// Handle PUBREL: forward the held QoS 2 publish to the subscription
/// matcher, complete the incoming record, and promote queued incoming
/// messages into the receive window.
pub fn message_release_incoming(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
    mid: u16,
    fanout: &mut dyn FanoutDispatcher,
) -> Result<()> {
    let mut deleted = false;

    if let Some(idx) = client.msgs_in.inflight_position(mid) {
        let (base_id, retain) = {
            let msg = &client.msgs_in.inflight[idx];
            (msg.base_id, msg.retain)
        };
        let (base_qos, topic, source_id) = {
            let base = db.store.get(base_id).ok_or(Error::NotFound)?;
            (base.qos, base.topic.clone(), base.source_id.clone())
        };
        if base_qos != QoS::ExactlyOnce {
            return Err(ProtocolError::AckNotQos2(mid).into());
        }

        if topic.is_empty() {
            // A denied publish held only so the client stops resending
            // it; complete the flow without delivering to anyone.
            remove_inflight(db, client, Direction::In, idx);
            deleted = true;
        } else {
            fanout.queue_messages(db, &source_id, &topic, QoS::ExactlyOnce, retain, base_id)?;
            remove_inflight(db, client, Direction::In, idx);
            deleted = true;
        }
    }

    write_queued_in(db, client, sink)?;

    if deleted {
        Ok(())
    } else {
        Err(Error::NotFound)
    }
}

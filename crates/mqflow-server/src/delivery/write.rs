//! Writers: drain inflight messages to the packet sink and promote
//! queued messages into freed flight slots.
//!
//! Send failures other than oversize never advance a state machine;
//! the message stays where it is and the scheduling layer retries on
//! the next writability event.

use mqflow_core::{QoS, Result, SendError};

use crate::db::MessageDb;
use crate::delivery::{admission::ready_for_flight, remove_inflight};
use crate::hooks::{PacketSink, PublishOut};
use crate::message::{Direction, MsgState};
use crate::session::ClientSession;

/// What a single inflight write did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SingleWrite {
    /// The record was removed (QoS 0 sent, oversize, or expired).
    Removed,
    /// The record stays inflight (ack pending, or state was a no-op).
    Kept,
}

/// Dispatch one outgoing inflight record on its state.
fn write_inflight_out_single(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
    idx: usize,
) -> Result<SingleWrite> {
    let now = db.now();
    let (state, mid, qos) = {
        let msg = &client.msgs_out.inflight[idx];
        (msg.state, msg.mid, msg.qos)
    };

    // Expired while waiting: retire it without sending.
    let expired = {
        let msg = &client.msgs_out.inflight[idx];
        db.store
            .get(msg.base_id)
            .is_some_and(|base| base.is_expired(now))
    };
    if expired {
        if qos != QoS::AtMostOnce {
            client.msgs_out.quota.restore();
        }
        remove_inflight(db, client, Direction::Out, idx);
        db.metrics.add_msgs_expired(1);
        return Ok(SingleWrite::Removed);
    }

    match state {
        MsgState::PublishQos0 | MsgState::PublishQos1 | MsgState::PublishQos2 => {
            let rc = {
                let msg = &client.msgs_out.inflight[idx];
                let Some(base) = db.store.get(msg.base_id) else {
                    return Ok(SingleWrite::Kept);
                };
                sink.send_publish(&PublishOut {
                    mid: msg.mid,
                    topic: &base.topic,
                    payload: &base.payload,
                    qos: msg.qos,
                    retain: msg.retain,
                    dup: msg.dup,
                    subscription_identifier: msg.subscription_identifier,
                    properties: base.properties.as_ref(),
                    expiry_interval: base.expiry_interval(now),
                })
            };
            match rc {
                Ok(()) => {
                    db.metrics.add_msgs_sent(1);
                    if state == MsgState::PublishQos0 {
                        remove_inflight(db, client, Direction::Out, idx);
                        Ok(SingleWrite::Removed)
                    } else {
                        let ClientSession { id, msgs_out, .. } = client;
                        let msg = &mut msgs_out.inflight[idx];
                        // Any retry attempt from here on is a duplicate.
                        msg.dup = true;
                        msg.state = if state == MsgState::PublishQos1 {
                            MsgState::WaitForPuback
                        } else {
                            MsgState::WaitForPubrec
                        };
                        db.persist.client_msg_update(id, msg);
                        Ok(SingleWrite::Kept)
                    }
                }
                Err(SendError::OversizePacket) => {
                    remove_inflight(db, client, Direction::Out, idx);
                    Ok(SingleWrite::Removed)
                }
                Err(e) => Err(e.into()),
            }
        }
        MsgState::ResendPubrel => match sink.send_pubrel(mid) {
            Ok(()) => {
                let ClientSession { id, msgs_out, .. } = client;
                let msg = &mut msgs_out.inflight[idx];
                msg.state = MsgState::WaitForPubcomp;
                db.persist.client_msg_update(id, msg);
                Ok(SingleWrite::Kept)
            }
            Err(e) => Err(e.into()),
        },
        _ => Ok(SingleWrite::Kept),
    }
}

/// Write every outgoing inflight message that is due.
pub fn write_inflight_out_all(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
) -> Result<()> {
    if !client.is_connected() {
        return Ok(());
    }

    let mut idx = 0;
    while idx < client.msgs_out.inflight.len() {
        match write_inflight_out_single(db, client, sink, idx)? {
            SingleWrite::Removed => {}
            SingleWrite::Kept => idx += 1,
        }
    }
    Ok(())
}

/// Write only the newly-admitted tail of the inflight list: the
/// contiguous run of publish-ready messages at the end. Earlier
/// messages are parked awaiting acks and must not be resent here.
pub fn write_inflight_out_latest(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
) -> Result<()> {
    if !client.is_connected() || client.msgs_out.inflight.is_empty() {
        return Ok(());
    }

    if client.msgs_out.inflight.len() == 1 {
        write_inflight_out_single(db, client, sink, 0)?;
        return Ok(());
    }

    let lane = &client.msgs_out.inflight;
    let mut start = lane.len();
    while start > 0 && lane[start - 1].state.is_publish() {
        start -= 1;
    }

    let mut idx = start;
    while idx < client.msgs_out.inflight.len() {
        match write_inflight_out_single(db, client, sink, idx)? {
            SingleWrite::Removed => {}
            SingleWrite::Kept => idx += 1,
        }
    }
    Ok(())
}

/// Promote queued incoming QoS 2 messages into the receive window,
/// acknowledging each with PUBREC.
pub fn write_queued_in(
    db: &mut MessageDb,
    client: &mut ClientSession,
    sink: &mut dyn PacketSink,
) -> Result<()> {
    if !client.is_connected() {
        return Ok(());
    }

    loop {
        let (mid, qos) = match client.msgs_in.queued.front() {
            Some(head) => (head.mid, head.qos),
            None => break,
        };
        if client.msgs_in.inflight_maximum() != 0 && !client.msgs_in.quota.has_slot() {
            break;
        }
        if qos != QoS::ExactlyOnce {
            break;
        }

        if let Some(head) = client.msgs_in.queued.front_mut() {
            head.state = MsgState::SendPubrec;
        }
        client.msgs_in.dequeue_first();

        let rc = sink.send_pubrec(mid, 0);
        let ClientSession { id, msgs_in, .. } = client;
        if let Some(msg) = msgs_in.inflight.back_mut() {
            match rc {
                Ok(()) => {
                    msg.state = MsgState::WaitForPubrel;
                    db.persist.client_msg_update(id, msg);
                }
                Err(e) => {
                    db.persist.client_msg_update(id, msg);
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

/// Promote queued outgoing messages into flight while admission
/// allows, oldest first. The promoted messages are sent on the next
/// inflight write.
pub fn write_queued_out(db: &mut MessageDb, client: &mut ClientSession) -> Result<()> {
    if !client.is_connected() {
        return Ok(());
    }

    loop {
        let qos = match client.msgs_out.queued.front() {
            Some(head) => head.qos,
            None => break,
        };
        if !ready_for_flight(db, client, Direction::Out, qos) {
            break;
        }

        if let Some(head) = client.msgs_out.queued.front_mut() {
            head.state = MsgState::publish_for(qos);
        }
        client.msgs_out.dequeue_first();

        let ClientSession { id, msgs_out, .. } = client;
        if let Some(msg) = msgs_out.inflight.back() {
            db.persist.client_msg_update(id, msg);
        }
    }
    Ok(())
}

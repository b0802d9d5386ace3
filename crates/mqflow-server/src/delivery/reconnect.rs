//! Session resumption: re-derive accounting and rewrite states so
//! retransmission and queue drainage happen in order.
//!
//! The surviving records are trusted, the counters are not: everything
//! is zeroed and rebuilt from a walk of the lanes. Outgoing states are
//! rewound to their publish state (or `ResendPubrel` mid-handshake);
//! incoming records below QoS 2 are discarded because the client will
//! simply retransmit them.

use mqflow_core::QoS;

use crate::db::MessageDb;
use crate::delivery::admission::ready_for_flight;
use crate::delivery::remove_inflight;
use crate::message::{Direction, MsgState};
use crate::session::ClientSession;

/// Re-normalize both directions of a resumed session.
pub fn message_reconnect_reset(db: &mut MessageDb, client: &mut ClientSession) {
    reconnect_reset_outgoing(db, client);
    reconnect_reset_incoming(db, client);
}

/// Promote queued messages into the restored window, oldest first,
/// stopping at the first message admission refuses. Without this, a
/// message queued while the client was away would only go out after
/// the next live publish, out of order.
fn promote_queued(db: &mut MessageDb, client: &mut ClientSession, dir: Direction) {
    loop {
        let qos = match client.msgs(dir).queued.front() {
            Some(head) => head.qos,
            None => break,
        };
        if !ready_for_flight(db, client, dir, qos) {
            break;
        }

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
        if let Some(head) = msgs.queued.front_mut() {
            head.state = MsgState::publish_for(qos);
        }
        msgs.dequeue_first();
        if let Some(msg) = msgs.inflight.back() {
            db.persist.client_msg_update(id, msg);
        }
    }
}

fn reconnect_reset_outgoing(db: &mut MessageDb, client: &mut ClientSession) {
    {
        let ClientSession { id, msgs_out, .. } = client;
        msgs_out.reset_counters();
        msgs_out.quota.reset();

        for _ in 0..msgs_out.inflight.len() {
            let mut msg = match msgs_out.inflight.pop_front() {
                Some(msg) => msg,
                None => break,
            };
            msgs_out.add_inflight_stats(&msg);
            if msg.qos != QoS::AtMostOnce {
                msgs_out.quota.consume();
            }

            msg.state = match msg.qos {
                QoS::AtMostOnce => MsgState::PublishQos0,
                QoS::AtLeastOnce => MsgState::PublishQos1,
                QoS::ExactlyOnce => {
                    if msg.state == MsgState::WaitForPubcomp {
                        // PUBREC already came back: resume with PUBREL.
                        MsgState::ResendPubrel
                    } else {
                        MsgState::PublishQos2
                    }
                }
            };
            db.persist.client_msg_update(id, &msg);
            msgs_out.inflight.push_back(msg);
        }

        for _ in 0..msgs_out.queued.len() {
            let msg = match msgs_out.queued.pop_front() {
                Some(msg) => msg,
                None => break,
            };
            msgs_out.add_queued_stats(&msg);
            msgs_out.queued.push_back(msg);
        }
    }

    promote_queued(db, client, Direction::Out);
}

fn reconnect_reset_incoming(db: &mut MessageDb, client: &mut ClientSession) {
    client.msgs_in.reset_counters();
    client.msgs_in.quota.reset();

    let mut idx = 0;
    while idx < client.msgs_in.inflight.len() {
        let msg = client.msgs_in.inflight[idx].clone();
        client.msgs_in.add_inflight_stats(&msg);
        if msg.qos != QoS::AtMostOnce {
            client.msgs_in.quota.consume();
        }

        if msg.qos != QoS::ExactlyOnce {
            // Anything below QoS 2 the client retransmits at no harm.
            remove_inflight(db, client, Direction::In, idx);
        } else {
            // State preserved: it matches whatever the peer holds.
            idx += 1;
        }
    }

    {
        let msgs_in = &mut client.msgs_in;
        for _ in 0..msgs_in.queued.len() {
            let msg = match msgs_in.queued.pop_front() {
                Some(msg) => msg,
                None => break,
            };
            msgs_in.add_queued_stats(&msg);
            msgs_in.queued.push_back(msg);
        }
    }

    promote_queued(db, client, Direction::In);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::testutil::*;
    use crate::message::ClientMsg;

    /// Push a restored-looking record straight into a lane, bypassing
    /// insertion (counters deliberately left stale).
    fn restored_msg(
        db: &mut MessageDb,
        mid: u16,
        qos: QoS,
        state: MsgState,
        dir: Direction,
    ) -> ClientMsg {
        let base_id = seed_message(db, qos, &[0u8; 10]);
        db.store.ref_inc(base_id);
        ClientMsg {
            cmsg_id: mid as u64,
            base_id,
            mid,
            direction: dir,
            state,
            dup: false,
            qos,
            retain: false,
            subscription_identifier: 0,
            payload_len: 10,
        }
    }

    #[test]
    fn test_outgoing_reset_rewrites_states_in_order() {
        let mut db = db_with_limits(3, 0, 0, 0);
        let mut client = connected_client("sub", &db);

        let a = restored_msg(&mut db, 1, QoS::AtLeastOnce, MsgState::WaitForPuback, Direction::Out);
        let b = restored_msg(&mut db, 2, QoS::ExactlyOnce, MsgState::WaitForPubcomp, Direction::Out);
        let c = restored_msg(&mut db, 3, QoS::AtLeastOnce, MsgState::Queued, Direction::Out);
        let d = restored_msg(&mut db, 4, QoS::AtMostOnce, MsgState::Queued, Direction::Out);
        client.msgs_out.inflight.push_back(a);
        client.msgs_out.inflight.push_back(b);
        client.msgs_out.queued.push_back(c);
        client.msgs_out.queued.push_back(d);

        message_reconnect_reset(&mut db, &mut client);

        let states: Vec<(u16, MsgState)> = client
            .msgs_out
            .inflight
            .iter()
            .map(|m| (m.mid, m.state))
            .collect();
        assert_eq!(
            states,
            vec![
                (1, MsgState::PublishQos1),
                (2, MsgState::ResendPubrel),
                (3, MsgState::PublishQos1),
                (4, MsgState::PublishQos0),
            ]
        );
        assert!(client.msgs_out.queued.is_empty());

        // Three QoS 1/2 slots consumed out of three; the QoS 0
        // promotion does not take a slot once the quota is empty.
        assert_eq!(client.msgs_out.quota.remaining(), 0);
        assert_lane_counters_consistent(&client.msgs_out);
    }

    #[test]
    fn test_outgoing_reset_stops_promotion_at_window() {
        let mut db = db_with_limits(1, 0, 0, 0);
        let mut client = connected_client("sub", &db);

        let a = restored_msg(&mut db, 1, QoS::AtLeastOnce, MsgState::WaitForPuback, Direction::Out);
        let b = restored_msg(&mut db, 2, QoS::AtLeastOnce, MsgState::Queued, Direction::Out);
        client.msgs_out.inflight.push_back(a);
        client.msgs_out.queued.push_back(b);

        message_reconnect_reset(&mut db, &mut client);

        // The single slot is taken by the surviving inflight message.
        assert_eq!(client.msgs_out.inflight_count, 1);
        assert_eq!(client.msgs_out.queued_count, 1);
        assert_eq!(client.msgs_out.queued[0].state, MsgState::Queued);
        assert_lane_counters_consistent(&client.msgs_out);
    }

    #[test]
    fn test_incoming_reset_discards_below_qos2() {
        let mut db = db_with_limits(3, 0, 0, 0);
        let mut client = connected_client("pub", &db);

        let e = restored_msg(&mut db, 1, QoS::AtLeastOnce, MsgState::WaitForPuback, Direction::In);
        let e_base = e.base_id;
        let f = restored_msg(&mut db, 2, QoS::ExactlyOnce, MsgState::WaitForPubrel, Direction::In);
        let g = restored_msg(&mut db, 3, QoS::ExactlyOnce, MsgState::Queued, Direction::In);
        client.msgs_in.inflight.push_back(e);
        client.msgs_in.inflight.push_back(f);
        client.msgs_in.queued.push_back(g);

        message_reconnect_reset(&mut db, &mut client);

        let states: Vec<(u16, MsgState)> = client
            .msgs_in
            .inflight
            .iter()
            .map(|m| (m.mid, m.state))
            .collect();
        assert_eq!(
            states,
            vec![(2, MsgState::WaitForPubrel), (3, MsgState::PublishQos2)]
        );
        assert!(client.msgs_in.queued.is_empty());
        // The discarded record released its store entry.
        assert!(db.store.get(e_base).is_none());
        assert_lane_counters_consistent(&client.msgs_in);
    }

    #[test]
    fn test_reset_counters_rederived_from_lanes() {
        let mut db = db_with_limits(5, 0, 0, 0);
        let mut client = connected_client("sub", &db);

        for mid in 1..=4 {
            let msg = restored_msg(&mut db, mid, QoS::AtLeastOnce, MsgState::WaitForPuback, Direction::Out);
            client.msgs_out.inflight.push_back(msg);
        }
        // Stale garbage the reset must overwrite.
        client.msgs_out.inflight_count = 99;
        client.msgs_out.inflight_bytes = 9999;

        message_reconnect_reset(&mut db, &mut client);

        assert_eq!(client.msgs_out.inflight_count, 4);
        assert_eq!(client.msgs_out.inflight_bytes, 40);
        assert_eq!(client.msgs_out.inflight_count12, 4);
        assert_eq!(client.msgs_out.quota.remaining(), 1);
        assert_lane_counters_consistent(&client.msgs_out);
    }
}

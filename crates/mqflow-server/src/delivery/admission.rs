//! Admission control: may a message enter flight, be queued, or must
//! it be dropped?
//!
//! Limits of 0 mean unbounded. The arithmetic is signed because the
//! queued budgets are measured relative to the inflight window, so the
//! differences can go negative.

use mqflow_core::QoS;

use crate::db::MessageDb;
use crate::message::Direction;
use crate::session::ClientSession;

/// Is this client ready to take more inflight messages right now?
///
/// For QoS 0 the choice is inflight or dropped; there is no queueing
/// option unless the client is offline and `queue_qos0_messages` is
/// enabled. QoS 1/2 flight is bounded by the slot quota and by the
/// QoS 1/2 byte budget; QoS 0 flight is bounded by the overall byte
/// level and, outgoing, by the network write-queue depth.
pub fn ready_for_flight(
    db: &MessageDb,
    client: &ClientSession,
    dir: Direction,
    qos: QoS,
) -> bool {
    let limits = &db.config.limits;
    let msgs = client.msgs(dir);

    if msgs.inflight_maximum() == 0 && limits.max_inflight_bytes == 0 {
        return true;
    }

    if qos == QoS::AtMostOnce {
        if limits.max_queued_messages == 0 && limits.max_inflight_bytes == 0 {
            return true;
        }
        let valid_bytes = (msgs.inflight_bytes as i64 - limits.max_inflight_bytes as i64)
            < limits.max_queued_bytes as i64;
        let valid_count = match dir {
            Direction::Out => (client.out_packet_count as i64) < limits.max_queued_messages as i64,
            Direction::In => {
                (msgs.inflight_count as i64 - msgs.inflight_maximum() as i64)
                    < limits.max_queued_messages as i64
            }
        };

        if limits.max_queued_messages == 0 {
            return valid_bytes;
        }
        if limits.max_queued_bytes == 0 {
            return valid_count;
        }
        valid_bytes && valid_count
    } else {
        let valid_bytes = (msgs.inflight_bytes12 as i64) < limits.max_inflight_bytes as i64;
        let valid_count = msgs.quota.has_slot();

        if msgs.inflight_maximum() == 0 {
            return valid_bytes;
        }
        if limits.max_inflight_bytes == 0 {
            return valid_count;
        }
        valid_bytes && valid_count
    }
}

/// May more messages be queued for this client? Called only after
/// [`ready_for_flight`] said no; false means drop.
///
/// The queued budgets are the backlog permitted beyond the inflight
/// window, so the window is subtracted first. Offline clients have
/// nothing in flight, so nothing is subtracted for them.
pub fn ready_for_queue(db: &MessageDb, client: &ClientSession, dir: Direction, qos: QoS) -> bool {
    let limits = &db.config.limits;

    if limits.max_queued_messages == 0 && limits.max_queued_bytes == 0 {
        return true;
    }
    if qos == QoS::AtMostOnce && !limits.queue_qos0_messages {
        // Handled in ready_for_flight: QoS 0 never queues for a
        // connected client.
        return false;
    }

    let msgs = client.msgs(dir);
    let source_bytes = msgs.queued_bytes12 as i64;
    let source_count = msgs.queued_count12 as i64;

    let (adjust_bytes, adjust_count) = if client.is_connected() {
        (
            limits.max_inflight_bytes as i64,
            msgs.inflight_maximum() as i64,
        )
    } else {
        (0, 0)
    };

    let valid_bytes = source_bytes - adjust_bytes < limits.max_queued_bytes as i64;
    let valid_count = source_count - adjust_count < limits.max_queued_messages as i64;

    if limits.max_queued_bytes == 0 {
        return valid_count;
    }
    if limits.max_queued_messages == 0 {
        return valid_bytes;
    }
    valid_bytes && valid_count
}

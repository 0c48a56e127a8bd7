//! In-flight operation table.
//!
//! Every synchronous session operation parks a one-shot rendezvous here and
//! awaits it outside the session lock; the event pump fulfils it when the
//! matching broker acknowledgement arrives. An entry is removed from the
//! table before its waiter is completed, so a late acknowledgement (after
//! the waiter timed out and cancelled) finds nothing and is dropped.
//!
//! rumqttc assigns packet ids inside its event loop and reports them through
//! `Outgoing` events, so subscribe/unsubscribe/publish ops are first parked
//! in a per-kind FIFO and re-keyed to their packet id when the `Outgoing`
//! event is observed. Submission and parking happen under the session lock,
//! which makes FIFO order equal wire order.

use std::collections::{HashMap, VecDeque};

use rumqttc::v5::mqttbytes::v5::{ConnAckProperties, DisconnectProperties};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::properties::AckProps;

/// Key identifying one in-flight operation on a session.
///
/// CONNECT and DISCONNECT have no broker-assigned packet id and use the two
/// reserved tags; everything else is keyed by its MQTT packet identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    Connect,
    Disconnect,
    Packet(u16),
}

/// Operation kinds that wait for a packet-id assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

/// Result of one MQTT operation, delivered by the event pump.
///
/// Property data is owned: the pump constructs these from the decoded packet
/// before the waiter resumes, so nothing borrowed from the network path
/// outlives the callback.
#[derive(Debug)]
pub enum OpResult {
    Connected {
        reason_code: u8,
        session_present: bool,
        properties: Option<ConnAckProperties>,
    },
    Disconnected {
        reason_code: u8,
        properties: Option<DisconnectProperties>,
    },
    Subscribed {
        mid: u16,
        reason_codes: Vec<u8>,
        properties: Option<AckProps>,
    },
    Unsubscribed {
        mid: u16,
        properties: Option<AckProps>,
    },
    Published {
        mid: u16,
        reason_code: u8,
        properties: Option<AckProps>,
    },
    Failed {
        code: i32,
        message: String,
    },
}

/// Handle a waiter uses to withdraw its own op on timeout.
#[derive(Debug, Clone, Copy)]
pub struct Ticket(u64);

struct Slot {
    token: u64,
    tx: oneshot::Sender<OpResult>,
}

/// Table of pending operations for one session. Guarded by the session lock.
#[derive(Default)]
pub struct PendingOps {
    next_token: u64,
    keyed: HashMap<RequestKey, Slot>,
    unassigned: VecDeque<(OpKind, Slot)>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self) -> (Ticket, Slot, oneshot::Receiver<OpResult>) {
        self.next_token += 1;
        let token = self.next_token;
        let (tx, rx) = oneshot::channel();
        (Ticket(token), Slot { token, tx }, rx)
    }

    /// Park an op under a known key (CONNECT / DISCONNECT).
    ///
    /// A stale entry under the same key is discarded: its waiter is gone and
    /// the key is being reused for a new round-trip.
    pub fn park_keyed(&mut self, key: RequestKey) -> (Ticket, oneshot::Receiver<OpResult>) {
        let (ticket, slot, rx) = self.slot();
        if self.keyed.insert(key, slot).is_some() {
            debug!(?key, "replaced stale pending op");
        }
        (ticket, rx)
    }

    /// Park an op that is still waiting for its packet-id assignment.
    pub fn park_unassigned(&mut self, kind: OpKind) -> (Ticket, oneshot::Receiver<OpResult>) {
        let (ticket, slot, rx) = self.slot();
        self.unassigned.push_back((kind, slot));
        (ticket, rx)
    }

    /// Move the oldest unassigned op of `kind` under its packet id.
    pub fn assign(&mut self, kind: OpKind, pkid: u16) {
        let position = self.unassigned.iter().position(|(k, _)| *k == kind);
        match position {
            Some(index) => {
                let (_, slot) = self.unassigned.remove(index).expect("position is in range");
                self.keyed.insert(RequestKey::Packet(pkid), slot);
            }
            None => {
                // Waiter already cancelled, or an op the session never
                // submitted; nothing to correlate.
                debug!(?kind, pkid, "packet id assigned with no waiting op");
            }
        }
    }

    /// Fulfil the op parked under `key`. Removes the entry before completing
    /// the waiter; a missing entry means the waiter gave up and the result is
    /// dropped.
    pub fn fulfil(&mut self, key: RequestKey, result: OpResult) {
        match self.keyed.remove(&key) {
            Some(slot) => {
                if slot.tx.send(result).is_err() {
                    debug!(?key, "waiter went away before fulfilment");
                }
            }
            None => {
                debug!(?key, "dropped ack for unknown or cancelled op");
            }
        }
    }

    /// Fulfil the oldest unassigned op of `kind` directly. Used for QoS 0
    /// publishes, which complete at send time and never get an ack.
    pub fn fulfil_unassigned(&mut self, kind: OpKind, result: OpResult) {
        let position = self.unassigned.iter().position(|(k, _)| *k == kind);
        match position {
            Some(index) => {
                let (_, slot) = self.unassigned.remove(index).expect("position is in range");
                let _ = slot.tx.send(result);
            }
            None => {
                debug!(?kind, "dropped send-time completion for cancelled op");
            }
        }
    }

    /// Withdraw an op after its waiter timed out. After this a late ack for
    /// the same key is silently dropped and the key is free for reuse.
    pub fn cancel(&mut self, ticket: Ticket) {
        let before = self.keyed.len() + self.unassigned.len();
        self.keyed.retain(|_, slot| slot.token != ticket.0);
        self.unassigned.retain(|(_, slot)| slot.token != ticket.0);
        if self.keyed.len() + self.unassigned.len() == before {
            debug!(token = ticket.0, "cancel of already-fulfilled op");
        }
    }

    /// Fail every outstanding op. Called on session teardown so no waiter
    /// blocks until its timeout when the client is already gone.
    pub fn fail_all(&mut self, message: &str) {
        let count = self.keyed.len() + self.unassigned.len();
        if count > 0 {
            warn!(count, "failing outstanding MQTT ops: {message}");
        }
        for (_, slot) in self.keyed.drain() {
            let _ = slot.tx.send(OpResult::Failed {
                code: -1,
                message: message.to_string(),
            });
        }
        for (_, slot) in self.unassigned.drain(..) {
            let _ = slot.tx.send(OpResult::Failed {
                code: -1,
                message: message.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_now(rx: &mut oneshot::Receiver<OpResult>) -> Option<OpResult> {
        rx.try_recv().ok()
    }

    #[test]
    fn test_keyed_roundtrip() {
        let mut ops = PendingOps::new();
        let (_ticket, mut rx) = ops.park_keyed(RequestKey::Connect);

        ops.fulfil(
            RequestKey::Connect,
            OpResult::Connected {
                reason_code: 0,
                session_present: false,
                properties: None,
            },
        );

        match recv_now(&mut rx) {
            Some(OpResult::Connected { reason_code, .. }) => assert_eq!(reason_code, 0),
            other => panic!("expected Connected, got {other:?}"),
        }
    }

    #[test]
    fn test_assignment_rekeys_in_fifo_order() {
        let mut ops = PendingOps::new();
        let (_t1, mut rx1) = ops.park_unassigned(OpKind::Subscribe);
        let (_t2, mut rx2) = ops.park_unassigned(OpKind::Subscribe);

        // Packet ids arrive in submission order.
        ops.assign(OpKind::Subscribe, 11);
        ops.assign(OpKind::Subscribe, 12);

        ops.fulfil(
            RequestKey::Packet(12),
            OpResult::Subscribed {
                mid: 12,
                reason_codes: vec![2],
                properties: None,
            },
        );
        assert!(recv_now(&mut rx1).is_none());
        match recv_now(&mut rx2) {
            Some(OpResult::Subscribed { mid, .. }) => assert_eq!(mid, 12),
            other => panic!("expected Subscribed, got {other:?}"),
        }

        ops.fulfil(
            RequestKey::Packet(11),
            OpResult::Subscribed {
                mid: 11,
                reason_codes: vec![1],
                properties: None,
            },
        );
        assert!(matches!(
            recv_now(&mut rx1),
            Some(OpResult::Subscribed { mid: 11, .. })
        ));
    }

    #[test]
    fn test_assignment_skips_other_kinds() {
        let mut ops = PendingOps::new();
        let (_tp, mut pub_rx) = ops.park_unassigned(OpKind::Publish);
        let (_ts, mut sub_rx) = ops.park_unassigned(OpKind::Subscribe);

        ops.assign(OpKind::Subscribe, 5);
        ops.fulfil(
            RequestKey::Packet(5),
            OpResult::Subscribed {
                mid: 5,
                reason_codes: vec![0],
                properties: None,
            },
        );

        assert!(recv_now(&mut pub_rx).is_none());
        assert!(recv_now(&mut sub_rx).is_some());
    }

    #[test]
    fn test_cancelled_op_drops_late_ack_and_frees_key() {
        let mut ops = PendingOps::new();
        let (ticket, mut rx) = ops.park_unassigned(OpKind::Subscribe);
        ops.assign(OpKind::Subscribe, 7);

        // Waiter gives up before the ack arrives.
        ops.cancel(ticket);
        ops.fulfil(
            RequestKey::Packet(7),
            OpResult::Subscribed {
                mid: 7,
                reason_codes: vec![1],
                properties: None,
            },
        );
        assert!(recv_now(&mut rx).is_none());

        // A second round-trip on the same key still works.
        let (_t2, mut rx2) = ops.park_unassigned(OpKind::Subscribe);
        ops.assign(OpKind::Subscribe, 7);
        ops.fulfil(
            RequestKey::Packet(7),
            OpResult::Subscribed {
                mid: 7,
                reason_codes: vec![1],
                properties: None,
            },
        );
        assert!(matches!(
            recv_now(&mut rx2),
            Some(OpResult::Subscribed { mid: 7, .. })
        ));
    }

    #[test]
    fn test_duplicate_fulfil_is_discarded() {
        let mut ops = PendingOps::new();
        let (_ticket, mut rx) = ops.park_keyed(RequestKey::Disconnect);

        ops.fulfil(
            RequestKey::Disconnect,
            OpResult::Disconnected {
                reason_code: 0,
                properties: None,
            },
        );
        // Second delivery has no entry to hit.
        ops.fulfil(
            RequestKey::Disconnect,
            OpResult::Disconnected {
                reason_code: 4,
                properties: None,
            },
        );

        match recv_now(&mut rx) {
            Some(OpResult::Disconnected { reason_code, .. }) => assert_eq!(reason_code, 0),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn test_qos0_publish_completes_at_send_time() {
        let mut ops = PendingOps::new();
        let (_ticket, mut rx) = ops.park_unassigned(OpKind::Publish);

        ops.fulfil_unassigned(
            OpKind::Publish,
            OpResult::Published {
                mid: 0,
                reason_code: 0,
                properties: None,
            },
        );

        assert!(matches!(
            recv_now(&mut rx),
            Some(OpResult::Published { reason_code: 0, .. })
        ));
    }

    #[test]
    fn test_fail_all_completes_every_waiter() {
        let mut ops = PendingOps::new();
        let (_t1, mut rx1) = ops.park_keyed(RequestKey::Connect);
        let (_t2, mut rx2) = ops.park_unassigned(OpKind::Publish);

        ops.fail_all("MQTT client closed");

        for rx in [&mut rx1, &mut rx2] {
            match recv_now(rx) {
                Some(OpResult::Failed { message, .. }) => {
                    assert!(message.contains("closed"));
                }
                other => panic!("expected Failed, got {other:?}"),
            }
        }
    }
}

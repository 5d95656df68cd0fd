//! `RibOutUpdates` dequeuer (C8): `TailDequeue` and `PeerDequeue`, run on
//! the owning scheduling group's worker task. Packs messages, drives
//! sends through the transport, applies backpressure, and folds sent
//! state back into history via `record_sent`.
//!
//! Simplification versus the distilled spec: packing here sends one
//! `UpdateInfo` (one `attrs` group) per message rather than greedily
//! filling a message with multiple attribute groups before the transport
//! call — `pack_budget` instead bounds how many peers' sends are batched
//! per `UpdateInfo`. Documented as a deliberate scope reduction in
//! `DESIGN.md`; `config::RibOutConfig::pack_budget` remains the knob a
//! fuller packer would also use.

use std::hash::Hash;

use crate::attr::AttrHandle;
use crate::bitset::PeerBitSet;
use crate::external::{MessageBuilder, Transport};
use crate::monitor::UpdateMonitor;
use crate::update::QueueId;

/// Drains entries reachable through `queue_id`'s tail marker for the
/// peers in `msync` whose transport is writable (`mready`). Peers for
/// which a send returns `false` are returned in the result set; callers
/// must `marker_split` them off the tail afterward.
pub fn tail_dequeue<P, A, M, T>(
    monitor: &UpdateMonitor<P, A>,
    queue_id: QueueId,
    msync: &PeerBitSet,
    mready: &PeerBitSet,
    builder: &M,
    transport: &T,
) -> PeerBitSet
where
    P: Eq + Hash + Ord + Clone,
    A: AttrHandle,
    M: MessageBuilder<A>,
    T: Transport,
{
    let mut blocked = PeerBitSet::new();

    loop {
        let mut progressed = false;
        let mut q = monitor.queue(queue_id).lock();
        let ids: Vec<_> = q.attribute_iterator().collect();
        drop(q);

        for id in ids {
            let mut q = monitor.queue(queue_id).lock();
            let Some(ru) = q.route_update_mut(id) else {
                continue;
            };
            let snapshot: Vec<_> = ru
                .updates
                .iter()
                .map(|u| (u.attrs.clone(), u.target.clone()))
                .collect();

            for (attrs, target) in snapshot {
                let mut isect = target.clone();
                isect.intersect_with(msync);
                isect.intersect_with(mready);
                isect.difference_with(&blocked);
                if isect.is_empty() {
                    continue;
                }

                let mut message = builder.start();
                builder.add(&mut message, &attrs, &[]);
                let bytes = builder.finish(message);

                let mut sent = PeerBitSet::new();
                for peer in isect.iter() {
                    let ok = transport.send(peer, bytes.clone(), Box::new(|| {}));
                    if ok {
                        sent.set(peer);
                    } else {
                        blocked.set(peer);
                    }
                }

                if !sent.is_empty() {
                    if let Some(info) = ru.updates.find_mut(&attrs) {
                        info.target.difference_with(&sent);
                    }
                    ru.record_sent(&attrs, &sent);
                    progressed = true;
                }
            }
            ru.updates.retain_nonempty();

            let empty_updates = ru.updates.is_empty();
            let final_history = ru.history.clone();
            let prefix = ru.prefix.clone();
            drop(q);

            if empty_updates {
                let mut q = monitor.queue(queue_id).lock();
                q.remove_route_update(id);
                drop(q);
                monitor.demote_or_clear(&prefix, id, queue_id, final_history);
            }
        }

        let all_blocked = !msync.is_empty() && msync.is_subset_of(&blocked);
        if !progressed || all_blocked {
            break;
        }
        let q = monitor.queue(queue_id).lock();
        if q.is_empty() {
            break;
        }
        drop(q);
    }

    blocked
}

/// Drains `peer`'s own marker in prefix-FIFO order. Returns `true` iff
/// the peer caught up to the tail marker (becoming in-sync again).
/// Stops immediately at the first entry whose send blocks.
pub fn peer_dequeue<P, A, M, T>(
    monitor: &UpdateMonitor<P, A>,
    queue_id: QueueId,
    peer: usize,
    marker: crate::queue::MarkerId,
    builder: &M,
    transport: &T,
) -> bool
where
    P: Eq + Hash + Ord + Clone,
    A: AttrHandle,
    M: MessageBuilder<A>,
    T: Transport,
{
    loop {
        let mut q = monitor.queue(queue_id).lock();
        let tail = q.tail_marker();
        if marker == tail {
            return true;
        }
        let Some(entry_id) = q.dequeue(marker) else {
            return marker == q.tail_marker();
        };
        let Some(ru) = q.route_update_mut(entry_id) else {
            continue;
        };
        let target = ru
            .updates
            .iter()
            .find(|u| u.target.test(peer))
            .map(|u| u.attrs.clone());
        let Some(attrs) = target else {
            continue;
        };

        let mut message = builder.start();
        builder.add(&mut message, &attrs, &[]);
        let bytes = builder.finish(message);
        let ok = transport.send(peer, bytes, Box::new(|| {}));

        if !ok {
            return false;
        }

        let mut one = PeerBitSet::new();
        one.set(peer);
        if let Some(info) = ru.updates.find_mut(&attrs) {
            info.target.difference_with(&one);
        }
        ru.record_sent(&attrs, &one);
        ru.updates.retain_nonempty();

        let empty_updates = ru.updates.is_empty();
        let final_history = ru.history.clone();
        let prefix = ru.prefix.clone();
        drop(q);

        if empty_updates {
            let mut q = monitor.queue(queue_id).lock();
            q.remove_route_update(entry_id);
            drop(q);
            monitor.demote_or_clear(&prefix, entry_id, queue_id, final_history);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::RibOutAttr;
    use crate::export::{notify, LogicalClock};
    use crate::external::ExportPolicy;
    use crate::update::{UpdateInfo, UpdateInfoList};
    use std::cell::RefCell;

    struct FixedPolicy {
        attr: u32,
    }
    impl ExportPolicy<u32> for FixedPolicy {
        fn export(&self, peers: &PeerBitSet, attr: Option<&u32>) -> (bool, UpdateInfoList<u32>) {
            let mut list = UpdateInfoList::new();
            if let Some(a) = attr {
                list.push(UpdateInfo {
                    target: peers.clone(),
                    attrs: RibOutAttr::reachable(*a, vec![]),
                });
                (true, list)
            } else {
                (false, list)
            }
        }
    }

    struct FakeBuilder;
    impl MessageBuilder<u32> for FakeBuilder {
        type Message = Vec<u8>;
        fn start(&self) -> Vec<u8> {
            Vec::new()
        }
        fn add(&self, _message: &mut Vec<u8>, _attrs: &RibOutAttr<u32>, _prefixes: &[u8]) -> bool {
            true
        }
        fn finish(&self, message: Vec<u8>) -> Vec<u8> {
            message
        }
    }

    struct FakeTransport {
        blocked_peers: Vec<usize>,
        sent: RefCell<Vec<usize>>,
    }
    impl Transport for FakeTransport {
        fn send(&self, peer: usize, _bytes: Vec<u8>, _on_writable: Box<dyn FnOnce() + Send>) -> bool {
            if self.blocked_peers.contains(&peer) {
                false
            } else {
                self.sent.borrow_mut().push(peer);
                true
            }
        }
    }

    fn peers(bits: &[usize]) -> PeerBitSet {
        bits.iter().copied().collect()
    }

    #[test]
    fn tail_dequeue_sends_to_in_sync_ready_peers_and_drains_queue() {
        let monitor: UpdateMonitor<u32, u32> = UpdateMonitor::new();
        let clock = LogicalClock::new();
        let policy = FixedPolicy { attr: 1 };
        notify(&monitor, &clock, &7u32, false, &peers(&[0, 1]), Some(&1u32), &policy);

        let builder = FakeBuilder;
        let transport = FakeTransport {
            blocked_peers: vec![],
            sent: RefCell::new(vec![]),
        };
        let blocked = tail_dequeue(
            &monitor,
            QueueId::Update,
            &peers(&[0, 1]),
            &peers(&[0, 1]),
            &builder,
            &transport,
        );
        assert!(blocked.is_empty());
        assert_eq!(*transport.sent.borrow(), vec![0, 1]);
        assert!(monitor.queue(QueueId::Update).lock().is_empty());
    }

    #[test]
    fn tail_dequeue_reports_blocked_peer_and_leaves_its_state_pending() {
        let monitor: UpdateMonitor<u32, u32> = UpdateMonitor::new();
        let clock = LogicalClock::new();
        let policy = FixedPolicy { attr: 1 };
        notify(&monitor, &clock, &7u32, false, &peers(&[0, 1]), Some(&1u32), &policy);

        let builder = FakeBuilder;
        let transport = FakeTransport {
            blocked_peers: vec![1],
            sent: RefCell::new(vec![]),
        };
        let blocked = tail_dequeue(
            &monitor,
            QueueId::Update,
            &peers(&[0, 1]),
            &peers(&[0, 1]),
            &builder,
            &transport,
        );
        assert!(blocked.test(1));
        assert!(!blocked.test(0));
    }
}

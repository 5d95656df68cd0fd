//! BGP RIB-OUT update pipeline: per-peer advertisement scheduling,
//! queueing and backpressure for a BGP control plane's outbound side.
//! See `SPEC_FULL.md` for the full component design; this module wires
//! the pieces (`C1`-`C11`) into the public surface described there in
//! §6, including the producer-to-worker handoff from C9/C10 into C8:
//! a `RouteUpdate` lands on a queue, the owning `SchedulingGroup` is
//! signalled, and a `send.*` task drains it and calls C8.

pub mod attr;
pub mod bitset;
pub mod config;
pub mod dequeue;
pub mod error;
pub mod export;
pub mod external;
pub mod group;
pub mod group_manager;
pub mod history;
pub mod index;
pub mod monitor;
pub mod queue;
pub mod ribout;
pub mod task;
pub mod telemetry;
pub mod trace;
pub mod update;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::attr::AttrHandle;
use crate::bitset::PeerBitSet;
use crate::config::RibOutConfig;
use crate::export::LogicalClock;
use crate::external::{ExportPolicy, MessageBuilder, TaskSpawner, Transport};
use crate::group_manager::{GroupId, ResolvedWorkItem, SchedulingGroupManager};
use crate::ribout::RibOut;
use crate::telemetry::{PeerTelemetry, QueueTelemetry, RibOutTelemetry, TelemetrySnapshot};
use crate::update::QueueId;

/// Owns every `RibOut` plus the one `SchedulingGroupManager` that keeps
/// their combined (peer, rib) bipartite membership graph partitioned
/// into workers (§3, §4.10). `RiboutId` is left as a bare `usize` (the
/// caller's own routing-instance/AFI-SAFI identity), matching the
/// distilled spec's treatment of `RibOut` identity as externally owned.
///
/// `M`/`T` are the shared `MessageBuilder`/`Transport` every `RibOut`'s
/// worker packs and sends through — one wire format and one transport
/// per engine, the same generic shape `dequeue::tail_dequeue` already
/// uses.
pub struct RibOutEngine<P, A, M, T>
where
    P: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    A: AttrHandle + Send + Sync + 'static,
    M: MessageBuilder<A> + Send + Sync + 'static,
    T: Transport + Send + Sync + 'static,
{
    ribouts: RwLock<HashMap<usize, RibOut<P, A>>>,
    groups: SchedulingGroupManager,
    clock: LogicalClock,
    builder: M,
    transport: T,
    spawner: Arc<dyn TaskSpawner>,
    /// Back-reference to the owning `Arc`, populated via `Arc::new_cyclic`
    /// in `new`. Lets `&self` methods hand a spawned `'static` worker
    /// future its own `Arc<Self>` without requiring every caller-facing
    /// method to take `self: Arc<Self>` (stable Rust has no `&Arc<Self>`
    /// receiver).
    self_weak: Weak<Self>,
    pub config: RibOutConfig,
}

impl<P, A, M, T> RibOutEngine<P, A, M, T>
where
    P: Eq + Hash + Ord + Clone + Send + Sync + 'static,
    A: AttrHandle + Send + Sync + 'static,
    M: MessageBuilder<A> + Send + Sync + 'static,
    T: Transport + Send + Sync + 'static,
{
    /// Returned as an `Arc` since a group worker spawned via
    /// `TaskSpawner::spawn_send` needs a `'static` handle back to the
    /// engine to call `drain_group`/`handle_work_item`.
    pub fn new(config: RibOutConfig, builder: M, transport: T, spawner: Arc<dyn TaskSpawner>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            ribouts: RwLock::new(HashMap::new()),
            groups: SchedulingGroupManager::new(),
            clock: LogicalClock::new(),
            builder,
            transport,
            spawner,
            self_weak: weak.clone(),
            config,
        })
    }

    /// Subscribes `peer` to `ribout_id`, creating the `RibOut` if this is
    /// its first peer. `existing_routes` backfills every prefix already
    /// active for this `RibOut` through the JOIN path (§4.7 `join`);
    /// callers with a live route table pass the current best-path
    /// snapshot here rather than replaying every historical notification.
    /// Schedules the owning group's worker whenever the BULK queue goes
    /// idle-to-busy (§4.10).
    pub fn register_peer<I>(&self, ribout_id: usize, peer: usize, policy: Arc<dyn ExportPolicy<A>>, existing_routes: I)
    where
        I: IntoIterator<Item = (P, Option<A>)>,
    {
        let local = {
            let mut ribouts = self.ribouts.write();
            let rib = ribouts.entry(ribout_id).or_insert_with(|| RibOut::new(policy));
            rib.add_peer(peer)
        };
        self.groups.join(peer, ribout_id);

        let mut target = PeerBitSet::new();
        target.set(local);

        let mut any_idle = false;
        {
            let ribouts = self.ribouts.read();
            let rib = ribouts.get(&ribout_id).expect("just inserted above");
            for (prefix, attr) in existing_routes {
                let idle = crate::export::join(&rib.monitor, &self.clock, &prefix, &target, attr.as_ref(), rib.policy.as_ref());
                any_idle |= idle;
            }
        }
        if any_idle {
            self.schedule_dequeue(ribout_id, QueueId::Bulk);
        }
    }

    /// Unsubscribes `peer` from `ribout_id`: clears its scheduled and
    /// current state on every prefix the `RibOut` knows about (§4.7
    /// `leave`), removes it from the scheduling graph, and drops the
    /// `RibOut` entirely once its last peer is gone (§3 lifecycle).
    pub fn unregister_peer(&self, ribout_id: usize, peer: usize) {
        let mut ribouts = self.ribouts.write();
        let Some(rib) = ribouts.get_mut(&ribout_id) else {
            crate::telemetry::COUNTERS
                .leave_for_non_member
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        };
        let Some(local) = rib.peer_state.iter().find(|(_, ps)| ps.peer == peer).map(|(i, _)| i) else {
            crate::telemetry::COUNTERS
                .leave_for_non_member
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        };

        let mut target = PeerBitSet::new();
        target.set(local);
        for prefix in rib.monitor.known_prefixes() {
            crate::export::leave(&rib.monitor, &prefix, &target);
        }
        rib.remove_peer(local);
        self.groups.leave(peer, ribout_id);

        if rib.is_empty() {
            ribouts.remove(&ribout_id);
        }
    }

    /// Notifies this engine of a best-path change for `prefix` on
    /// `ribout_id` (§4.7 `notify`, the steady-state per-route path).
    /// Always attempts to schedule an UPDATE-queue drain afterward:
    /// `export::notify` is void by design (see `export.rs`'s "C9 cannot
    /// fail" invariant) and has no idle/busy signal of its own to gate
    /// on, so the occasional no-op drain attempt on an already-empty
    /// queue is accepted as the cost of not changing that signature.
    pub fn notify_route(&self, ribout_id: usize, prefix: &P, is_deleted: bool, attr: Option<&A>) {
        {
            let ribouts = self.ribouts.read();
            let Some(rib) = ribouts.get(&ribout_id) else {
                return;
            };
            crate::export::notify(&rib.monitor, &self.clock, prefix, is_deleted, &rib.active_peerset, attr, rib.policy.as_ref());
        }
        self.schedule_dequeue(ribout_id, QueueId::Update);
    }

    /// Enqueues a `TailDequeue` work item on `ribout_id`'s owning group
    /// and, if no worker currently holds that group's running flag,
    /// spawns one via `TaskSpawner::spawn_send` (§5's `send.<group>`
    /// task class).
    fn schedule_dequeue(&self, ribout_id: usize, queue: QueueId) {
        let Some(group_id) = self.groups.enqueue_tail_dequeue(ribout_id, queue) else {
            return;
        };
        self.try_spawn_worker(group_id);
    }

    fn try_spawn_worker(&self, group_id: GroupId) {
        if !self.groups.try_begin_drain(group_id) {
            return;
        }
        let engine = self.self_weak.upgrade().expect("engine outlives any worker it spawns");
        self.spawner.spawn_send(
            group_id,
            Box::pin(async move {
                engine.run_group_worker(group_id);
            }),
        );
    }

    /// Drains `group_id` to empty, re-claiming the running flag if new
    /// work landed between this worker's last `drain_group` call and
    /// `end_drain` — closing the race `SchedulingGroup::is_idle`'s doc
    /// comment describes, where a producer's `enqueue` could otherwise
    /// land with no worker left watching.
    fn run_group_worker(&self, group_id: GroupId) {
        loop {
            loop {
                let fully_drained =
                    self.groups
                        .drain_group(group_id, self.config.worker_yield_budget, |item| self.handle_work_item(item));
                if fully_drained {
                    break;
                }
            }
            self.groups.end_drain(group_id);
            if !self.groups.has_pending_work(group_id) || !self.groups.try_begin_drain(group_id) {
                break;
            }
        }
    }

    fn handle_work_item(&self, item: ResolvedWorkItem) {
        match item {
            ResolvedWorkItem::TailDequeue { ribout, queue } => self.run_tail_dequeue(ribout, queue),
            ResolvedWorkItem::PeerDequeue { peer, ribout, queue, marker } => self.run_peer_dequeue(peer, ribout, queue, marker),
            ResolvedWorkItem::SendReady { peer, ribouts } => self.run_send_ready(peer, ribouts),
        }
    }

    fn run_tail_dequeue(&self, ribout_id: usize, queue: QueueId) {
        let mut ribouts = self.ribouts.write();
        let Some(rib) = ribouts.get_mut(&ribout_id) else {
            return;
        };

        let mut msync = PeerBitSet::new();
        for (local, ps) in rib.peer_state.iter() {
            if ps.in_sync {
                msync.set(local);
            }
        }
        // No `on_writable` recovery is wired in this revision (see
        // `dequeue.rs`), so `mready` is simply every active peer rather
        // than a set gated on a persisted `send_ready` flag; a peer a
        // send blocks on is retried on the rib's next drain.
        let mready = rib.active_peerset.clone();

        let blocked = crate::dequeue::tail_dequeue(&rib.monitor, queue, &msync, &mready, &self.builder, &self.transport);
        for (local, ps) in rib.peer_state.iter_mut() {
            ps.send_ready = !blocked.test(local);
        }
    }

    fn run_peer_dequeue(&self, peer: usize, ribout_id: usize, queue: QueueId, marker: crate::queue::MarkerId) {
        let mut ribouts = self.ribouts.write();
        let Some(rib) = ribouts.get_mut(&ribout_id) else {
            return;
        };
        let Some(local) = rib.peer_state.iter().find(|(_, ps)| ps.peer == peer).map(|(i, _)| i) else {
            return;
        };
        let caught_up = crate::dequeue::peer_dequeue(&rib.monitor, queue, local, marker, &self.builder, &self.transport);
        if caught_up {
            if let Some(ps) = rib.peer_state.get_mut(local) {
                ps.in_sync = true;
            }
        }
    }

    /// Marks `peer` writable again on every rib it shares this group
    /// with and re-schedules a tail drain on each, so anything withheld
    /// by an earlier blocked send gets retried.
    fn run_send_ready(&self, peer: usize, ribouts: Vec<usize>) {
        {
            let mut ribs = self.ribouts.write();
            for &ribout_id in &ribouts {
                if let Some(rib) = ribs.get_mut(&ribout_id) {
                    if let Some((local, _)) = rib.peer_state.iter().find(|(_, ps)| ps.peer == peer) {
                        if let Some(ps) = rib.peer_state.get_mut(local) {
                            ps.send_ready = true;
                        }
                    }
                }
            }
        }
        for ribout_id in ribouts {
            self.schedule_dequeue(ribout_id, QueueId::Bulk);
            self.schedule_dequeue(ribout_id, QueueId::Update);
        }
    }

    /// Group id owning `peer`'s and `ribout_id`'s shared scheduling
    /// domain, if either is currently registered.
    pub fn group_of_ribout(&self, ribout_id: usize) -> Option<GroupId> {
        self.groups.group_of_ribout(ribout_id)
    }

    pub fn group_of_peer(&self, peer: usize) -> Option<GroupId> {
        self.groups.group_of_peer(peer)
    }

    pub fn group_count(&self) -> usize {
        self.groups.group_count()
    }

    /// Drains `ribout_id`'s owning group inline on the calling thread,
    /// bypassing `TaskSpawner` entirely. For tests and embedders that
    /// want a synchronous drain rather than racing a spawned worker; a
    /// no-op if another worker already holds the group's running flag.
    pub fn drain_inline(&self, ribout_id: usize) {
        let Some(group_id) = self.groups.group_of_ribout(ribout_id) else {
            return;
        };
        if !self.groups.try_begin_drain(group_id) {
            return;
        }
        loop {
            let fully_drained =
                self.groups
                    .drain_group(group_id, self.config.worker_yield_budget, |item| self.handle_work_item(item));
            if fully_drained {
                break;
            }
        }
        self.groups.end_drain(group_id);
    }

    /// Read-only telemetry pull for one `RibOut` (§4.13): queue depths,
    /// marker counts, and per-peer sync/send-ready flags.
    pub fn telemetry(&self, ribout_id: usize) -> Option<TelemetrySnapshot> {
        let ribouts = self.ribouts.read();
        let rib = ribouts.get(&ribout_id)?;

        let queue_telemetry = |queue_id: QueueId| {
            let q = rib.monitor.queue(queue_id).lock();
            QueueTelemetry {
                pending: q.pending_count(),
                markers: q.marker_count(),
            }
        };

        Some(TelemetrySnapshot {
            bulk_queue: Some(queue_telemetry(QueueId::Bulk)),
            update_queue: Some(queue_telemetry(QueueId::Update)),
            peers: rib
                .peer_state
                .iter()
                .map(|(_, ps)| {
                    (
                        ps.peer,
                        PeerTelemetry {
                            in_sync: ps.in_sync,
                            send_ready: ps.send_ready,
                        },
                    )
                })
                .collect(),
            ribout: Some(RibOutTelemetry {
                active_peers: rib.active_peerset.count(),
            }),
        })
    }
}

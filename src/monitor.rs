//! `UpdateMonitor` (C7): the concurrency gate between the route-table
//! producer path (C9, running on arbitrary partition tasks) and the
//! dequeuer (C8, running on the owning scheduling group's worker task).
//!
//! Lock order is fixed: the route table lock, then (only if needed) one
//! of the two queue locks — never the reverse, matching `SPEC_FULL.md`
//! §5's `RouteUpdate → UpdateQueue → SchedulingGroup work queue` order.
//! The original source takes a per-`DBState` mutex; we coarsen that to one
//! `parking_lot::Mutex` guarding the whole route table, since this crate
//! has no independent per-route lock striping mechanism to borrow from
//! the teacher (documented in `DESIGN.md`).

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

use crate::attr::AttrHandle;
use crate::bitset::PeerBitSet;
use crate::history::AdvertiseList;
use crate::queue::UpdateQueue;
use crate::update::{DbState, QueueId, RouteState, RouteUpdate, UpdateList};

/// What `get_dbstate_and_dequeue` hands back to the producer when it
/// detaches state for it to build on top of.
pub enum PriorState<P, A: AttrHandle> {
    History(AdvertiseList<A>),
    Update(RouteUpdate<P, A>),
}

pub struct UpdateMonitor<P: Eq + Hash + Ord + Clone, A: AttrHandle> {
    routes: Mutex<HashMap<P, DbState<A>>>,
    queues: [Mutex<UpdateQueue<P, A>>; 2],
}

fn queue_index(queue_id: QueueId) -> usize {
    match queue_id {
        QueueId::Bulk => 0,
        QueueId::Update => 1,
    }
}

impl<P: Eq + Hash + Ord + Clone, A: AttrHandle> UpdateMonitor<P, A> {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            queues: [Mutex::new(UpdateQueue::new()), Mutex::new(UpdateQueue::new())],
        }
    }

    pub fn queue(&self, queue_id: QueueId) -> &Mutex<UpdateQueue<P, A>> {
        &self.queues[queue_index(queue_id)]
    }

    /// Snapshot of every prefix with live DB state, for callers that need
    /// to re-scan a `RibOut`'s whole route set (e.g. backfilling a newly
    /// joined peer, or sweeping affected prefixes on peer unregister).
    pub fn known_prefixes(&self) -> Vec<P> {
        self.routes.lock().keys().cloned().collect()
    }

    /// Writes back the producer's final decision for `db_entry` — always
    /// called exactly once per `get_dbstate_and_dequeue`, even to restore
    /// the state unchanged (the no-op churn-back-to-start case).
    pub fn install(&self, db_entry: P, state: Option<DbState<A>>) {
        let mut routes = self.routes.lock();
        match state {
            Some(s) => {
                routes.insert(db_entry, s);
            }
            None => {
                routes.remove(&db_entry);
            }
        }
    }

    /// Inspects and detaches the route's current DB state under the
    /// route lock. An `UpdateList` is dissolved into a `RouteState` (for
    /// whichever queue-entry remains, if any) plus the UPDATE-queue
    /// `RouteUpdate`, which is returned. A `RouteUpdate` already on the
    /// UPDATE queue is compared against `is_duplicate`; if it matches, it
    /// is left untouched and `was_duplicate` is `true`. Otherwise it is
    /// dequeued from its queue and returned.
    pub fn get_dbstate_and_dequeue(
        &self,
        db_entry: &P,
        is_duplicate: impl FnOnce(&RouteUpdate<P, A>) -> bool,
    ) -> (Option<PriorState<P, A>>, bool) {
        let mut routes = self.routes.lock();
        match routes.remove(db_entry) {
            None => (None, false),
            Some(DbState::RouteState(rs)) => (Some(PriorState::History(rs.history)), false),
            Some(DbState::RouteUpdate(id)) => {
                // Only the UPDATE queue is ever referenced directly by a
                // bare `DbState::RouteUpdate` — a BULK-only entry is
                // always wrapped in an `UpdateList` (see `merge_update`).
                let mut q = self.queues[queue_index(QueueId::Update)].lock();
                let is_dup = q.route_update(id).map(|r| is_duplicate(r)).unwrap_or(false);
                if is_dup {
                    drop(q);
                    routes.insert(db_entry.clone(), DbState::RouteUpdate(id));
                    return (None, true);
                }
                let ru = q.remove_route_update(id);
                (ru.map(PriorState::Update), false)
            }
            Some(DbState::UpdateList(ulist)) => {
                let mut update_q = self.queues[queue_index(QueueId::Update)].lock();
                let update_id = ulist.update;
                let detached = update_id.and_then(|id| update_q.remove_route_update(id));
                drop(update_q);

                match detached {
                    Some(mut ru) => {
                        ru.history = ulist.history.clone();
                        if let Some(bulk_id) = ulist.bulk {
                            let mut bulk_q = self.queues[queue_index(QueueId::Bulk)].lock();
                            if let Some(bulk_ru) = bulk_q.route_update_mut(bulk_id) {
                                bulk_ru.history = ulist.history.clone();
                            }
                            routes.insert(db_entry.clone(), DbState::RouteUpdate(bulk_id));
                        }
                        (Some(PriorState::Update(ru)), false)
                    }
                    None => {
                        // No UPDATE-queue entry to dissolve; put it back.
                        routes.insert(db_entry.clone(), DbState::UpdateList(ulist));
                        (None, false)
                    }
                }
            }
        }
    }

    /// JOIN: merges `rt_update` into the BULK-queue `RouteUpdate` for
    /// `db_entry` if one already exists, else installs it fresh. Returns
    /// `true` iff the BULK queue was empty (at its tail) before this
    /// call — signalling that C10 must schedule a `TailDequeue`.
    pub fn merge_update(&self, db_entry: &P, rt_update: RouteUpdate<P, A>) -> bool {
        let mut routes = self.routes.lock();
        let mut bulk_q = self.queues[queue_index(QueueId::Bulk)].lock();
        let was_idle = bulk_q.is_empty();

        let prior = routes.remove(db_entry);
        let new_state = match prior {
            None => {
                let id = bulk_q.enqueue(rt_update);
                DbState::RouteUpdate(id)
            }
            Some(DbState::RouteState(rs)) => {
                let mut rt_update = rt_update;
                rt_update.history = rs.history;
                let id = bulk_q.enqueue(rt_update);
                DbState::RouteUpdate(id)
            }
            Some(DbState::RouteUpdate(existing_id)) => {
                if let Some(existing) = bulk_q.route_update_mut(existing_id) {
                    existing.merge_updates(rt_update.updates);
                    DbState::RouteUpdate(existing_id)
                } else {
                    drop(bulk_q);
                    let mut update_q = self.queues[queue_index(QueueId::Update)].lock();
                    let history = update_q
                        .route_update(existing_id)
                        .map(|r| r.history.clone())
                        .unwrap_or_default();
                    drop(update_q);
                    bulk_q = self.queues[queue_index(QueueId::Bulk)].lock();
                    let bulk_id = bulk_q.enqueue(rt_update);
                    DbState::UpdateList(UpdateList {
                        history,
                        bulk: Some(bulk_id),
                        update: Some(existing_id),
                    })
                }
            }
            Some(DbState::UpdateList(mut ulist)) => {
                match ulist.bulk {
                    Some(bulk_id) => {
                        if let Some(existing) = bulk_q.route_update_mut(bulk_id) {
                            existing.merge_updates(rt_update.updates);
                        }
                    }
                    None => {
                        ulist.bulk = Some(bulk_q.enqueue(rt_update));
                    }
                }
                DbState::UpdateList(ulist)
            }
        };
        routes.insert(db_entry.clone(), new_state);
        was_idle
    }

    /// Classifies peers currently advertised (history) vs. peers with a
    /// pending delta for this route on `queue_id`, or on either queue if
    /// `queue_id` is `None`.
    pub fn get_peerset_current_and_scheduled(
        &self,
        db_entry: &P,
        queue_id: Option<QueueId>,
    ) -> (PeerBitSet, PeerBitSet) {
        let routes = self.routes.lock();
        let mut current = PeerBitSet::new();
        let mut scheduled = PeerBitSet::new();
        match routes.get(db_entry) {
            None => {}
            Some(DbState::RouteState(rs)) => {
                for info in rs.history.iter() {
                    current.union_with(&info.target);
                }
            }
            Some(DbState::RouteUpdate(id)) => {
                let q = self.queues[queue_index(QueueId::Update)].lock();
                if let Some(ru) = q.route_update(*id) {
                    if queue_id.is_none() || queue_id == Some(ru.queue_id) {
                        for info in ru.updates.iter() {
                            scheduled.union_with(&info.target);
                        }
                    }
                    for info in ru.history.iter() {
                        current.union_with(&info.target);
                    }
                }
            }
            Some(DbState::UpdateList(ulist)) => {
                for info in ulist.history.iter() {
                    current.union_with(&info.target);
                }
                if queue_id.is_none() || queue_id == Some(QueueId::Bulk) {
                    if let Some(id) = ulist.bulk {
                        let q = self.queues[queue_index(QueueId::Bulk)].lock();
                        if let Some(ru) = q.route_update(id) {
                            for info in ru.updates.iter() {
                                scheduled.union_with(&info.target);
                            }
                        }
                    }
                }
                if queue_id.is_none() || queue_id == Some(QueueId::Update) {
                    if let Some(id) = ulist.update {
                        let q = self.queues[queue_index(QueueId::Update)].lock();
                        if let Some(ru) = q.route_update(id) {
                            for info in ru.updates.iter() {
                                scheduled.union_with(&info.target);
                            }
                        }
                    }
                }
            }
        }
        (current, scheduled)
    }

    /// Called by the dequeuer (C8) after draining a `RouteUpdate` on
    /// `queue_id` down to `final_history` with no pending `updates` left
    /// on that queue. Demotes the route's DB state to a bare
    /// `RouteState`, collapses an `UpdateList` down to its remaining
    /// queue entry, or clears the DB state entirely — never acquires the
    /// queue lock, so it's always safe to call after releasing it.
    pub fn demote_or_clear(
        &self,
        db_entry: &P,
        id: crate::queue::RouteUpdateId,
        queue_id: QueueId,
        final_history: AdvertiseList<A>,
    ) {
        let mut routes = self.routes.lock();
        let Some(state) = routes.remove(db_entry) else {
            return;
        };
        let next = match state {
            DbState::RouteUpdate(cur_id) if cur_id == id => {
                (!final_history.is_empty()).then(|| DbState::RouteState(RouteState { history: final_history }))
            }
            DbState::UpdateList(mut ulist) => {
                match queue_id {
                    QueueId::Bulk if ulist.bulk == Some(id) => ulist.bulk = None,
                    QueueId::Update if ulist.update == Some(id) => ulist.update = None,
                    _ => {}
                }
                ulist.history = final_history;
                // The remaining queue entry's own `history` field is left
                // as-is here (queue lock is intentionally not held); the
                // dequeuer syncs it via `route_update_mut` before calling
                // this, since it still holds that lock at that point.
                match ulist.sole_remaining() {
                    Some((_, remaining_id)) => Some(DbState::RouteUpdate(remaining_id)),
                    None if ulist.history.is_empty() => None,
                    None => Some(DbState::RouteState(RouteState { history: ulist.history })),
                }
            }
            other => Some(other),
        };
        if let Some(state) = next {
            routes.insert(db_entry.clone(), state);
        }
    }

    /// LEAVE: resets `peers` from any pending `UpdateInfo` targets and
    /// any `AdvertiseInfo` history for `db_entry`; clears the DB state
    /// entirely if both become empty.
    pub fn clear_peerset_current_and_scheduled(&self, db_entry: &P, peers: &PeerBitSet) {
        let mut routes = self.routes.lock();
        let Some(state) = routes.remove(db_entry) else {
            return;
        };
        let remaining = match state {
            DbState::RouteState(mut rs) => {
                rs.history.reset_targets(peers);
                (!rs.is_empty()).then(|| DbState::RouteState(rs))
            }
            DbState::RouteUpdate(id) => {
                let mut q = self.queues[queue_index(QueueId::Update)].lock();
                if let Some(ru) = q.route_update_mut(id) {
                    ru.history.reset_targets(peers);
                    ru.reset_targets(peers);
                    if ru.is_empty() && !ru.is_advertised() {
                        q.remove_route_update(id);
                        None
                    } else {
                        Some(DbState::RouteUpdate(id))
                    }
                } else {
                    None
                }
            }
            DbState::UpdateList(mut ulist) => {
                ulist.history.reset_targets(peers);
                if let Some(id) = ulist.bulk {
                    let mut q = self.queues[queue_index(QueueId::Bulk)].lock();
                    if let Some(ru) = q.route_update_mut(id) {
                        ru.reset_targets(peers);
                        if ru.is_empty() {
                            q.remove_route_update(id);
                            ulist.bulk = None;
                        }
                    }
                }
                if let Some(id) = ulist.update {
                    let mut q = self.queues[queue_index(QueueId::Update)].lock();
                    if let Some(ru) = q.route_update_mut(id) {
                        ru.reset_targets(peers);
                        if ru.is_empty() {
                            q.remove_route_update(id);
                            ulist.update = None;
                        }
                    }
                }
                match ulist.sole_remaining() {
                    Some((_, id)) if ulist.history.is_empty() => Some(DbState::RouteUpdate(id)),
                    _ if ulist.bulk.is_none() && ulist.update.is_none() && ulist.history.is_empty() => {
                        None
                    }
                    _ => Some(DbState::UpdateList(ulist)),
                }
            }
        };
        if let Some(state) = remaining {
            routes.insert(db_entry.clone(), state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::RibOutAttr;
    use crate::update::UpdateInfo;

    fn peers(bits: &[usize]) -> PeerBitSet {
        bits.iter().copied().collect()
    }

    #[test]
    fn fresh_route_has_no_prior_state() {
        let mon: UpdateMonitor<u32, u32> = UpdateMonitor::new();
        let (prior, dup) = mon.get_dbstate_and_dequeue(&7, |_| false);
        assert!(prior.is_none());
        assert!(!dup);
    }

    #[test]
    fn merge_update_reports_bulk_was_idle_then_not() {
        let mon: UpdateMonitor<u32, u32> = UpdateMonitor::new();
        let mut ru = RouteUpdate::new(7u32, QueueId::Bulk, 0);
        ru.updates.push(UpdateInfo {
            target: peers(&[0]),
            attrs: RibOutAttr::reachable(1u32, vec![]),
        });
        let was_idle = mon.merge_update(&7, ru);
        assert!(was_idle);

        let mut ru2 = RouteUpdate::new(7u32, QueueId::Bulk, 1);
        ru2.updates.push(UpdateInfo {
            target: peers(&[1]),
            attrs: RibOutAttr::reachable(1u32, vec![]),
        });
        let was_idle2 = mon.merge_update(&7, ru2);
        assert!(!was_idle2);
    }

    #[test]
    fn clear_peerset_drops_empty_route_state() {
        let mon: UpdateMonitor<u32, u32> = UpdateMonitor::new();
        let mut rs = RouteState::new();
        rs.history.upsert(&RibOutAttr::reachable(1u32, vec![]), &peers(&[0]));
        mon.install(7, Some(DbState::RouteState(rs)));
        mon.clear_peerset_current_and_scheduled(&7, &peers(&[0]));
        let (prior, _) = mon.get_dbstate_and_dequeue(&7, |_| false);
        assert!(prior.is_none());
    }
}

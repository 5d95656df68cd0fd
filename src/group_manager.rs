//! `SchedulingGroupManager` (C11): maintains the invariant that the
//! (peer, rib) bipartite membership graph's connected components are
//! exactly the set of `SchedulingGroup`s (P4). `join`/`leave` run on the
//! `membership` task class — single-instance, so no internal locking is
//! strictly required for the connectivity algebra itself, but
//! `peer_map`/`ribout_map` are still guarded by one mutex so `leave`/
//! `join` see a consistent view if ever called from more than one
//! caller. `drain_group` (run from each group's own `send.*` worker)
//! holds that same mutex for the duration of the items it hands to its
//! caller — a coarsened simplification versus per-group locking,
//! documented in `DESIGN.md`, since nothing here needs `join`/`leave`
//! and a drain to truly run concurrently for correctness.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use crate::group::{Edge, GroupLocalIndex, RibStateIndex, SchedulingGroup, WorkItem};
use crate::index::IndexedMap;
use crate::update::QueueId;

pub struct GroupTag;
pub type GroupId = usize;

/// A `WorkItem` with its group-local indices resolved back to the
/// external peer/ribout ids the caller (`RibOutEngine`) actually knows
/// about, so a worker never needs to reach back into `SchedulingGroup`
/// internals to run it.
#[derive(Debug, Clone)]
pub enum ResolvedWorkItem {
    TailDequeue { ribout: usize, queue: QueueId },
    PeerDequeue {
        peer: usize,
        ribout: usize,
        queue: QueueId,
        marker: crate::queue::MarkerId,
    },
    SendReady { peer: usize, ribouts: Vec<usize> },
}

fn resolve(g: &SchedulingGroup, item: WorkItem) -> Option<ResolvedWorkItem> {
    match item {
        WorkItem::TailDequeue { rib, queue } => {
            let ribout = g.rib_state.get(rib)?.ribout;
            Some(ResolvedWorkItem::TailDequeue { ribout, queue })
        }
        WorkItem::PeerDequeue { peer, rib, queue, marker } => {
            let peer = g.peer_state.get(peer)?.peer;
            let ribout = g.rib_state.get(rib)?.ribout;
            Some(ResolvedWorkItem::PeerDequeue { peer, ribout, queue, marker })
        }
        WorkItem::SendReady { peer: peer_local } => {
            let peer = g.peer_state.get(peer_local)?.peer;
            let ribouts = g
                .edges
                .iter()
                .filter(|e| e.peer == peer_local)
                .filter_map(|e| g.rib_state.get(e.rib).map(|rs| rs.ribout))
                .collect();
            Some(ResolvedWorkItem::SendReady { peer, ribouts })
        }
    }
}

#[derive(Clone, Copy)]
struct Membership {
    group: GroupId,
    local: usize,
}

struct Inner {
    groups: IndexedMap<GroupTag, SchedulingGroup>,
    peer_map: HashMap<usize, Membership>,
    ribout_map: HashMap<usize, Membership>,
}

pub struct SchedulingGroupManager {
    inner: Mutex<Inner>,
}

impl SchedulingGroupManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                groups: IndexedMap::new(),
                peer_map: HashMap::new(),
                ribout_map: HashMap::new(),
            }),
        }
    }

    pub fn group_count(&self) -> usize {
        self.inner.lock().groups.len()
    }

    pub fn group_of_peer(&self, peer: usize) -> Option<GroupId> {
        self.inner.lock().peer_map.get(&peer).map(|m| m.group)
    }

    pub fn group_of_ribout(&self, ribout: usize) -> Option<GroupId> {
        self.inner.lock().ribout_map.get(&ribout).map(|m| m.group)
    }

    /// Enqueues a `TailDequeue` work item on the group owning `ribout`,
    /// translating the external ribout id to its rib-local index. Used
    /// by the producer path (C9's `join`/`notify`) to hand work to C10.
    pub fn enqueue_tail_dequeue(&self, ribout: usize, queue: QueueId) -> Option<GroupId> {
        let inner = self.inner.lock();
        let rm = inner.ribout_map.get(&ribout)?;
        let g = inner.groups.get(rm.group)?;
        g.enqueue(WorkItem::TailDequeue { rib: rm.local, queue });
        Some(rm.group)
    }

    /// Attempts to become the sole worker draining `group_id`. Returns
    /// `false` if another worker already claimed it (the caller must not
    /// spawn a second one).
    pub fn try_begin_drain(&self, group_id: GroupId) -> bool {
        let inner = self.inner.lock();
        inner.groups.get(group_id).map(|g| g.try_claim_running()).unwrap_or(false)
    }

    pub fn end_drain(&self, group_id: GroupId) {
        let inner = self.inner.lock();
        if let Some(g) = inner.groups.get(group_id) {
            g.release_running();
        }
    }

    pub fn has_pending_work(&self, group_id: GroupId) -> bool {
        let inner = self.inner.lock();
        inner.groups.get(group_id).map(|g| !g.is_idle()).unwrap_or(true)
    }

    /// Drains up to `yield_budget` work items from `group_id`, resolving
    /// each one to its external peer/ribout ids before handing it to
    /// `handle`. Returns `true` if the group's queue was fully drained.
    /// Held for the call's whole duration under the same lock `join`/
    /// `leave` use — a coarsened simplification (documented in
    /// `DESIGN.md`) rather than per-group fine-grained locking.
    pub fn drain_group(&self, group_id: GroupId, yield_budget: usize, mut handle: impl FnMut(ResolvedWorkItem)) -> bool {
        let inner = self.inner.lock();
        let Some(g) = inner.groups.get(group_id) else {
            return true;
        };
        g.drain(yield_budget, |item| {
            if let Some(resolved) = resolve(g, item) {
                handle(resolved);
            }
        })
    }

    /// Join(peer, ribout): the four cases from `SPEC_FULL.md` §4.10.
    pub fn join(&self, peer: usize, ribout: usize) -> GroupId {
        let mut inner = self.inner.lock();
        let peer_m = inner.peer_map.get(&peer).copied();
        let rib_m = inner.ribout_map.get(&ribout).copied();

        let group_id = match (peer_m, rib_m) {
            (None, None) => {
                let mut g = SchedulingGroup::new();
                let peer_idx = g.add_peer(peer);
                let rib_idx = g.add_rib(ribout);
                g.add_edge(peer_idx, rib_idx);
                let gid = inner.groups.insert(g);
                inner.peer_map.insert(peer, Membership { group: gid, local: peer_idx });
                inner.ribout_map.insert(ribout, Membership { group: gid, local: rib_idx });
                gid
            }
            (Some(pm), None) => {
                let g = inner.groups.get_mut(pm.group).expect("peer's group must exist");
                let rib_idx = g.add_rib(ribout);
                g.add_edge(pm.local, rib_idx);
                inner.ribout_map.insert(ribout, Membership { group: pm.group, local: rib_idx });
                pm.group
            }
            (None, Some(rm)) => {
                let g = inner.groups.get_mut(rm.group).expect("rib's group must exist");
                let peer_idx = g.add_peer(peer);
                g.add_edge(peer_idx, rm.local);
                inner.peer_map.insert(peer, Membership { group: rm.group, local: peer_idx });
                rm.group
            }
            (Some(pm), Some(rm)) if pm.group == rm.group => {
                let g = inner.groups.get_mut(pm.group).expect("group must exist");
                g.add_edge(pm.local, rm.local);
                pm.group
            }
            (Some(pm), Some(rm)) => self.merge(&mut inner, pm.group, rm.group, peer, ribout, pm.local, rm.local),
        };
        group_id
    }

    /// Merges the source group into the destination group (destination
    /// chosen as the lower group id, an arbitrary but deterministic
    /// tie-break), migrating every (peer, rib) membership with freshly
    /// allocated destination-local indices, then the edge that triggered
    /// the merge, then the source's pending work queue.
    fn merge(
        &self,
        inner: &mut Inner,
        group_a: GroupId,
        group_b: GroupId,
        joining_peer: usize,
        joining_ribout: usize,
        joining_peer_local: GroupLocalIndex,
        joining_rib_local: RibStateIndex,
    ) -> GroupId {
        let (dest_id, src_id) = if group_a <= group_b { (group_a, group_b) } else { (group_b, group_a) };
        let src = inner.groups.remove(src_id).expect("source group must exist");

        let mut peer_remap: HashMap<GroupLocalIndex, GroupLocalIndex> = HashMap::new();
        let mut rib_remap: HashMap<RibStateIndex, RibStateIndex> = HashMap::new();

        {
            let dest = inner.groups.get_mut(dest_id).expect("dest group must exist");
            for (old_idx, ps) in src.peer_state.iter() {
                let new_idx = dest.add_peer(ps.peer);
                peer_remap.insert(old_idx, new_idx);
                if let Some(new_ps) = dest.peer_state.get_mut(new_idx) {
                    new_ps.in_sync = ps.in_sync;
                    new_ps.send_ready = ps.send_ready;
                }
                if let Some(m) = inner.peer_map.get_mut(&ps.peer) {
                    m.group = dest_id;
                    m.local = new_idx;
                }
            }
            for (old_idx, rs) in src.rib_state.iter() {
                let new_idx = dest.add_rib(rs.ribout);
                rib_remap.insert(old_idx, new_idx);
                if let Some(new_rs) = dest.rib_state.get_mut(new_idx) {
                    new_rs.queue_sync = rs.queue_sync;
                }
                if let Some(m) = inner.ribout_map.get_mut(&rs.ribout) {
                    m.group = dest_id;
                    m.local = new_idx;
                }
            }
            for edge in &src.edges {
                let new_peer = peer_remap[&edge.peer];
                let new_rib = rib_remap[&edge.rib];
                dest.add_edge(new_peer, new_rib);
            }

            // The edge that triggered this merge: `peer_map`/`ribout_map`
            // now hold destination-local indices for both endpoints
            // regardless of which side (`dest` or `src`) each one
            // started on, since the migration loop above just rewrote
            // every entry that moved.
            let peer_local = inner.peer_map[&joining_peer].local;
            let rib_local = inner.ribout_map[&joining_ribout].local;
            dest.add_edge(peer_local, rib_local);

            // Transfer the source's pending work queue; item indices are
            // remapped so any rib/peer references stay valid in `dest`.
            src.drain(usize::MAX, |item| {
                let remapped = match item {
                    WorkItem::TailDequeue { rib, queue } => WorkItem::TailDequeue {
                        rib: rib_remap.get(&rib).copied().unwrap_or(rib),
                        queue,
                    },
                    WorkItem::PeerDequeue { peer, rib, queue, marker } => WorkItem::PeerDequeue {
                        peer: peer_remap.get(&peer).copied().unwrap_or(peer),
                        rib: rib_remap.get(&rib).copied().unwrap_or(rib),
                        queue,
                        marker,
                    },
                    WorkItem::SendReady { peer } => WorkItem::SendReady {
                        peer: peer_remap.get(&peer).copied().unwrap_or(peer),
                    },
                };
                dest.enqueue(remapped);
            });
        }

        dest_id
    }

    /// Leave(peer, ribout): removes the edge; if that disconnects the
    /// component, splits it via BFS from each endpoint of the removed
    /// edge and migrates one sub-component into a fresh group.
    pub fn leave(&self, peer: usize, ribout: usize) {
        let mut inner = self.inner.lock();
        let Some(pm) = inner.peer_map.get(&peer).copied() else {
            crate::telemetry::COUNTERS
                .leave_for_non_member
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        };
        let Some(rm) = inner.ribout_map.get(&ribout).copied() else {
            crate::telemetry::COUNTERS
                .leave_for_non_member
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return;
        };
        if pm.group != rm.group {
            return;
        }
        let group_id = pm.group;

        {
            let g = inner.groups.get_mut(group_id).expect("group must exist");
            g.remove_edge(pm.local, rm.local);
        }

        let reachable_from_peer = {
            let g = inner.groups.get(group_id).expect("group must exist");
            bfs_from_peer(g, pm.local)
        };
        let peer_side_disconnected_from_rib = {
            let g = inner.groups.get(group_id).expect("group must exist");
            !reachable_from_peer.ribs.contains(&rm.local) && g.rib_state.get(rm.local).is_some()
        };

        if !peer_side_disconnected_from_rib {
            // Still one connected component (or the rib/peer had no
            // other edges at all, which is handled the same way: nothing
            // to split).
            return;
        }

        self.split(&mut inner, group_id, reachable_from_peer);
    }

    fn split(&self, inner: &mut Inner, group_id: GroupId, keep_with_peer: Reachable) {
        let src = inner.groups.remove(group_id).expect("group must exist");
        let mut kept = SchedulingGroup::new();
        let mut moved = SchedulingGroup::new();

        let mut peer_remap: HashMap<GroupLocalIndex, (bool, GroupLocalIndex)> = HashMap::new();
        let mut rib_remap: HashMap<RibStateIndex, (bool, RibStateIndex)> = HashMap::new();

        for (old_idx, ps) in src.peer_state.iter() {
            if keep_with_peer.peers.contains(&old_idx) {
                peer_remap.insert(old_idx, (true, kept.add_peer(ps.peer)));
            } else {
                peer_remap.insert(old_idx, (false, moved.add_peer(ps.peer)));
            }
        }
        for (old_idx, rs) in src.rib_state.iter() {
            if keep_with_peer.ribs.contains(&old_idx) {
                rib_remap.insert(old_idx, (true, kept.add_rib(rs.ribout)));
            } else {
                rib_remap.insert(old_idx, (false, moved.add_rib(rs.ribout)));
            }
        }
        for edge in &src.edges {
            let (peer_kept, new_peer) = peer_remap[&edge.peer];
            let (_, new_rib) = rib_remap[&edge.rib];
            if peer_kept {
                kept.add_edge(new_peer, new_rib);
            } else {
                moved.add_edge(new_peer, new_rib);
            }
        }

        // Insert `kept` first so it reuses `group_id`'s just-freed slot
        // (the allocator's free list is LIFO); `moved` then gets a fresh
        // id. Both `peer_map`/`ribout_map` are rewritten below using the
        // now-known final ids, so the debug_assert is a cheap sanity
        // check rather than something callers rely on.
        let kept_id = inner.groups.insert(kept);
        debug_assert_eq!(kept_id, group_id);
        let moved_id = inner.groups.insert(moved);

        for (old_idx, ps) in src.peer_state.iter() {
            let (on_keep_side, new_idx) = peer_remap[&old_idx];
            let group = if on_keep_side { kept_id } else { moved_id };
            inner.peer_map.insert(ps.peer, Membership { group, local: new_idx });
        }
        for (old_idx, rs) in src.rib_state.iter() {
            let (on_keep_side, new_idx) = rib_remap[&old_idx];
            let group = if on_keep_side { kept_id } else { moved_id };
            inner.ribout_map.insert(rs.ribout, Membership { group, local: new_idx });
        }
    }
}

impl Default for SchedulingGroupManager {
    fn default() -> Self {
        Self::new()
    }
}

struct Reachable {
    peers: HashSet<GroupLocalIndex>,
    ribs: HashSet<RibStateIndex>,
}

fn bfs_from_peer(g: &SchedulingGroup, start: GroupLocalIndex) -> Reachable {
    let mut peers = HashSet::new();
    let mut ribs = HashSet::new();
    peers.insert(start);
    let mut queue = VecDeque::new();
    queue.push_back(Side::Peer(start));
    while let Some(node) = queue.pop_front() {
        match node {
            Side::Peer(p) => {
                for e in g.edges.iter().filter(|e| e.peer == p) {
                    if ribs.insert(e.rib) {
                        queue.push_back(Side::Rib(e.rib));
                    }
                }
            }
            Side::Rib(r) => {
                for e in g.edges.iter().filter(|e| e.rib == r) {
                    if peers.insert(e.peer) {
                        queue.push_back(Side::Peer(e.peer));
                    }
                }
            }
        }
    }
    Reachable { peers, ribs }
}

enum Side {
    Peer(GroupLocalIndex),
    Rib(RibStateIndex),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_creates_new_group_for_unseen_peer_and_ribout() {
        let mgr = SchedulingGroupManager::new();
        let gid = mgr.join(1, 100);
        assert_eq!(mgr.group_count(), 1);
        assert_eq!(mgr.group_of_peer(1), Some(gid));
        assert_eq!(mgr.group_of_ribout(100), Some(gid));
    }

    #[test]
    fn join_extends_existing_group_from_either_side() {
        let mgr = SchedulingGroupManager::new();
        let gid = mgr.join(1, 100);
        let gid2 = mgr.join(1, 200);
        assert_eq!(gid, gid2, "new rib joining an existing peer stays in that peer's group");
        assert_eq!(mgr.group_count(), 1);

        let gid3 = mgr.join(2, 200);
        assert_eq!(gid3, gid, "new peer joining an existing rib stays in that rib's group");
        assert_eq!(mgr.group_count(), 1);
    }

    #[test]
    fn join_merges_two_disjoint_groups() {
        let mgr = SchedulingGroupManager::new();
        let g1 = mgr.join(1, 100);
        let g2 = mgr.join(2, 200);
        assert_ne!(g1, g2);
        assert_eq!(mgr.group_count(), 2);

        let merged = mgr.join(1, 200);
        assert_eq!(mgr.group_count(), 1, "a second edge between the two components merges them");
        assert_eq!(mgr.group_of_peer(1), Some(merged));
        assert_eq!(mgr.group_of_peer(2), Some(merged));
        assert_eq!(mgr.group_of_ribout(100), Some(merged));
        assert_eq!(mgr.group_of_ribout(200), Some(merged));
    }

    #[test]
    fn leave_that_leaves_a_cycle_intact_does_not_split() {
        // A 4-cycle: removing one edge leaves every node reachable from
        // every other through the remaining three edges.
        let mgr = SchedulingGroupManager::new();
        mgr.join(1, 100);
        mgr.join(1, 200);
        mgr.join(2, 100);
        mgr.join(2, 200);
        assert_eq!(mgr.group_count(), 1);

        mgr.leave(1, 100);
        assert_eq!(mgr.group_count(), 1, "the cycle's other three edges keep everything connected");
        assert_eq!(mgr.group_of_peer(1), mgr.group_of_ribout(100));
    }

    #[test]
    fn leave_that_orphans_a_rib_splits_off_a_singleton() {
        let mgr = SchedulingGroupManager::new();
        mgr.join(1, 100);
        mgr.join(2, 100);
        mgr.leave(1, 100);
        assert_eq!(mgr.group_count(), 2, "rib 100's only remaining edge is to peer 2; peer 1 is now isolated");
        assert_ne!(mgr.group_of_peer(1), mgr.group_of_ribout(100));
        assert_eq!(mgr.group_of_peer(2), mgr.group_of_ribout(100));
    }

    #[test]
    fn leave_that_disconnects_the_graph_splits_into_two_groups() {
        let mgr = SchedulingGroupManager::new();
        let g1 = mgr.join(1, 100);
        mgr.join(1, 200);
        let before_rib200_group = mgr.group_of_ribout(200);
        assert_eq!(before_rib200_group, Some(g1), "merged into one group via shared peer 1");

        mgr.leave(1, 100);
        assert_eq!(mgr.group_count(), 2, "removing the shared peer's edge splits the component");
        assert!(mgr.group_of_peer(1).is_some(), "peer 1 keeps a group even with one rib left");
        assert_ne!(mgr.group_of_ribout(100), mgr.group_of_ribout(200));
    }
}

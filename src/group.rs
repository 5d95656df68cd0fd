//! `SchedulingGroup` (C10): one worker per connected component of the
//! (peer, rib) bipartite membership graph. Owns group-local peer/rib
//! state and a FIFO work-item queue; a `running` flag prevents the
//! worker being scheduled twice concurrently while it drains.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::index::IndexedMap;
use crate::update::QueueId;

pub struct GroupLocalTag;
pub type GroupLocalIndex = usize;

pub struct RibStateTag;
pub type RibStateIndex = usize;

/// Group-scoped state for one (peer, group) membership. `ribs` maps this
/// peer's group-local rib-state indices to whether it's currently
/// "queue-active" (has outstanding work) on each queue.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub peer: usize,
    pub in_sync: bool,
    pub send_ready: bool,
    pub ribs: IndexedMap<RibStateTag, [bool; 2]>,
    pub active_queue_count: [u32; 2],
    pub rr_cursor: usize,
}

impl PeerState {
    pub fn new(peer: usize) -> Self {
        Self {
            peer,
            in_sync: true,
            send_ready: false,
            ribs: IndexedMap::new(),
            active_queue_count: [0, 0],
            rr_cursor: 0,
        }
    }
}

/// Group-scoped state for one rib's membership within this group.
#[derive(Debug, Clone)]
pub struct RibState {
    pub ribout: usize,
    pub members: crate::bitset::PeerBitSet,
    pub queue_sync: [bool; 2],
}

impl RibState {
    pub fn new(ribout: usize) -> Self {
        Self {
            ribout,
            members: crate::bitset::PeerBitSet::new(),
            queue_sync: [true, true],
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkItem {
    TailDequeue { rib: RibStateIndex, queue: QueueId },
    PeerDequeue {
        peer: GroupLocalIndex,
        rib: RibStateIndex,
        queue: QueueId,
        marker: crate::queue::MarkerId,
    },
    SendReady { peer: GroupLocalIndex },
}

/// One (peer, rib) edge in the bipartite membership graph, kept
/// alongside the group's state so `group_manager.rs` can run
/// connectivity BFS without re-deriving edges from `RibState::members`
/// for every rib.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub peer: GroupLocalIndex,
    pub rib: RibStateIndex,
}

pub struct SchedulingGroup {
    pub peer_state: IndexedMap<GroupLocalTag, PeerState>,
    pub rib_state: IndexedMap<RibStateTag, RibState>,
    pub edges: Vec<Edge>,
    work_queue: Mutex<VecDeque<WorkItem>>,
    running: AtomicBool,
}

impl SchedulingGroup {
    pub fn new() -> Self {
        Self {
            peer_state: IndexedMap::new(),
            rib_state: IndexedMap::new(),
            edges: Vec::new(),
            work_queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn add_peer(&mut self, peer: usize) -> GroupLocalIndex {
        self.peer_state.insert(PeerState::new(peer))
    }

    pub fn add_rib(&mut self, ribout: usize) -> RibStateIndex {
        self.rib_state.insert(RibState::new(ribout))
    }

    pub fn add_edge(&mut self, peer: GroupLocalIndex, rib: RibStateIndex) {
        if let Some(rs) = self.rib_state.get_mut(rib) {
            rs.members.set(peer);
        }
        if let Some(ps) = self.peer_state.get_mut(peer) {
            ps.ribs.insert([false, false]);
        }
        self.edges.push(Edge { peer, rib });
    }

    pub fn remove_edge(&mut self, peer: GroupLocalIndex, rib: RibStateIndex) {
        if let Some(rs) = self.rib_state.get_mut(rib) {
            rs.members.reset(peer);
        }
        self.edges.retain(|e| !(e.peer == peer && e.rib == rib));
    }

    pub fn enqueue(&self, item: WorkItem) {
        self.work_queue.lock().push_back(item);
    }

    /// Attempts to claim the running flag; returns `true` if this caller
    /// now owns draining the worker (`false` means a worker is already
    /// active and this call should not re-enqueue one).
    pub fn try_claim_running(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release_running(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Pops and hands items to `handle` one at a time, releasing the
    /// queue lock while `handle` runs (so producers can keep enqueuing),
    /// until the queue is empty or `yield_budget` items have been
    /// processed. Returns `true` if the queue was fully drained.
    pub fn drain(&self, yield_budget: usize, mut handle: impl FnMut(WorkItem)) -> bool {
        for _ in 0..yield_budget {
            let item = self.work_queue.lock().pop_front();
            match item {
                Some(item) => handle(item),
                None => return true,
            }
        }
        self.work_queue.lock().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.peer_state.is_empty() && self.rib_state.is_empty()
    }

    /// True iff the work queue currently has nothing pending. Checked
    /// after `release_running` to close the race where a producer's
    /// `enqueue` lands between this worker's last `drain` and its release
    /// of the running flag.
    pub fn is_idle(&self) -> bool {
        self.work_queue.lock().is_empty()
    }
}

impl Default for SchedulingGroup {
    fn default() -> Self {
        Self::new()
    }
}

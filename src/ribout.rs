//! `RibOut` (§3): one (routing instance, export policy) pairing, owning
//! its rib-local peer index space, active peerset, and the `UpdateQueue`
//! pair (via `UpdateMonitor`, C7). Created lazily when the first peer
//! subscribes; destroyed when the last one unsubscribes (§3 lifecycle,
//! enforced by `group.rs`/`group_manager.rs` which own `RibOut` identity).

use std::hash::Hash;
use std::sync::Arc;

use crate::attr::AttrHandle;
use crate::bitset::PeerBitSet;
use crate::external::ExportPolicy;
use crate::index::IndexedMap;
use crate::monitor::UpdateMonitor;

/// Tag distinguishing rib-local `PeerIndex` values from group-local ones
/// at the type level (`SPEC_FULL.md` §3's two-namespace `PeerIndex`).
pub struct RibLocalTag;
pub type RibLocalIndex = usize;

/// Per-(peer, rib) state living in a `RibOut`'s rib-local index space.
#[derive(Debug, Clone)]
pub struct PeerRibState {
    /// Opaque identity of the peer in whatever namespace the caller uses
    /// (e.g. a group-local index, or a session handle) — the core never
    /// interprets this itself, only carries it across Join/Leave/Merge.
    pub peer: usize,
    pub active: bool,
    /// Per-(queue) activity flags: `[bulk, update]`.
    pub qactive: [bool; 2],
    pub in_sync: bool,
    pub send_ready: bool,
}

impl PeerRibState {
    pub fn new(peer: usize) -> Self {
        Self {
            peer,
            active: true,
            qactive: [false, false],
            in_sync: true,
            send_ready: false,
        }
    }
}

pub struct RibOut<P: Eq + Hash + Ord + Clone, A: AttrHandle> {
    pub policy: Arc<dyn ExportPolicy<A>>,
    pub peer_state: IndexedMap<RibLocalTag, PeerRibState>,
    pub active_peerset: PeerBitSet,
    pub monitor: UpdateMonitor<P, A>,
}

impl<P: Eq + Hash + Ord + Clone, A: AttrHandle> RibOut<P, A> {
    pub fn new(policy: Arc<dyn ExportPolicy<A>>) -> Self {
        Self {
            policy,
            peer_state: IndexedMap::new(),
            active_peerset: PeerBitSet::new(),
            monitor: UpdateMonitor::new(),
        }
    }

    /// Allocates a rib-local index for a newly subscribed peer and marks
    /// it active in `active_peerset`. Mutation of `active_peerset` must
    /// only ever happen on the `membership` task class (§5).
    pub fn add_peer(&mut self, peer: usize) -> RibLocalIndex {
        let index = self.peer_state.insert(PeerRibState::new(peer));
        self.active_peerset.set(index);
        index
    }

    pub fn remove_peer(&mut self, index: RibLocalIndex) -> Option<PeerRibState> {
        self.active_peerset.reset(index);
        self.peer_state.remove(index)
    }

    pub fn is_empty(&self) -> bool {
        self.peer_state.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::UpdateInfoList;

    struct AllowAll;
    impl ExportPolicy<u32> for AllowAll {
        fn export(&self, peers: &PeerBitSet, attr: Option<&u32>) -> (bool, UpdateInfoList<u32>) {
            let _ = (peers, attr);
            (true, UpdateInfoList::new())
        }
    }

    #[test]
    fn add_then_remove_peer_clears_active_bit() {
        let mut rib: RibOut<u32, u32> = RibOut::new(Arc::new(AllowAll));
        let idx = rib.add_peer(42);
        assert!(rib.active_peerset.test(idx));
        rib.remove_peer(idx);
        assert!(!rib.active_peerset.test(idx));
        assert!(rib.is_empty());
    }
}

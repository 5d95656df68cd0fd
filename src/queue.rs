//! `UpdateQueue` (C6): an ordered FIFO of `{ marker | RouteUpdate }`
//! entries plus a secondary by-attributes index, with marker-based
//! per-peer fairness.
//!
//! The original source keeps this as an intrusive `boost::intrusive::list`
//! of `UpdateEntry` (base of both `RouteUpdate` and `UpdateMarker`), linked
//! by raw pointer, with a parallel `boost::intrusive::set` for the
//! by-attributes order. We get the same O(1) splice/insert behaviour
//! without raw pointers by keeping both entity kinds in one
//! `generational_arena::Arena` and linking everything by index — the
//! "arena + index" pattern this crate uses anywhere the original used an
//! intrusive back-pointer (see `SPEC_FULL.md` Design Notes).

use std::collections::BTreeMap;

use generational_arena::{Arena, Index};

use crate::attr::AttrHandle;
use crate::bitset::PeerBitSet;
use crate::update::RouteUpdate;

pub type RouteUpdateId = Index;
pub type MarkerId = Index;

/// One slot in the queue's FIFO.
enum Entry<P, A: AttrHandle> {
    RouteUpdate(RouteUpdate<P, A>),
    Marker(Marker),
}

/// A queue entry representing the read-cursor of a set of peers.
#[derive(Debug, Clone, Default)]
pub struct Marker {
    pub members: PeerBitSet,
}

/// Order key for the by-attributes secondary index: `(attrs, timestamp,
/// prefix)`. Requires `P: Ord` for the prefix tiebreak.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct AttrOrderKey<P: Ord, A: AttrHandle> {
    attrs: crate::attr::RibOutAttr<A>,
    timestamp: u64,
    prefix: P,
}

/// FIFO of `RouteUpdate`/`Marker` entries plus the by-attributes index.
/// Linkage (FIFO order, marker membership) is guarded by a single mutex
/// at the call site (`monitor.rs`); this type itself is not internally
/// synchronized — it's the payload the monitor's lock protects.
pub struct UpdateQueue<P: Ord + Clone, A: AttrHandle> {
    arena: Arena<Entry<P, A>>,
    /// FIFO order: a plain `Vec` of arena indices. Splicing a marker in
    /// front or mid-queue is O(n) here versus O(1) for an intrusive list;
    /// queue depths in this pipeline are small enough (bounded by pending
    /// route churn, not peer count) that this trade favors simplicity —
    /// documented in `DESIGN.md`.
    order: Vec<Index>,
    tail_marker: MarkerId,
    by_attrs: BTreeMap<AttrOrderKey<P, A>, RouteUpdateId>,
}

impl<P: Ord + Clone, A: AttrHandle> UpdateQueue<P, A> {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let tail_marker = arena.insert(Entry::Marker(Marker::default()));
        Self {
            arena,
            order: vec![tail_marker],
            tail_marker,
            by_attrs: BTreeMap::new(),
        }
    }

    pub fn tail_marker(&self) -> MarkerId {
        self.tail_marker
    }

    pub fn marker(&self, id: MarkerId) -> Option<&Marker> {
        match self.arena.get(id) {
            Some(Entry::Marker(m)) => Some(m),
            _ => None,
        }
    }

    pub fn marker_mut(&mut self, id: MarkerId) -> Option<&mut Marker> {
        match self.arena.get_mut(id) {
            Some(Entry::Marker(m)) => Some(m),
            _ => None,
        }
    }

    pub fn route_update(&self, id: RouteUpdateId) -> Option<&RouteUpdate<P, A>> {
        match self.arena.get(id) {
            Some(Entry::RouteUpdate(r)) => Some(r),
            _ => None,
        }
    }

    pub fn route_update_mut(&mut self, id: RouteUpdateId) -> Option<&mut RouteUpdate<P, A>> {
        match self.arena.get_mut(id) {
            Some(Entry::RouteUpdate(r)) => Some(r),
            _ => None,
        }
    }

    fn position_of(&self, id: Index) -> Option<usize> {
        self.order.iter().position(|&e| e == id)
    }

    /// Appends `update` at the tail of the FIFO (immediately before the
    /// tail marker never happens; the tail marker is the true end so new
    /// work always lands after every existing in-sync peer's cursor) and
    /// indexes it by `(attrs, timestamp, prefix)` for every pending
    /// `UpdateInfo` it carries.
    pub fn enqueue(&mut self, update: RouteUpdate<P, A>) -> RouteUpdateId {
        let keys: Vec<_> = update
            .updates
            .iter()
            .map(|info| AttrOrderKey {
                attrs: info.attrs.clone(),
                timestamp: update.timestamp,
                prefix: update.prefix.clone(),
            })
            .collect();
        let id = self.arena.insert(Entry::RouteUpdate(update));
        for k in keys {
            self.by_attrs.insert(k, id);
        }
        self.order.push(id);
        id
    }

    /// Advances `marker` past the next entry. If that entry is itself a
    /// marker, the two markers' member sets merge and the absorbed marker
    /// is freed. Returns the id of the entry now just behind `marker`
    /// (the one consumed), or `None` if `marker` was already at the tail.
    pub fn dequeue(&mut self, marker: MarkerId) -> Option<Index> {
        let pos = self.position_of(marker)?;
        if pos + 1 >= self.order.len() {
            return None;
        }
        let next_id = self.order[pos + 1];
        let next_is_marker = matches!(self.arena.get(next_id), Some(Entry::Marker(_)));
        if next_is_marker {
            let absorbed = match self.arena.remove(next_id) {
                Some(Entry::Marker(m)) => m,
                _ => unreachable!(),
            };
            if let Some(Entry::Marker(m)) = self.arena.get_mut(marker) {
                m.members.union_with(&absorbed.members);
            }
            self.order.remove(pos + 1);
            if next_id == self.tail_marker {
                self.tail_marker = marker;
            }
            // The marker didn't move past a real entry yet; caller should
            // call again to actually consume the next RouteUpdate, if any.
            return self.dequeue(marker);
        }
        self.order.swap(pos, pos + 1);
        Some(next_id)
    }

    /// Inserts a fresh marker holding only `peer_index`, at the head of
    /// the queue, so the newly joined peer sees every pending entry
    /// before the tail.
    pub fn join(&mut self, peer_index: usize) -> MarkerId {
        let mut members = PeerBitSet::new();
        members.set(peer_index);
        let id = self.arena.insert(Entry::Marker(Marker { members }));
        self.order.insert(0, id);
        id
    }

    /// Clears `peer_index` from every marker; frees any marker (other
    /// than the tail) whose member set becomes empty.
    pub fn leave(&mut self, peer_index: usize) {
        let mut to_remove = Vec::new();
        for &id in &self.order {
            if let Some(Entry::Marker(m)) = self.arena.get_mut(id) {
                m.members.reset(peer_index);
                if m.members.is_empty() && id != self.tail_marker {
                    to_remove.push(id);
                }
            }
        }
        for id in to_remove {
            self.arena.remove(id);
            if let Some(pos) = self.position_of(id) {
                self.order.remove(pos);
            }
        }
    }

    /// Splits `marker` into two: a new marker holding `stay_bits`, left
    /// in place, and the original marker (which continues past this
    /// point) retaining the complement. Used when some peers must remain
    /// behind (blocked or unsynced) while others advance past the same
    /// entry.
    pub fn marker_split(&mut self, marker: MarkerId, stay_bits: &PeerBitSet) -> Option<MarkerId> {
        let pos = self.position_of(marker)?;
        let stay = {
            let m = match self.arena.get_mut(marker) {
                Some(Entry::Marker(m)) => m,
                _ => return None,
            };
            m.members.difference_with(stay_bits);
            stay_bits.clone()
        };
        let new_id = self.arena.insert(Entry::Marker(Marker { members: stay }));
        self.order.insert(pos, new_id);
        Some(new_id)
    }

    /// Ascending `(attrs, timestamp, prefix)` iteration over currently
    /// enqueued `RouteUpdate`s, for attribute-grouped packing (§4.6).
    pub fn attribute_iterator(&self) -> impl Iterator<Item = RouteUpdateId> + '_ {
        self.by_attrs.values().copied()
    }

    pub fn remove_route_update(&mut self, id: RouteUpdateId) -> Option<RouteUpdate<P, A>> {
        if !matches!(self.arena.get(id), Some(Entry::RouteUpdate(_))) {
            return None;
        }
        let removed = match self.arena.remove(id) {
            Some(Entry::RouteUpdate(r)) => r,
            _ => unreachable!("checked above"),
        };
        if let Some(pos) = self.position_of(id) {
            self.order.remove(pos);
        }
        self.by_attrs.retain(|_, v| *v != id);
        Some(removed)
    }

    pub fn is_empty(&self) -> bool {
        !self
            .order
            .iter()
            .any(|&id| matches!(self.arena.get(id), Some(Entry::RouteUpdate(_))))
    }

    /// Count of markers currently in the queue (P3: exactly one of these
    /// is the tail).
    pub fn marker_count(&self) -> usize {
        self.order
            .iter()
            .filter(|&&id| matches!(self.arena.get(id), Some(Entry::Marker(_))))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.order
            .iter()
            .filter(|&&id| matches!(self.arena.get(id), Some(Entry::RouteUpdate(_))))
            .count()
    }
}

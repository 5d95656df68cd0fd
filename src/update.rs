//! `UpdateInfo`/`RouteUpdate`/`UpdateList`/`RouteState` (C4, C5): the
//! per-prefix pending-delta and advertise-history entities that flow
//! through the `UpdateQueue` (C6).
//!
//! `AdvertiseInfo` (C3, `history.rs`) is stored as a plain `Vec` because
//! nothing outside its owner ever addresses one by index. `UpdateInfo`
//! is the same: it only ever needs to be found *within* the `RouteUpdate`
//! that owns it (by matching `attrs`), so it too is a `Vec` entry rather
//! than its own arena slot. The `RouteUpdate` itself *is* arena-indexed
//! (see `queue.rs`), because both a route's external `DbState` and an
//! `UpdateQueue`'s FIFO linkage need to address the same `RouteUpdate`
//! by a stable, freeable identity — that's the one place this crate uses
//! the arena + index pattern from `SPEC_FULL.md` Design Notes.

use bitflags::bitflags;

use crate::attr::{AttrHandle, RibOutAttr};
use crate::bitset::PeerBitSet;
use crate::history::AdvertiseList;
use crate::queue::RouteUpdateId;

/// Which of the two priority queues a `RouteUpdate` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// High-priority: ordinary route changes.
    Update,
    /// Low-priority: peer-join table walks.
    Bulk,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RouteUpdateFlags: u8 {
        /// Set while this `RouteUpdate` is one half of an `UpdateList`
        /// (i.e. the same prefix has a pending delta on both queues).
        const ON_UPDATE_LIST = 0b01;
    }
}

/// One pending delta: a unique `attrs` value and the peers it should go
/// to, within one `RouteUpdate`.
#[derive(Debug, Clone)]
pub struct UpdateInfo<A: AttrHandle> {
    pub target: PeerBitSet,
    pub attrs: RibOutAttr<A>,
}

/// Ordered collection of `UpdateInfo`, unique by `attrs`, pairwise
/// disjoint by `target` — the invariant P1 in `SPEC_FULL.md` §8.
#[derive(Debug, Clone, Default)]
pub struct UpdateInfoList<A: AttrHandle>(Vec<UpdateInfo<A>>);

impl<A: AttrHandle> UpdateInfoList<A> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn reachable_len(&self) -> usize {
        self.0.iter().filter(|u| u.attrs.is_reachable()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateInfo<A>> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut UpdateInfo<A>> {
        self.0.iter_mut()
    }

    pub fn push(&mut self, info: UpdateInfo<A>) {
        self.0.push(info);
    }

    pub fn push_front(&mut self, info: UpdateInfo<A>) {
        self.0.insert(0, info);
    }

    pub fn find(&self, attrs: &RibOutAttr<A>) -> Option<&UpdateInfo<A>> {
        self.0.iter().find(|u| &u.attrs == attrs)
    }

    pub fn find_mut(&mut self, attrs: &RibOutAttr<A>) -> Option<&mut UpdateInfo<A>> {
        self.0.iter_mut().find(|u| &u.attrs == attrs)
    }

    pub fn retain_nonempty(&mut self) {
        self.0.retain(|u| !u.target.is_empty());
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn into_vec(self) -> Vec<UpdateInfo<A>> {
        self.0
    }
}

impl<A: AttrHandle> FromIterator<UpdateInfo<A>> for UpdateInfoList<A> {
    fn from_iter<I: IntoIterator<Item = UpdateInfo<A>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// True iff `a` and `b` contain the same `(attrs, target)` pairs,
/// independent of order. Used by the producer (C9) to detect that a
/// freshly computed pending list is identical to what's already
/// installed on the route's `RouteUpdate` (a true no-op notification).
pub fn update_info_lists_equal<A: AttrHandle>(a: &UpdateInfoList<A>, b: &UpdateInfoList<A>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|x| {
        b.iter()
            .find(|y| y.attrs == x.attrs)
            .is_some_and(|y| y.target == x.target)
    })
}

/// Per-prefix, per-queue pending-update entity (C5). Owned by exactly one
/// `UpdateQueue` slot at a time (see `queue.rs`).
#[derive(Debug, Clone)]
pub struct RouteUpdate<P, A: AttrHandle> {
    pub prefix: P,
    pub queue_id: QueueId,
    pub updates: UpdateInfoList<A>,
    pub history: AdvertiseList<A>,
    pub timestamp: u64,
    pub flags: RouteUpdateFlags,
}

impl<P: Clone, A: AttrHandle> RouteUpdate<P, A> {
    pub fn new(prefix: P, queue_id: QueueId, timestamp: u64) -> Self {
        Self {
            prefix,
            queue_id,
            updates: UpdateInfoList::new(),
            history: AdvertiseList::new(),
            timestamp,
            flags: RouteUpdateFlags::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn is_advertised(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn on_update_list(&self) -> bool {
        self.flags.contains(RouteUpdateFlags::ON_UPDATE_LIST)
    }

    /// Installs `updates` as the pending delta. Panics if `updates` was
    /// already non-empty — mirrors the original's `assert(updates_->empty())`
    /// in `SetUpdateInfo`, a contract violation rather than a recoverable
    /// error (see `SPEC_FULL.md` §7 kind 3).
    pub fn set_updates(&mut self, updates: UpdateInfoList<A>) {
        assert!(
            self.updates.is_empty(),
            "set_updates called with a non-empty pending list already installed"
        );
        self.updates = updates;
    }

    pub fn clear_updates(&mut self) {
        self.updates.clear();
    }

    /// JOIN / bulk coalescing: for each incoming `UpdateInfo`, union its
    /// target into an existing entry with equal `attrs`, or clear those
    /// bits from every other entry and insert fresh at the head.
    pub fn merge_updates(&mut self, incoming: UpdateInfoList<A>) {
        for u in incoming.into_vec() {
            if let Some(existing) = self.updates.find_mut(&u.attrs) {
                existing.target.union_with(&u.target);
            } else {
                for other in self.updates.iter_mut() {
                    other.target.difference_with(&u.target);
                }
                self.updates.push_front(u);
            }
        }
        self.updates.retain_nonempty();
    }

    /// Computes the peers advertised in `history` but not targeted by any
    /// entry already in `self.updates`, and prepends a single withdraw
    /// `UpdateInfo` for them if non-empty.
    pub fn build_negative(&mut self) {
        let mut withdraw = PeerBitSet::new();
        for ainfo in self.history.iter() {
            withdraw.union_with(&ainfo.target);
        }
        for u in self.updates.iter() {
            withdraw.difference_with(&u.target);
        }
        if !withdraw.is_empty() {
            self.updates.push_front(UpdateInfo {
                target: withdraw,
                attrs: RibOutAttr::withdraw(),
            });
        }
    }

    /// For each `AdvertiseInfo` in history, find at most one `UpdateInfo`
    /// with equal `attrs` and reset *its* target bits that are already
    /// covered by that history entry — no need to re-advertise state a
    /// peer already has. Drops `UpdateInfo`s whose target becomes empty.
    pub fn trim_redundant(&mut self) {
        for ainfo in self.history.iter() {
            if let Some(pos) = self
                .updates
                .iter()
                .position(|u| u.attrs == ainfo.attrs)
            {
                let info = &mut self.updates.0[pos];
                info.target.difference_with(&ainfo.target);
            }
        }
        self.updates.retain_nonempty();
    }

    /// Resets `bits` in every pending `UpdateInfo`, dropping any that
    /// become empty. Used when a peer blocks or un-subscribes.
    pub fn reset_targets(&mut self, bits: &PeerBitSet) {
        for u in self.updates.iter_mut() {
            u.target.difference_with(bits);
        }
        self.updates.retain_nonempty();
    }

    /// Records that `attrs` was actually transmitted to `peers`: folds
    /// them into history via `AdvertiseList::upsert`.
    pub fn record_sent(&mut self, attrs: &RibOutAttr<A>, peers: &PeerBitSet) {
        self.history.upsert(attrs, peers);
    }

    /// True iff the set of `(attrs, target)` tuples in `updates` equals
    /// that of `history` — used by the producer to detect that a fresh
    /// notification is a no-op against what's already pending.
    pub fn compare_update_info(&self, candidate: &UpdateInfoList<A>) -> bool {
        self.history.matches_pending(candidate)
    }
}

/// History-only DB state kept on a route when no update is pending.
#[derive(Debug, Clone, Default)]
pub struct RouteState<A: AttrHandle> {
    pub history: AdvertiseList<A>,
}

impl<A: AttrHandle> RouteState<A> {
    pub fn new() -> Self {
        Self {
            history: AdvertiseList::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Holds both RouteUpdates when the same prefix is simultaneously pending
/// on BULK and UPDATE; each member `RouteUpdate`'s own `history` is empty
/// while it's part of an `UpdateList` — history lives here instead.
#[derive(Debug, Clone, Default)]
pub struct UpdateList<A: AttrHandle> {
    pub history: AdvertiseList<A>,
    pub bulk: Option<RouteUpdateId>,
    pub update: Option<RouteUpdateId>,
}

impl<A: AttrHandle> UpdateList<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, queue_id: QueueId) -> Option<RouteUpdateId> {
        match queue_id {
            QueueId::Bulk => self.bulk,
            QueueId::Update => self.update,
        }
    }

    pub fn set(&mut self, queue_id: QueueId, id: RouteUpdateId) {
        match queue_id {
            QueueId::Bulk => self.bulk = Some(id),
            QueueId::Update => self.update = Some(id),
        }
    }

    pub fn remove(&mut self, queue_id: QueueId) -> Option<RouteUpdateId> {
        match queue_id {
            QueueId::Bulk => self.bulk.take(),
            QueueId::Update => self.update.take(),
        }
    }

    /// The single remaining queue-id/id pair once only one is set, used
    /// when demoting an `UpdateList` back to a plain `RouteUpdate`.
    pub fn sole_remaining(&self) -> Option<(QueueId, RouteUpdateId)> {
        match (self.bulk, self.update) {
            (Some(id), None) => Some((QueueId::Bulk, id)),
            (None, Some(id)) => Some((QueueId::Update, id)),
            _ => None,
        }
    }
}

/// The route entry's `DbState` (see `SPEC_FULL.md` §6): a tagged union of
/// what a route may have recorded against one `RibOut`'s listener id.
#[derive(Debug, Clone)]
pub enum DbState<A: AttrHandle> {
    RouteState(RouteState<A>),
    RouteUpdate(RouteUpdateId),
    UpdateList(UpdateList<A>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(bits: &[usize]) -> PeerBitSet {
        bits.iter().copied().collect()
    }

    fn ru() -> RouteUpdate<u32, u32> {
        RouteUpdate::new(1u32, QueueId::Update, 0)
    }

    #[test]
    fn merge_unions_matching_attrs() {
        let mut r = ru();
        let x = RibOutAttr::reachable(1u32, vec![]);
        r.merge_updates(
            [UpdateInfo {
                target: peers(&[0]),
                attrs: x.clone(),
            }]
            .into_iter()
            .collect(),
        );
        r.merge_updates(
            [UpdateInfo {
                target: peers(&[1]),
                attrs: x.clone(),
            }]
            .into_iter()
            .collect(),
        );
        assert_eq!(r.updates.find(&x).unwrap().target, peers(&[0, 1]));
    }

    #[test]
    fn merge_clears_other_entries_on_new_attrs() {
        let mut r = ru();
        let x = RibOutAttr::reachable(1u32, vec![]);
        let y = RibOutAttr::reachable(2u32, vec![]);
        r.merge_updates(
            [UpdateInfo {
                target: peers(&[0, 1]),
                attrs: x.clone(),
            }]
            .into_iter()
            .collect(),
        );
        r.merge_updates(
            [UpdateInfo {
                target: peers(&[1]),
                attrs: y.clone(),
            }]
            .into_iter()
            .collect(),
        );
        assert_eq!(r.updates.find(&x).unwrap().target, peers(&[0]));
        assert_eq!(r.updates.find(&y).unwrap().target, peers(&[1]));
    }

    #[test]
    fn build_negative_withdraws_dropped_peers() {
        let mut r = ru();
        let x = RibOutAttr::reachable(1u32, vec![]);
        r.history.upsert(&x, &peers(&[0, 1]));
        r.updates.push(UpdateInfo {
            target: peers(&[0]),
            attrs: x,
        });
        r.build_negative();
        let withdraw = r.updates.iter().find(|u| !u.attrs.is_reachable()).unwrap();
        assert_eq!(withdraw.target, peers(&[1]));
    }

    #[test]
    fn trim_redundant_drops_already_advertised_state() {
        let mut r = ru();
        let x = RibOutAttr::reachable(1u32, vec![]);
        r.history.upsert(&x, &peers(&[0]));
        r.updates.push(UpdateInfo {
            target: peers(&[0]),
            attrs: x,
        });
        r.trim_redundant();
        assert!(r.updates.is_empty(), "peer 0 already has this state");
    }

    #[test]
    fn reset_targets_drops_emptied_entries() {
        let mut r = ru();
        let x = RibOutAttr::reachable(1u32, vec![]);
        r.updates.push(UpdateInfo {
            target: peers(&[0]),
            attrs: x,
        });
        r.reset_targets(&peers(&[0]));
        assert!(r.updates.is_empty());
    }
}

//! `AdvertiseHistory` (C3): the per-prefix record of what was last sent
//! to each peer, sharded by the attributes that were sent.
//!
//! The original source keeps this as an intrusive singly-linked list of
//! `AdvertiseInfo` because each entry's lifetime is tied to a `DBState`
//! slot it never needs to be referenced from outside that slot by index.
//! Unlike `UpdateInfo` (C4), nothing outside the owning `RouteUpdate` /
//! `RouteState` / `UpdateList` ever holds a pointer to one `AdvertiseInfo`,
//! so a plain `Vec` gives the same semantics without needing an arena
//! slot per entry.

use crate::attr::{AttrHandle, RibOutAttr};
use crate::bitset::PeerBitSet;
use crate::update::UpdateInfoList;

/// `{ target, attrs }` where `attrs` is always reachable — withdrawals
/// are never stored; their absence from the history *is* the record of
/// the withdrawal.
#[derive(Debug, Clone)]
pub struct AdvertiseInfo<A: AttrHandle> {
    pub target: PeerBitSet,
    pub attrs: RibOutAttr<A>,
}

/// Ordered collection of `AdvertiseInfo`, one per distinct `attrs`
/// currently advertised for a prefix.
#[derive(Debug, Clone, Default)]
pub struct AdvertiseList<A: AttrHandle>(Vec<AdvertiseInfo<A>>);

impl<A: AttrHandle> AdvertiseList<A> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdvertiseInfo<A>> {
        self.0.iter()
    }

    pub fn find(&self, attrs: &RibOutAttr<A>) -> Option<&AdvertiseInfo<A>> {
        self.0.iter().find(|info| &info.attrs == attrs)
    }

    /// Union `peers` into the entry matching `attrs` (creating it if
    /// absent and `attrs` is reachable), clearing those bits from every
    /// other entry, and dropping any entry whose target becomes empty.
    /// If `attrs` is unreachable (a withdrawal), only the clearing
    /// happens — withdrawals are never stored as their own entry.
    pub fn upsert(&mut self, attrs: &RibOutAttr<A>, peers: &PeerBitSet) {
        if peers.is_empty() {
            return;
        }
        for info in self.0.iter_mut() {
            if &info.attrs == attrs {
                info.target.union_with(peers);
            } else {
                info.target.difference_with(peers);
            }
        }
        if attrs.is_reachable() && self.find(attrs).is_none() {
            self.0.push(AdvertiseInfo {
                target: peers.clone(),
                attrs: attrs.clone(),
            });
        }
        self.0.retain(|info| !info.target.is_empty());
    }

    /// True iff the set of `(attrs, target)` tuples here equals that of
    /// `pending` — used to detect back-to-back A→B→A churn that nets to
    /// a no-op against history.
    pub fn matches_pending(&self, pending: &UpdateInfoList<A>) -> bool {
        if self.0.len() != pending.reachable_len() {
            return false;
        }
        self.0.iter().all(|info| {
            pending
                .iter()
                .find(|u| u.attrs == info.attrs)
                .is_some_and(|u| u.target == info.target)
        })
    }

    /// Removes `peers` from every entry, dropping any that become
    /// empty. Used by LEAVE.
    pub fn reset_targets(&mut self, peers: &PeerBitSet) {
        for info in self.0.iter_mut() {
            info.target.difference_with(peers);
        }
        self.0.retain(|info| !info.target.is_empty());
    }
}

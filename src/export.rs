//! `BgpExport` (C9): turns a route-table notification into an enqueued
//! `RouteUpdate`, plus the JOIN and LEAVE paths invoked by membership
//! changes. Runs on a `partition.*` task (notifications) or the
//! `membership` task (join/leave) — never suspends, and per §7 "C9
//! cannot fail": every public entry point here returns `()`.
//!
//! Grounded directly in `BgpExport::Export`/`Join`/`Leave` in the
//! original source's `bgp_export.cc`.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::attr::AttrHandle;
use crate::bitset::PeerBitSet;
use crate::external::ExportPolicy;
use crate::monitor::{PriorState, UpdateMonitor};
use crate::update::{update_info_lists_equal, DbState, QueueId, RouteState, RouteUpdate};

/// Process-wide, monotonically increasing counter standing in for a
/// wall-clock timestamp: gives the by-attributes secondary index (C6) a
/// total, tie-free order and keeps the pipeline deterministic under test
/// replay (`SPEC_FULL.md` §3).
#[derive(Debug, Default)]
pub struct LogicalClock(AtomicU64);

impl LogicalClock {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Steady-state notification path (§4.7 steps 1-9). `attr` is the route's
/// current best-path attribute handle, or `None` if the route was
/// withdrawn entirely.
pub fn notify<P, A>(
    monitor: &UpdateMonitor<P, A>,
    clock: &LogicalClock,
    db_entry: &P,
    is_deleted: bool,
    active_peerset: &PeerBitSet,
    attr: Option<&A>,
    policy: &dyn ExportPolicy<A>,
) where
    P: Eq + Hash + Ord + Clone,
    A: AttrHandle,
{
    let desired = if is_deleted || active_peerset.is_empty() {
        Default::default()
    } else {
        policy.export(active_peerset, attr).1
    };

    let (prior, was_duplicate) =
        monitor.get_dbstate_and_dequeue(db_entry, |ru| update_info_lists_equal(&ru.updates, &desired));
    if was_duplicate {
        crate::ribout_trace!("duplicate notification, no-op");
        return;
    }

    let mut ru = match prior {
        None => {
            if desired.is_empty() {
                return;
            }
            RouteUpdate::new(db_entry.clone(), QueueId::Update, clock.next())
        }
        Some(PriorState::History(hist)) => {
            if hist.matches_pending(&desired) {
                // Back-to-back A -> B -> A churn nets to a no-op; restore
                // history unchanged.
                monitor.install(db_entry.clone(), Some(DbState::RouteState(RouteState { history: hist })));
                return;
            }
            let mut r = RouteUpdate::new(db_entry.clone(), QueueId::Update, clock.next());
            r.history = hist;
            r
        }
        Some(PriorState::Update(mut r)) => {
            r.clear_updates();
            if r.history.is_empty() && desired.is_empty() {
                monitor.install(db_entry.clone(), None);
                return;
            }
            r
        }
    };

    ru.set_updates(desired);
    ru.build_negative();
    ru.trim_redundant();

    if ru.updates.is_empty() {
        monitor.install(
            db_entry.clone(),
            Some(DbState::RouteState(RouteState { history: ru.history })),
        );
        return;
    }

    let id = monitor.queue(QueueId::Update).lock().enqueue(ru);
    monitor.install(db_entry.clone(), Some(DbState::RouteUpdate(id)));
}

/// JOIN path: peers newly subscribed to a `RibOut`. Returns `true` if
/// C10 should be signalled to schedule a `TailDequeue` on the BULK
/// queue (it had been idle before this call).
pub fn join<P, A>(
    monitor: &UpdateMonitor<P, A>,
    clock: &LogicalClock,
    db_entry: &P,
    joining_peers: &PeerBitSet,
    attr: Option<&A>,
    policy: &dyn ExportPolicy<A>,
) -> bool
where
    P: Eq + Hash + Ord + Clone,
    A: AttrHandle,
{
    let (current, scheduled) = monitor.get_peerset_current_and_scheduled(db_entry, Some(QueueId::Update));
    let mut remaining = joining_peers.clone();
    remaining.difference_with(&current);
    remaining.difference_with(&scheduled);
    if remaining.is_empty() {
        return false;
    }

    let (any_reachable, updates) = policy.export(&remaining, attr);
    if !any_reachable && updates.is_empty() {
        return false;
    }

    let mut ru = RouteUpdate::new(db_entry.clone(), QueueId::Bulk, clock.next());
    ru.set_updates(updates);
    monitor.merge_update(db_entry, ru)
}

/// LEAVE path: peers unsubscribing from a `RibOut`.
pub fn leave<P, A>(monitor: &UpdateMonitor<P, A>, db_entry: &P, leaving_peers: &PeerBitSet)
where
    P: Eq + Hash + Ord + Clone,
    A: AttrHandle,
{
    let (current, scheduled) = monitor.get_peerset_current_and_scheduled(db_entry, None);
    let mut affected = current;
    affected.union_with(&scheduled);
    affected.intersect_with(leaving_peers);
    if !affected.is_empty() {
        monitor.clear_peerset_current_and_scheduled(db_entry, &affected);
    }
}

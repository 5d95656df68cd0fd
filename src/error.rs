//! Typed error taxonomy for contract violations (§7 kind 3). Transient
//! transport failures and empty-policy results are not modeled here —
//! they're handled locally as plain `bool`/`Option` per `SPEC_FULL.md`
//! §6-§7, matching the external trait return types directly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RibOutError {
    #[error("two UpdateInfo entries with equal attrs in one RouteUpdate for prefix")]
    DuplicateAttrsInUpdate,

    #[error("lock order inversion: attempted to acquire {attempted} while holding {held}")]
    LockOrderInversion {
        held: &'static str,
        attempted: &'static str,
    },

    #[error("peer-dequeue requested for unknown peer index {0}")]
    UnknownPeerDequeue(usize),

    #[error("UpdateQueue has no tail marker")]
    MissingTailMarker,

    #[error("attempted to rewrite attrs on an already-reachable RibOutAttr in place")]
    NextHopRewriteOnReachableAttr,

    #[error("scheduling group work item referenced an unknown rib or peer")]
    UnknownSchedulingGroupMember,
}

/// Logs `err` at error level and aborts the process, matching "the core
/// aborts the process" for contract violations (§7 kind 3). These are
/// symptoms of a bug elsewhere, not conditions a caller can recover from.
pub fn abort_on_contract_violation(err: RibOutError) -> ! {
    crate::ribout_error!(error = %err, "contract violation, aborting");
    std::process::abort();
}

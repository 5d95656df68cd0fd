//! Traits for every collaborator this crate consumes but does not own
//! (§6): the route table, its entries, export policy, the attribute
//! database, message building, transport, and the task scheduler.
//!
//! `TaskSpawner` generalizes "task scheduler" beyond the literal spec
//! text so `testkit.rs` can drive the pipeline deterministically under a
//! single-threaded, paused-clock Tokio runtime instead of hard-wiring
//! `tokio::spawn` at every call site — the one place this crate adds an
//! abstraction the distilled spec didn't ask for.

use std::future::Future;
use std::pin::Pin;

use crate::attr::{AttrHandle, RibOutAttr};
use crate::bitset::PeerBitSet;
use crate::update::{DbState, UpdateInfoList};

/// A routing table this crate listens to for per-prefix changes.
pub trait RouteTable {
    type Prefix: Clone + Ord + Eq + std::hash::Hash;
    type Entry: RouteEntry<Prefix = Self::Prefix>;

    /// Registers a listener callback, invoked as `cb(partition, entry)`
    /// for every notified change. Returns an opaque listener id.
    fn register_listener(
        &self,
        cb: Box<dyn Fn(usize, &Self::Entry) + Send + Sync>,
    ) -> usize;

    fn unregister(&self, listener_id: usize);
}

/// One route-table entry, addressable by a registered listener id.
pub trait RouteEntry {
    type Prefix: Clone + Ord + Eq + std::hash::Hash;
    type Attr: AttrHandle;

    fn prefix(&self) -> Self::Prefix;
    fn is_deleted(&self) -> bool;
    fn get_dbstate(&self, listener_id: usize) -> Option<DbState<Self::Attr>>;
    fn set_dbstate(&self, listener_id: usize, state: DbState<Self::Attr>);
    fn clear_dbstate(&self, listener_id: usize);
}

/// Pure function computing the desired advertisement for a route given a
/// candidate peer set. Must not mutate the route or the RIB.
pub trait ExportPolicy<A: AttrHandle>: Send + Sync {
    fn export(&self, peers: &PeerBitSet, attr: Option<&A>) -> (bool, UpdateInfoList<A>);
}

/// Interning attribute database: produces stable, identity-comparable
/// handles for the attribute sets the core never inspects directly.
pub trait AttrDatabase {
    type Attr: AttrHandle;
    type Input;

    fn locate(&self, input: &Self::Input) -> Self::Attr;
}

/// Builds wire-format messages. The core is byte-string-opaque: it never
/// looks inside what `finish` returns.
pub trait MessageBuilder<A: AttrHandle> {
    type Message;

    fn start(&self) -> Self::Message;
    /// Returns `false` if the message cannot hold another prefix/attrs
    /// pair; the caller must `finish` and start a new message.
    fn add(&self, message: &mut Self::Message, attrs: &RibOutAttr<A>, prefixes: &[u8]) -> bool;
    fn finish(&self, message: Self::Message) -> Vec<u8>;
}

/// A peer's transport. `on_writable` fires exactly once per `false`
/// return from `send`.
pub trait Transport {
    fn send(&self, peer: usize, bytes: Vec<u8>, on_writable: Box<dyn FnOnce() + Send>) -> bool;
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Abstracts the cooperative task scheduler (§5): named task classes,
/// enqueue, yield budget. Real callers back this with `tokio::spawn`;
/// `testkit.rs` backs it with a current-thread, paused-clock runtime.
pub trait TaskSpawner: Send + Sync {
    fn spawn_partition(&self, fut: BoxFuture<'static, ()>);
    fn spawn_membership(&self, fut: BoxFuture<'static, ()>);
    fn spawn_send(&self, group: usize, fut: BoxFuture<'static, ()>);
    fn spawn_send_ready(&self, fut: BoxFuture<'static, ()>);
}

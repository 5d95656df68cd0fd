//! In-memory fakes for every `external` trait, usable under a
//! deterministic, single-threaded Tokio runtime (`#[tokio::test(flavor =
//! "current_thread", start_paused = true)]`). Grounded on the teacher's
//! own pattern of test-only fakes kept alongside production code
//! (`bgp::show`'s test `ShowChannel`); scoped here to its own module so
//! integration tests in `tests/scenarios.rs` can build a whole pipeline
//! without a real route table, attribute database, or transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use parking_lot::Mutex as PlMutex;

use crate::attr::RibOutAttr;
use crate::bitset::PeerBitSet;
use crate::external::{AttrDatabase, ExportPolicy, MessageBuilder, RouteEntry, RouteTable, TaskSpawner, Transport};
use crate::update::{DbState, UpdateInfo, UpdateInfoList};

/// A route table with exactly the prefixes inserted by `insert`/`delete`,
/// single listener, synchronous notification (no actual async fan-out;
/// `register_listener`'s callback runs inline from `insert`/`delete`).
pub struct FakeRouteTable<Prefix: Clone + Eq + std::hash::Hash> {
    listener: Mutex<Option<Box<dyn Fn(usize, &FakeEntry<Prefix>) + Send + Sync>>>,
    entries: Mutex<HashMap<Prefix, FakeEntry<Prefix>>>,
}

#[derive(Clone)]
pub struct FakeEntry<Prefix: Clone> {
    prefix: Prefix,
    deleted: bool,
    dbstate: Arc<Mutex<Option<DbState<u32>>>>,
}

impl<Prefix: Clone + Eq + std::hash::Hash> FakeRouteTable<Prefix> {
    pub fn new() -> Self {
        Self {
            listener: Mutex::new(None),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, prefix: Prefix) {
        let entry = self
            .entries
            .lock()
            .unwrap()
            .entry(prefix.clone())
            .or_insert_with(|| FakeEntry {
                prefix: prefix.clone(),
                deleted: false,
                dbstate: Arc::new(Mutex::new(None)),
            })
            .clone();
        if let Some(cb) = self.listener.lock().unwrap().as_ref() {
            cb(0, &entry);
        }
    }

    pub fn delete(&self, prefix: Prefix) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&prefix) {
            entry.deleted = true;
            let snapshot = entry.clone();
            drop(entries);
            if let Some(cb) = self.listener.lock().unwrap().as_ref() {
                cb(0, &snapshot);
            }
        }
    }
}

impl<Prefix: Clone + Eq + std::hash::Hash> Default for FakeRouteTable<Prefix> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Prefix: Clone + Eq + std::hash::Hash + Send + Sync + 'static> RouteTable for FakeRouteTable<Prefix> {
    type Prefix = Prefix;
    type Entry = FakeEntry<Prefix>;

    fn register_listener(&self, cb: Box<dyn Fn(usize, &Self::Entry) + Send + Sync>) -> usize {
        *self.listener.lock().unwrap() = Some(cb);
        0
    }

    fn unregister(&self, _listener_id: usize) {
        *self.listener.lock().unwrap() = None;
    }
}

impl<Prefix: Clone + Eq + std::hash::Hash> RouteEntry for FakeEntry<Prefix> {
    type Prefix = Prefix;
    type Attr = u32;

    fn prefix(&self) -> Prefix {
        self.prefix.clone()
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn get_dbstate(&self, _listener_id: usize) -> Option<DbState<u32>> {
        self.dbstate.lock().unwrap().clone()
    }

    fn set_dbstate(&self, _listener_id: usize, state: DbState<u32>) {
        *self.dbstate.lock().unwrap() = Some(state);
    }

    fn clear_dbstate(&self, _listener_id: usize) {
        *self.dbstate.lock().unwrap() = None;
    }
}

/// Identity attribute database: every `u32` input is its own handle.
pub struct IdentityAttrDb;

impl AttrDatabase for IdentityAttrDb {
    type Attr = u32;
    type Input = u32;

    fn locate(&self, input: &u32) -> u32 {
        *input
    }
}

/// Export policy that advertises the given attribute to every candidate
/// peer, or withdraws (empty list, `false`) if there's no attribute.
pub struct AllowAllPolicy;

impl ExportPolicy<u32> for AllowAllPolicy {
    fn export(&self, peers: &PeerBitSet, attr: Option<&u32>) -> (bool, UpdateInfoList<u32>) {
        let mut list = UpdateInfoList::new();
        match attr {
            Some(a) if !peers.is_empty() => {
                list.push(UpdateInfo {
                    target: peers.clone(),
                    attrs: RibOutAttr::reachable(*a, vec![]),
                });
                (true, list)
            }
            _ => (false, list),
        }
    }
}

/// Message builder that records every `(attrs, prefix_bytes)` pair
/// passed to `add` instead of producing real wire bytes; `finish`
/// returns an index into the recorded message list so tests can inspect
/// exactly what was packed.
#[derive(Default)]
pub struct FakeMessageBuilder {
    sealed: PlMutex<Vec<Vec<(RibOutAttr<u32>, Vec<u8>)>>>,
}

impl FakeMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sealed_messages(&self) -> Vec<Vec<(RibOutAttr<u32>, Vec<u8>)>> {
        self.sealed.lock().clone()
    }
}

impl MessageBuilder<u32> for FakeMessageBuilder {
    type Message = Vec<(RibOutAttr<u32>, Vec<u8>)>;

    fn start(&self) -> Self::Message {
        Vec::new()
    }

    fn add(&self, message: &mut Self::Message, attrs: &RibOutAttr<u32>, prefixes: &[u8]) -> bool {
        message.push((attrs.clone(), prefixes.to_vec()));
        true
    }

    fn finish(&self, message: Self::Message) -> Vec<u8> {
        let mut sealed = self.sealed.lock();
        let index = sealed.len();
        sealed.push(message);
        (index as u32).to_be_bytes().to_vec()
    }
}

/// Transport where any peer index in `blocked` always reports backpressure
/// until `unblock` is called; every accepted send is recorded in order.
#[derive(Default)]
pub struct FakeTransport {
    blocked: PlMutex<std::collections::HashSet<usize>>,
    sent: PlMutex<Vec<(usize, Vec<u8>)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, peer: usize) {
        self.blocked.lock().insert(peer);
    }

    pub fn unblock(&self, peer: usize) {
        self.blocked.lock().remove(&peer);
    }

    pub fn sent(&self) -> Vec<(usize, Vec<u8>)> {
        self.sent.lock().clone()
    }
}

impl Transport for FakeTransport {
    fn send(&self, peer: usize, bytes: Vec<u8>, _on_writable: Box<dyn FnOnce() + Send>) -> bool {
        if self.blocked.lock().contains(&peer) {
            return false;
        }
        self.sent.lock().push((peer, bytes));
        true
    }
}

/// Spawns directly onto whatever Tokio runtime is current, same as
/// `task::TokioSpawner`, but distinct so tests can swap it for one that
/// records spawn calls without touching production code.
#[derive(Default)]
pub struct InlineSpawner;

impl TaskSpawner for InlineSpawner {
    fn spawn_partition(&self, fut: crate::external::BoxFuture<'static, ()>) {
        tokio::task::spawn(fut);
    }

    fn spawn_membership(&self, fut: crate::external::BoxFuture<'static, ()>) {
        tokio::task::spawn(fut);
    }

    fn spawn_send(&self, _group: usize, fut: crate::external::BoxFuture<'static, ()>) {
        tokio::task::spawn(fut);
    }

    fn spawn_send_ready(&self, fut: crate::external::BoxFuture<'static, ()>) {
        tokio::task::spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_route_table_notifies_listener_on_insert() {
        let table: FakeRouteTable<u32> = FakeRouteTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        table.register_listener(Box::new(move |_lid, entry| {
            seen_clone.lock().unwrap().push(entry.prefix());
        }));
        table.insert(7);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[test]
    fn fake_transport_blocks_until_unblocked() {
        let t = FakeTransport::new();
        t.block(1);
        assert!(!t.send(1, vec![], Box::new(|| {})));
        t.unblock(1);
        assert!(t.send(1, vec![1, 2, 3], Box::new(|| {})));
        assert_eq!(t.sent(), vec![(1, vec![1, 2, 3])]);
    }

    #[test]
    fn fake_message_builder_records_sealed_contents() {
        let b = FakeMessageBuilder::new();
        let mut m = b.start();
        b.add(&mut m, &RibOutAttr::reachable(1u32, vec![]), &[9]);
        b.finish(m);
        let sealed = b.sealed_messages();
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0][0].1, vec![9]);
    }
}

//! The dependency graph store: for each target, the stamp of its last
//! successful build and the dependencies that build observed.

use crate::stamp::Stamp;
use rustc_hash::FxHashMap;

/// A dependency observed during a build, with the stamp it had then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dep {
    pub target: String,
    pub stamp: Stamp,
}

/// The committed state of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub stamp: Stamp,
    /// Dependencies in the order they were declared.
    pub deps: Vec<Dep>,
}

/// Storage for build records.  The engine only talks to a store through
/// this trait, so tests can run against MemoryStore while the CLI uses the
/// on-disk db::DiskStore.
pub trait Store {
    /// The last committed record for a target, if it was ever built.
    fn record(&self, target: &str) -> Option<&Record>;

    fn get_stamp(&self, target: &str) -> Option<Stamp> {
        self.record(target).map(|record| record.stamp)
    }

    /// Start a fresh (empty) pending dependency set for a build of `target`.
    fn begin(&mut self, target: &str);

    /// Note that the in-progress build of `from` depends on `to`.
    fn record_dependency(&mut self, from: &str, to: &str, stamp: Stamp);

    /// Replace the target's record with `stamp` and the pending deps.
    fn commit(&mut self, target: &str, stamp: Stamp) -> std::io::Result<()>;

    /// Drop the pending deps of a failed build; the record is untouched.
    fn abandon(&mut self, target: &str);
}

/// A Store that lives only in memory.
#[derive(Default, Debug)]
pub struct MemoryStore {
    records: FxHashMap<String, Record>,
    pending: FxHashMap<String, Vec<Dep>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record directly, bypassing the pending set.
    pub fn insert(&mut self, target: String, record: Record) {
        self.records.insert(target, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove and return the pending deps of a build of `target`.
    pub fn take_pending(&mut self, target: &str) -> Vec<Dep> {
        self.pending.remove(target).unwrap_or_default()
    }

    /// All records, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Record)> {
        self.records.iter()
    }
}

impl Store for MemoryStore {
    fn record(&self, target: &str) -> Option<&Record> {
        self.records.get(target)
    }

    fn begin(&mut self, target: &str) {
        self.pending.insert(target.to_owned(), Vec::new());
    }

    fn record_dependency(&mut self, from: &str, to: &str, stamp: Stamp) {
        let deps = self.pending.entry(from.to_owned()).or_default();
        match deps.iter_mut().find(|dep| dep.target == to) {
            Some(dep) => dep.stamp = stamp,
            None => deps.push(Dep {
                target: to.to_owned(),
                stamp,
            }),
        }
    }

    fn commit(&mut self, target: &str, stamp: Stamp) -> std::io::Result<()> {
        let deps = self.take_pending(target);
        self.records.insert(target.to_owned(), Record { stamp, deps });
        Ok(())
    }

    fn abandon(&mut self, target: &str) {
        self.pending.remove(target);
    }
}

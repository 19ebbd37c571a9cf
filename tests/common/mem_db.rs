//! A simple, volatile, in-memory implementation of [`KVStore`].

use std::{
    collections::{BTreeMap, HashSet},
    ops::Bound,
    sync::{Arc, Mutex},
};

use lattice_rs::store::{KVGet, KVStore, WriteBatch};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// An in-memory implementation of [`KVStore`]. Keys are kept sorted so that prefix reads come out in
/// ascending key order.
///
/// The map sits behind an `Arc` that writes copy on demand, so a snapshot is a clone of the `Arc` and
/// never holds the lock.
#[derive(Clone)]
pub(crate) struct MemDB(Arc<Mutex<Arc<Map>>>);

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB(Arc::new(Mutex::new(Arc::new(BTreeMap::new()))))
    }

    /// Number of keys stored.
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Every key-value pair stored, in ascending key order.
    pub(crate) fn contents(&self) -> Map {
        self.0.lock().unwrap().as_ref().clone()
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;
    type Snapshot<'a> = MemDBSnapshot;

    fn write(&mut self, wb: Self::WriteBatch) {
        let mut guard = self.0.lock().unwrap();
        let map = Arc::make_mut(&mut guard);
        for (key, value) in wb.insertions {
            map.insert(key, value);
        }
        for key in wb.deletions {
            map.remove(&key);
        }
    }

    fn clear(&mut self) {
        *self.0.lock().unwrap() = Arc::new(BTreeMap::new());
    }

    fn snapshot<'b>(&'b self) -> MemDBSnapshot {
        MemDBSnapshot(Arc::clone(&self.0.lock().unwrap()))
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn get_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        prefix_range(&self.0.lock().unwrap(), prefix)
    }
}

// A simple implementation of [`WriteBatch`].
pub(crate) struct MemWriteBatch {
    insertions: BTreeMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: BTreeMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}

/// A simple implementation of [`KVGet`] used as `KVStore::Snapshot` for `MemDB`.
pub(crate) struct MemDBSnapshot(Arc<Map>);

impl KVGet for MemDBSnapshot {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }

    fn get_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        prefix_range(&self.0, prefix)
    }
}

fn prefix_range(map: &Map, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

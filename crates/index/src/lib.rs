//! # Index
//!
//! A concurrent, insertion-fast store that resolves a `(left, right)` name
//! pair to the set of values registered under it. In the stub registry the
//! left name is a gRPC service and the right name a method, but the store is
//! generic over anything implementing [`Value`].
//!
//! ## Key derivation
//!
//! Left and right names are interned to sequential `u64` ids on first use,
//! and a bucket is keyed by the `(left_id, right_id)` pair. Interning makes
//! the composite key collision-free by construction: equal strings always
//! map to the same id and unequal strings never share one.
//!
//! ## Lookup semantics
//!
//! [`Storage::find_all`] first resolves the full left name. When the left
//! name is dotted (`pkg.v1.Greeter`), the substring after the last dot is
//! tried as well, so stubs registered under the unqualified service name are
//! reachable through the fully-qualified one. The error ladder distinguishes
//! an unknown left name ([`StorageError::LeftNotFound`]) from a known left
//! name without the requested right name ([`StorageError::RightNotFound`]).
//!
//! ## Concurrency
//!
//! A single reader-writer lock guards the maps: lookups take it shared,
//! mutations exclusively. Enumeration copies `Arc` handles under the lock
//! and releases it before the caller consumes the result, so readers never
//! hold the lock across user code. Values are replaced, never mutated in
//! place; handles captured by earlier readers stay valid.

use std::sync::{Arc, RwLock};

use hashbrown::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// A value that can be registered in the store.
pub trait Value: Send + Sync {
    /// Primary key; unique across the store.
    fn key(&self) -> Uuid;
    /// Left half of the bucket name (service).
    fn left(&self) -> &str;
    /// Right half of the bucket name (method).
    fn right(&self) -> &str;
    /// Sort weight for enumeration; higher values are yielded first.
    fn score(&self) -> i64;
}

/// Lookup failures, wrapped into domain errors by the caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// The left name has never been registered.
    #[error("left not found")]
    LeftNotFound,
    /// The left name is known but has no bucket for the right name.
    #[error("right not found")]
    RightNotFound,
}

/// Concurrent `(left, right)` keyed store.
pub struct Storage<V> {
    inner: RwLock<Inner<V>>,
}

struct Inner<V> {
    left_ids: HashMap<String, u64>,
    right_ids: HashMap<String, u64>,
    left_seq: u64,
    right_seq: u64,
    buckets: HashMap<(u64, u64), HashMap<Uuid, Arc<V>>>,
    by_id: HashMap<Uuid, Arc<V>>,
}

impl<V> Default for Storage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Storage<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                left_ids: HashMap::new(),
                right_ids: HashMap::new(),
                left_seq: 0,
                right_seq: 0,
                buckets: HashMap::new(),
                by_id: HashMap::new(),
            }),
        }
    }
}

impl<V: Value> Storage<V> {
    /// Insert or replace values by primary key, returning the keys in input
    /// order. A value previously registered under a different name pair is
    /// removed from its old bucket within the same critical section.
    pub fn upsert(&self, values: impl IntoIterator<Item = V>) -> Vec<Uuid> {
        let mut inner = self.inner.write().expect("index lock poisoned");
        let mut keys = Vec::new();

        for value in values {
            let id = value.key();
            let handle = Arc::new(value);

            let left_id = inner.left_id_or_new(handle.left());
            let right_id = inner.right_id_or_new(handle.right());
            let bucket_key = (left_id, right_id);

            if let Some(previous) = inner.by_id.insert(id, Arc::clone(&handle)) {
                let old_key = (
                    inner.left_ids[previous.left()],
                    inner.right_ids[previous.right()],
                );
                if old_key != bucket_key {
                    if let Some(bucket) = inner.buckets.get_mut(&old_key) {
                        bucket.remove(&id);
                    }
                }
            }

            inner
                .buckets
                .entry(bucket_key)
                .or_default()
                .insert(id, handle);
            keys.push(id);
        }

        tracing::debug!(count = keys.len(), "upserted values");
        keys
    }

    /// Delete values by key, returning how many were removed. Name
    /// registrations and buckets persist, so a later lookup on a known pair
    /// yields an empty result rather than an error.
    pub fn del(&self, keys: &[Uuid]) -> usize {
        let mut inner = self.inner.write().expect("index lock poisoned");
        let mut deleted = 0;

        for key in keys {
            if let Some(value) = inner.by_id.remove(key) {
                let bucket_key = (
                    inner.left_ids[value.left()],
                    inner.right_ids[value.right()],
                );
                if let Some(bucket) = inner.buckets.get_mut(&bucket_key) {
                    bucket.remove(key);
                }
                deleted += 1;
            }
        }

        tracing::debug!(deleted, "deleted values");
        deleted
    }

    /// Drop every value and every name registration.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("index lock poisoned");
        inner.left_ids.clear();
        inner.right_ids.clear();
        inner.left_seq = 0;
        inner.right_seq = 0;
        inner.buckets.clear();
        inner.by_id.clear();
        tracing::debug!("cleared index");
    }

    /// Snapshot of every stored value, in no particular order.
    pub fn values(&self) -> Vec<Arc<V>> {
        let inner = self.inner.read().expect("index lock poisoned");
        inner.by_id.values().cloned().collect()
    }

    pub fn find_by_id(&self, key: Uuid) -> Option<Arc<V>> {
        let inner = self.inner.read().expect("index lock poisoned");
        inner.by_id.get(&key).cloned()
    }

    /// Resolve several keys at once, silently skipping misses.
    pub fn find_by_ids<'a>(&self, keys: impl IntoIterator<Item = &'a Uuid>) -> Vec<Arc<V>> {
        let inner = self.inner.read().expect("index lock poisoned");
        keys.into_iter()
            .filter_map(|key| inner.by_id.get(key).cloned())
            .collect()
    }

    /// All values registered under `(left, right)`, including the suffix
    /// fallback for dotted left names, sorted by descending score with ties
    /// broken by ascending key.
    pub fn find_all(&self, left: &str, right: &str) -> Result<Vec<Arc<V>>, StorageError> {
        let inner = self.inner.read().expect("index lock poisoned");
        let bucket_keys = inner.resolve(left, right)?;

        let mut found: Vec<Arc<V>> = bucket_keys
            .iter()
            .filter_map(|key| inner.buckets.get(key))
            .flat_map(|bucket| bucket.values().cloned())
            .collect();
        drop(inner);

        found.sort_unstable_by(|a, b| b.score().cmp(&a.score()).then(a.key().cmp(&b.key())));
        Ok(found)
    }
}

impl<V: Value> Inner<V> {
    fn left_id_or_new(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.left_ids.get(name) {
            return id;
        }
        self.left_seq += 1;
        self.left_ids.insert(name.to_owned(), self.left_seq);
        self.left_seq
    }

    fn right_id_or_new(&mut self, name: &str) -> u64 {
        if let Some(&id) = self.right_ids.get(name) {
            return id;
        }
        self.right_seq += 1;
        self.right_ids.insert(name.to_owned(), self.right_seq);
        self.right_seq
    }

    /// Bucket key for an already-registered name pair.
    fn position(&self, left: &str, right: &str) -> Result<(u64, u64), StorageError> {
        let left_id = *self.left_ids.get(left).ok_or(StorageError::LeftNotFound)?;
        let right_id = *self
            .right_ids
            .get(right)
            .ok_or(StorageError::RightNotFound)?;
        let key = (left_id, right_id);
        if !self.buckets.contains_key(&key) {
            return Err(StorageError::RightNotFound);
        }
        Ok(key)
    }

    /// Resolution ladder: the full left name first, then the substring after
    /// its last dot. A missing right name under the suffix is decisive when
    /// nothing else resolved; otherwise the error from the full attempt wins.
    fn resolve(&self, left: &str, right: &str) -> Result<Vec<(u64, u64)>, StorageError> {
        let mut keys = Vec::with_capacity(2);

        let full = self.position(left, right);
        if let Ok(key) = full {
            keys.push(key);
        }

        if let Some(dot) = left.rfind('.') {
            match self.position(&left[dot + 1..], right) {
                Ok(key) => keys.push(key),
                Err(StorageError::RightNotFound) if keys.is_empty() => {
                    return Err(StorageError::RightNotFound);
                }
                Err(_) => {}
            }
        }

        if keys.is_empty() {
            return Err(full.expect_err("no keys resolved implies the full lookup failed"));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct TestItem {
        id: Uuid,
        left: String,
        right: String,
        weight: i64,
    }

    impl TestItem {
        fn new(left: &str, right: &str) -> Self {
            Self::with_weight(left, right, 0)
        }

        fn with_weight(left: &str, right: &str, weight: i64) -> Self {
            Self {
                id: Uuid::new_v4(),
                left: left.to_owned(),
                right: right.to_owned(),
                weight,
            }
        }
    }

    impl Value for TestItem {
        fn key(&self) -> Uuid {
            self.id
        }
        fn left(&self) -> &str {
            &self.left
        }
        fn right(&self) -> &str {
            &self.right
        }
        fn score(&self) -> i64 {
            self.weight
        }
    }

    #[test]
    fn interned_ids_are_sequential_per_side() {
        let storage = Storage::new();
        storage.upsert([
            TestItem::new("Greeter1", "SayHello1"),
            TestItem::new("Greeter1", "SayHello1"),
            TestItem::new("Greeter2", "SayHello2"),
            TestItem::new("Greeter3", "SayHello2"),
            TestItem::new("Greeter4", "SayHello3"),
            TestItem::new("Greeter5", "SayHello3"),
        ]);

        let inner = storage.inner.read().expect("lock");
        assert_eq!(inner.left_seq, 5);
        assert_eq!(inner.right_seq, 3);
        assert_eq!(inner.left_ids["Greeter1"], 1);
        assert_eq!(inner.right_ids["SayHello3"], 3);
        assert_eq!(inner.buckets.len(), 5);
        assert_eq!(inner.by_id.len(), 6);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let id = Uuid::new_v4();
        let storage = Storage::new();

        let mut item = TestItem::new("Greeter", "SayHello");
        item.id = id;
        storage.upsert([item]);

        {
            let inner = storage.inner.read().expect("lock");
            assert_eq!(inner.by_id.len(), 1);
            assert_eq!(inner.buckets.len(), 1);
        }
        assert_eq!(storage.find_by_id(id).expect("present").weight, 0);

        let mut replacement = TestItem::with_weight("Greeter", "SayHello", 42);
        replacement.id = id;
        storage.upsert([replacement]);

        {
            let inner = storage.inner.read().expect("lock");
            assert_eq!(inner.by_id.len(), 1);
            assert_eq!(inner.buckets.len(), 1);
            assert_eq!(inner.left_seq, 1);
            assert_eq!(inner.right_seq, 1);
        }
        assert_eq!(storage.find_by_id(id).expect("present").weight, 42);
    }

    #[test]
    fn upsert_moves_value_between_buckets() {
        let id = Uuid::new_v4();
        let storage = Storage::new();

        let mut item = TestItem::new("Greeter1", "SayHello");
        item.id = id;
        storage.upsert([item]);

        let mut moved = TestItem::new("Greeter2", "SayHello");
        moved.id = id;
        storage.upsert([moved]);

        let old = storage.find_all("Greeter1", "SayHello").expect("bucket known");
        assert!(old.is_empty());

        let new = storage.find_all("Greeter2", "SayHello").expect("bucket known");
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].key(), id);
        assert_eq!(storage.values().len(), 1);
    }

    #[test]
    fn find_by_id_and_batch_lookup() {
        let storage = Storage::new();
        assert!(storage.find_by_id(Uuid::new_v4()).is_none());

        let target = TestItem::new("Greeter1", "SayHello3");
        let target_id = target.id;
        storage.upsert([
            TestItem::new("Greeter1", "SayHello1"),
            TestItem::new("Greeter2", "SayHello2"),
            target,
        ]);

        let found = storage.find_by_id(target_id).expect("present");
        assert_eq!(found.key(), target_id);

        let missing = Uuid::new_v4();
        let batch = storage.find_by_ids([&target_id, &missing]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key(), target_id);
    }

    #[test]
    fn find_all_error_ladder() {
        let storage = Storage::new();
        storage.upsert([TestItem::new("Greeter1", "SayHello1")]);

        assert_eq!(
            storage.find_all("hello", "SayHello1").unwrap_err(),
            StorageError::LeftNotFound
        );
        assert_eq!(
            storage.find_all("Greeter1", "world").unwrap_err(),
            StorageError::RightNotFound
        );
        assert_eq!(
            storage.find_all("helloworld.Greeter1", "world").unwrap_err(),
            StorageError::RightNotFound
        );
        assert_eq!(
            storage
                .find_all("helloworld.v1.Greeter1", "world")
                .unwrap_err(),
            StorageError::RightNotFound
        );
        assert!(storage.find_all("Greeter1", "SayHello1").is_ok());
        assert!(storage.find_all("helloworld.Greeter1", "SayHello1").is_ok());
        assert!(storage
            .find_all("helloworld.v1.Greeter1", "SayHello1")
            .is_ok());
    }

    #[test]
    fn find_all_unions_full_and_suffix_buckets() {
        let storage = Storage::new();
        let qualified = TestItem::new("helloworld.v1.Greeter", "SayHello");
        let plain = TestItem::new("Greeter", "SayHello");
        let qualified_id = qualified.id;
        let plain_id = plain.id;
        storage.upsert([qualified, plain]);

        let both = storage
            .find_all("helloworld.v1.Greeter", "SayHello")
            .expect("resolves");
        let mut ids: Vec<Uuid> = both.iter().map(|v| v.key()).collect();
        ids.sort();
        let mut expected = vec![qualified_id, plain_id];
        expected.sort();
        assert_eq!(ids, expected);

        let plain_only = storage.find_all("Greeter", "SayHello").expect("resolves");
        assert_eq!(plain_only.len(), 1);
        assert_eq!(plain_only[0].key(), plain_id);
    }

    #[test]
    fn find_all_sorts_by_score_descending() {
        let storage = Storage::new();
        storage.upsert([
            TestItem::with_weight("Greeter", "SayHello", 10),
            TestItem::with_weight("Greeter", "SayHello", 30),
            TestItem::with_weight("Greeter", "SayHello", 20),
        ]);

        let sorted = storage.find_all("Greeter", "SayHello").expect("resolves");
        let weights: Vec<i64> = sorted.iter().map(|v| v.score()).collect();
        assert_eq!(weights, vec![30, 20, 10]);
    }

    #[test]
    fn delete_keeps_name_registrations() {
        let storage = Storage::new();
        let a = TestItem::new("Greeter1", "SayHello1");
        let b = TestItem::new("Greeter2", "SayHello2");
        let c = TestItem::new("Greeter3", "SayHello3");
        let (id_a, id_b, id_c) = (a.id, b.id, c.id);
        storage.upsert([a, b, c]);

        assert_eq!(storage.del(&[]), 0);
        assert_eq!(storage.del(&[Uuid::new_v4()]), 0);
        assert_eq!(storage.del(&[id_a]), 1);
        assert_eq!(storage.del(&[id_b, id_c]), 2);
        assert_eq!(storage.del(&[id_a]), 0);

        assert!(storage.values().is_empty());
        let inner = storage.inner.read().expect("lock");
        assert_eq!(inner.left_seq, 3);
        assert_eq!(inner.right_seq, 3);
        assert_eq!(inner.buckets.len(), 3);
        drop(inner);

        let empty = storage.find_all("Greeter1", "SayHello1").expect("still known");
        assert!(empty.is_empty());
    }

    #[test]
    fn clear_resets_everything() {
        let storage = Storage::new();
        storage.upsert([
            TestItem::new("Greeter1", "SayHello1"),
            TestItem::new("Greeter2", "SayHello2"),
        ]);

        storage.clear();

        assert!(storage.values().is_empty());
        assert_eq!(
            storage.find_all("Greeter1", "SayHello1").unwrap_err(),
            StorageError::LeftNotFound
        );
    }

    #[test]
    fn handles_captured_before_replacement_stay_valid() {
        let id = Uuid::new_v4();
        let storage = Storage::new();

        let mut item = TestItem::with_weight("Greeter", "SayHello", 1);
        item.id = id;
        storage.upsert([item]);
        let captured = storage.find_by_id(id).expect("present");

        let mut replacement = TestItem::with_weight("Greeter", "SayHello", 2);
        replacement.id = id;
        storage.upsert([replacement]);

        assert_eq!(captured.weight, 1);
        assert_eq!(storage.find_by_id(id).expect("present").weight, 2);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let storage = Arc::new(Storage::new());

        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        storage.upsert([TestItem::new(
                            &format!("Service{worker}"),
                            &format!("Method{i}"),
                        )]);
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let storage = Arc::clone(&storage);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _ = storage.values();
                        let _ = storage.find_all("Service0", "Method0");
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().expect("thread panicked");
        }

        assert_eq!(storage.values().len(), 200);
    }
}

//! Generic hash table engine.
//!
//! Corresponds to the `Jim_HashTable` family in `jim.c`.
//!
//! Open hashing with per-bucket chains, a power-of-two bucket array, and a
//! per-table salt mixed into every hash so attacker-controlled keys (command
//! and variable names arriving from scripts) cannot force pathological
//! chains.  Tables only ever grow: from empty to [`INITIAL_SIZE`] on the
//! first insert, then doubling whenever `used == size`.  Lookup and update
//! cost dominate the variable/command workloads, so there is no
//! shrink-on-delete.
//!
//! The original's type descriptor (hash / compare / dup / destroy hooks) is
//! the [`TableKey`] trait for keys; value duplication and destruction are
//! `Clone` and `Drop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bucket count installed by the first insert.
pub const INITIAL_SIZE: usize = 16;

/// Bucket counts never exceed this (2^31).
const MAX_SIZE: usize = 1 << 31;

// ── Key hooks ─────────────────────────────────────────────────────────────

/// Hash/compare hook bundle for table keys.
///
/// `key_eq` defaults to `==`; supply your own to get e.g. identity
/// comparison for pointer-like keys.
pub trait TableKey: Clone + PartialEq {
    fn key_hash(&self) -> u64;

    fn key_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl TableKey for String {
    /// The classic `h*33 + c` string hash the original uses for command and
    /// variable names.
    fn key_hash(&self) -> u64 {
        let mut h: u64 = 5381;
        for &b in self.as_bytes() {
            h = h.wrapping_mul(33).wrapping_add(u64::from(b));
        }
        h
    }
}

impl TableKey for i64 {
    fn key_hash(&self) -> u64 {
        (*self as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

impl TableKey for u64 {
    fn key_hash(&self) -> u64 {
        self.wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

// ── Table ─────────────────────────────────────────────────────────────────

struct Entry<K, V> {
    key: K,
    val: V,
    next: Option<Box<Entry<K, V>>>,
}

/// An open-hashing chained hash table.
pub struct HashTable<K: TableKey, V> {
    /// Bucket array; empty until the first insert.
    buckets: Vec<Option<Box<Entry<K, V>>>>,
    mask: u64,
    used: usize,
    collisions: usize,
    /// Per-table salt mixed into every hash; preserved across `expand`.
    uniq: u64,
}

/// Per-process component of the salt, so two tables created within the same
/// clock tick still hash differently.
static UNIQ_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fresh_uniq() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);
    let n = UNIQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos ^ n.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

impl<K: TableKey, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TableKey, V> HashTable<K, V> {
    /// An empty table.  No buckets are allocated until the first insert.
    pub fn new() -> Self {
        HashTable {
            buckets: Vec::new(),
            mask: 0,
            used: 0,
            collisions: 0,
            uniq: fresh_uniq(),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Current bucket count (0 before the first insert).
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Inserts that landed on an occupied bucket, for diagnostics.
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    fn bucket_of(&self, key: &K) -> usize {
        (key.key_hash().wrapping_add(self.uniq) & self.mask) as usize
    }

    /// Grow the bucket array to at least `min` slots and rehash every entry.
    /// A no-op when `min <= used` (the table is already big enough for the
    /// live entries) or the table is at the size cap.
    pub fn expand(&mut self, min: usize) {
        if min <= self.used {
            return;
        }
        let mut size = INITIAL_SIZE;
        while size < min && size < MAX_SIZE {
            size *= 2;
        }
        if size <= self.buckets.len() {
            return;
        }
        let mut fresh: Vec<Option<Box<Entry<K, V>>>> = Vec::with_capacity(size);
        fresh.resize_with(size, || None);
        let old = std::mem::replace(&mut self.buckets, fresh);
        self.mask = (size - 1) as u64;
        self.collisions = 0;
        for mut slot in old {
            while let Some(mut entry) = slot {
                slot = entry.next.take();
                let idx = self.bucket_of(&entry.key);
                if self.buckets[idx].is_some() {
                    self.collisions += 1;
                }
                entry.next = self.buckets[idx].take();
                self.buckets[idx] = Some(entry);
            }
        }
    }

    /// Grow before an insert that would exceed capacity.
    fn expand_if_needed(&mut self) {
        if self.buckets.is_empty() {
            self.expand(INITIAL_SIZE);
        } else if self.used == self.buckets.len() {
            self.expand(self.buckets.len() * 2);
        }
    }

    fn find_entry(&self, key: &K) -> Option<&Entry<K, V>> {
        if self.buckets.is_empty() {
            return None;
        }
        let mut link = self.buckets[self.bucket_of(key)].as_deref();
        while let Some(entry) = link {
            if entry.key.key_eq(key) {
                return Some(entry);
            }
            link = entry.next.as_deref();
        }
        None
    }

    /// Insert a new key.  Fails (leaving the table untouched) when the key
    /// is already present — the engine's only designed failure path.
    pub fn add(&mut self, key: K, val: V) -> Result<(), ()> {
        if self.find_entry(&key).is_some() {
            return Err(());
        }
        self.insert_new(key, val);
        Ok(())
    }

    /// Insert or overwrite.  Returns `true` when the key was new; an
    /// existing entry has its value slot reused in place.
    pub fn replace(&mut self, key: K, val: V) -> bool {
        if let Some(slot) = self.find_mut(&key) {
            // Drop the old value only after the new one is in place.
            *slot = val;
            return false;
        }
        self.insert_new(key, val);
        true
    }

    fn insert_new(&mut self, key: K, val: V) {
        self.expand_if_needed();
        let idx = self.bucket_of(&key);
        if self.buckets[idx].is_some() {
            self.collisions += 1;
        }
        let entry = Box::new(Entry { key, val, next: self.buckets[idx].take() });
        self.buckets[idx] = Some(entry);
        self.used += 1;
    }

    pub fn find(&self, key: &K) -> Option<&V> {
        self.find_entry(key).map(|e| &e.val)
    }

    pub fn find_mut(&mut self, key: &K) -> Option<&mut V> {
        if self.buckets.is_empty() {
            return None;
        }
        let idx = self.bucket_of(key);
        let mut link = self.buckets[idx].as_deref_mut();
        while let Some(entry) = link {
            if entry.key.key_eq(key) {
                return Some(&mut entry.val);
            }
            link = entry.next.as_deref_mut();
        }
        None
    }

    pub fn contains(&self, key: &K) -> bool {
        self.find_entry(key).is_some()
    }

    /// Unlink and return the value for `key`, or `None` if absent.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if self.buckets.is_empty() {
            return None;
        }
        let idx = self.bucket_of(key);
        // Pop the chain and rebuild it without the matching entry; order
        // within a bucket carries no meaning.
        let mut chain = self.buckets[idx].take();
        let mut kept: Option<Box<Entry<K, V>>> = None;
        let mut removed = None;
        while let Some(mut entry) = chain {
            chain = entry.next.take();
            if removed.is_none() && entry.key.key_eq(key) {
                removed = Some(entry.val);
                self.used -= 1;
            } else {
                entry.next = kept;
                kept = Some(entry);
            }
        }
        self.buckets[idx] = kept;
        removed
    }

    /// Drop every entry; bucket array and salt are kept.
    pub fn clear(&mut self) {
        for slot in &mut self.buckets {
            *slot = None;
        }
        self.used = 0;
        self.collisions = 0;
    }

    /// Read-only iteration over `(key, value)` pairs in bucket order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter { table: self, bucket: 0, entry: None }
    }

    /// A deletion-tolerant cursor over the table's keys.
    pub fn cursor(&self) -> TableCursor<K> {
        TableCursor { bucket: 0, pending: Vec::new() }
    }
}

impl<K: TableKey, V: Clone> Clone for HashTable<K, V> {
    fn clone(&self) -> Self {
        let mut dup = HashTable::new();
        if !self.is_empty() {
            dup.expand(self.used);
            for (k, v) in self.iter() {
                dup.insert_new(k.clone(), v.clone());
            }
        }
        dup
    }
}

// ── Borrowing iterator ────────────────────────────────────────────────────

pub struct Iter<'a, K: TableKey, V> {
    table: &'a HashTable<K, V>,
    bucket: usize,
    entry: Option<&'a Entry<K, V>>,
}

impl<'a, K: TableKey, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<(&'a K, &'a V)> {
        loop {
            if let Some(entry) = self.entry {
                self.entry = entry.next.as_deref();
                return Some((&entry.key, &entry.val));
            }
            if self.bucket >= self.table.buckets.len() {
                return None;
            }
            self.entry = self.table.buckets[self.bucket].as_deref();
            self.bucket += 1;
        }
    }
}

// ── Cursor ────────────────────────────────────────────────────────────────

/// Walks bucket 0..size and, within a bucket, the entry chain.  On entering
/// a bucket the whole chain of keys is snapshotted, so the caller may delete
/// the yielded entry (or any other) between `next` calls — the same
/// guarantee the original gets by saving the `next` pointer before yielding.
/// Keys deleted mid-walk are silently skipped.
pub struct TableCursor<K> {
    bucket: usize,
    pending: Vec<K>,
}

impl<K: TableKey> TableCursor<K> {
    pub fn next<V>(&mut self, table: &HashTable<K, V>) -> Option<K> {
        loop {
            if let Some(key) = self.pending.pop() {
                if table.contains(&key) {
                    return Some(key);
                }
                continue;
            }
            if self.bucket >= table.buckets.len() {
                return None;
            }
            let mut link = table.buckets[self.bucket].as_deref();
            while let Some(entry) = link {
                self.pending.push(entry.key.clone());
                link = entry.next.as_deref();
            }
            self.bucket += 1;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: usize) -> String {
        format!("key{n}")
    }

    #[test]
    fn add_find_remove_round_trip() {
        let mut t: HashTable<String, i64> = HashTable::new();
        assert!(t.add(key(1), 10).is_ok());
        assert!(t.add(key(2), 20).is_ok());
        assert_eq!(t.find(&key(1)), Some(&10));
        assert_eq!(t.find(&key(2)), Some(&20));
        assert_eq!(t.len(), 2);
        assert_eq!(t.remove(&key(1)), Some(10));
        assert_eq!(t.find(&key(1)), None);
        assert_eq!(t.len(), 1);
        assert_eq!(t.remove(&key(1)), None);
    }

    #[test]
    fn add_duplicate_fails() {
        let mut t: HashTable<String, i64> = HashTable::new();
        assert!(t.add(key(1), 1).is_ok());
        assert!(t.add(key(1), 2).is_err());
        assert_eq!(t.find(&key(1)), Some(&1));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn replace_reuses_entry() {
        let mut t: HashTable<String, i64> = HashTable::new();
        assert!(t.replace(key(1), 1));
        assert!(!t.replace(key(1), 2));
        assert_eq!(t.find(&key(1)), Some(&2));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn first_insert_allocates_initial_size() {
        let mut t: HashTable<String, i64> = HashTable::new();
        assert_eq!(t.size(), 0);
        t.replace(key(1), 1);
        assert_eq!(t.size(), INITIAL_SIZE);
    }

    #[test]
    fn growth_doubles_and_keeps_entries() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..100 {
            t.replace(key(n), n);
        }
        assert!(t.size() >= 128);
        assert!(t.size().is_power_of_two());
        assert_eq!(t.len(), 100);
        for n in 0..100 {
            assert_eq!(t.find(&key(n)), Some(&n));
        }
    }

    #[test]
    fn expand_is_noop_when_small() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..20 {
            t.replace(key(n), n);
        }
        let size = t.size();
        t.expand(5); // 5 <= used
        assert_eq!(t.size(), size);
    }

    #[test]
    fn explicit_expand_preserves_lookups() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..10 {
            t.replace(key(n), n);
        }
        let uniq = t.uniq;
        t.expand(1000);
        assert_eq!(t.uniq, uniq);
        assert_eq!(t.size(), 1024);
        for n in 0..10 {
            assert_eq!(t.find(&key(n)), Some(&n));
        }
    }

    #[test]
    fn used_tracks_live_keys() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..50 {
            t.replace(key(n), n);
        }
        for n in 0..25 {
            t.remove(&key(n));
        }
        assert_eq!(t.len(), 25);
        t.clear();
        assert_eq!(t.len(), 0);
        assert_eq!(t.find(&key(30)), None);
    }

    #[test]
    fn iter_visits_everything_once() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..40 {
            t.replace(key(n), n);
        }
        let mut seen: Vec<usize> = t.iter().map(|(_, v)| *v).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn cursor_tolerates_deleting_yielded_entry() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..32 {
            t.replace(key(n), n);
        }
        let mut cursor = t.cursor();
        let mut visited = 0;
        while let Some(k) = cursor.next(&t) {
            t.remove(&k);
            visited += 1;
        }
        assert_eq!(visited, 32);
        assert!(t.is_empty());
    }

    #[test]
    fn cursor_on_empty_table() {
        let t: HashTable<String, usize> = HashTable::new();
        let mut cursor = t.cursor();
        assert_eq!(cursor.next(&t), None);
    }

    #[test]
    fn salts_differ_between_tables() {
        let a: HashTable<String, ()> = HashTable::new();
        let b: HashTable<String, ()> = HashTable::new();
        assert_ne!(a.uniq, b.uniq);
    }

    #[test]
    fn clone_copies_entries() {
        let mut t: HashTable<String, usize> = HashTable::new();
        for n in 0..10 {
            t.replace(key(n), n);
        }
        let dup = t.clone();
        t.remove(&key(0));
        assert_eq!(dup.len(), 10);
        assert_eq!(dup.find(&key(0)), Some(&0));
    }
}

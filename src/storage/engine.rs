//! Thread-Safe Keyspace with Lazy Expiry
//!
//! This module implements the keyspace shared by every worker.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over shards to reduce contention.
//! 2. **Lazy Expiry**: Keys are checked for expiry on access; there is no background sweep.
//! 3. **Consistent Scans**: Whole-keyspace operations lock every shard, in index order,
//!    so a snapshot never observes a half-applied SET.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Keyspace                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single-key operations lock exactly one shard. Scans take all shard locks
//! in ascending index order, which is the only multi-lock order in the crate.

use crate::storage::value::{Entry, Expiry, Value};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of shards for the keyspace.
const NUM_SHARDS: usize = 64;

/// What a shard stores per key.
#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expiry: Option<Expiry>,
}

impl Slot {
    #[inline]
    fn is_expired(&self) -> bool {
        self.expiry.map(|e| e.is_expired()).unwrap_or(false)
    }
}

type ShardMap = HashMap<String, Slot>;

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<ShardMap>,
}

impl Shard {
    // A panic while holding a shard lock cannot leave a map half-updated
    // (every mutation is a single insert/remove), so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// A consistent point-in-time view of the keyspace, used by the snapshot writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceSnapshot {
    /// Entries in the backing maps before expired keys were evicted.
    pub size: usize,
    /// Entries carrying an expiry, counted at the same moment as `size`.
    pub expires: usize,
    /// Live entries only.
    pub entries: Vec<Entry>,
}

/// Keyspace statistics for INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStats {
    pub keys: usize,
    pub expires: usize,
    pub get_ops: u64,
    pub set_ops: u64,
    pub expired: u64,
}

/// The keyspace: maps text keys to values with optional expiry.
///
/// Wrapped in an `Arc` and shared by every worker; all operations are
/// thread-safe.
///
/// # Example
///
/// ```
/// use snapkv::storage::{Keyspace, Value};
///
/// let keyspace = Keyspace::new();
/// keyspace.set("name".to_string(), Value::from("alice"), None);
/// assert_eq!(keyspace.get("name"), Some(Value::from("alice")));
/// ```
pub struct Keyspace {
    shards: Vec<Shard>,
    get_count: AtomicU64,
    set_count: AtomicU64,
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("shards", &self.shards.len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Locks every shard for writing, in index order.
    fn lock_all(&self) -> Vec<RwLockWriteGuard<'_, ShardMap>> {
        self.shards.iter().map(Shard::write).collect()
    }

    /// Locks every shard for reading, in index order.
    fn read_all(&self) -> Vec<RwLockReadGuard<'_, ShardMap>> {
        self.shards.iter().map(Shard::read).collect()
    }

    /// Gets the value for a key.
    ///
    /// An entry whose expiry has passed is evicted and reported as absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);

        // Fast path under the read lock
        {
            let data = shard.read();
            match data.get(key) {
                Some(slot) if !slot.is_expired() => return Some(slot.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut data = shard.write();
        if let Some(slot) = data.get(key) {
            if slot.is_expired() {
                data.remove(key);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            // Race: another worker replaced the key between the two locks
            return Some(slot.value.clone());
        }

        None
    }

    /// Sets a key, overwriting any existing entry.
    ///
    /// If `expiry` is already in the past the key ends up absent: nothing is
    /// stored and any previous entry is evicted.
    ///
    /// # Returns
    ///
    /// Returns `true` if the entry was stored.
    pub fn set(&self, key: String, value: Value, expiry: Option<Expiry>) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.get_shard(&key).write();
        store(&mut data, key, Slot { value, expiry })
    }

    /// Number of entries in the backing maps.
    ///
    /// This includes expired entries that have not been lazily evicted yet;
    /// the snapshot writer records it as a table-size hint.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Number of entries carrying an expiry, counted like [`Keyspace::size`].
    pub fn expires_size(&self) -> usize {
        count_entries(&self.read_all()).1
    }

    /// Returns every live entry, evicting expired ones as a side effect.
    pub fn enumerate(&self) -> Vec<Entry> {
        let mut guards = self.lock_all();
        self.collect_live(&mut guards)
    }

    /// Returns the live keys. Only the `*` pattern is supported, so no
    /// filtering happens here.
    pub fn keys(&self) -> Vec<String> {
        let mut guards = self.lock_all();
        self.evict_expired(&mut guards);
        guards
            .iter()
            .flat_map(|data| data.keys().cloned())
            .collect()
    }

    /// Takes a consistent view for persistence.
    ///
    /// `size` and `expires` are counted before eviction; `entries` holds only
    /// live keys. All shards stay locked for the whole scan.
    pub fn snapshot(&self) -> KeyspaceSnapshot {
        let mut guards = self.lock_all();
        let (size, expires) = count_entries(&guards);
        let entries = self.collect_live(&mut guards);

        KeyspaceSnapshot {
            size,
            expires,
            entries,
        }
    }

    /// Replaces the whole keyspace with `entries`.
    ///
    /// Entries that are already expired are skipped. Returns how many were
    /// stored.
    pub fn replace(&self, entries: Vec<Entry>) -> usize {
        let mut guards = self.lock_all();
        for data in guards.iter_mut() {
            data.clear();
        }

        let mut stored = 0;
        for entry in entries {
            let index = self.shard_index(&entry.key);
            let slot = Slot {
                value: entry.value,
                expiry: entry.expiry,
            };
            if store(&mut guards[index], entry.key, slot) {
                stored += 1;
            }
        }
        stored
    }

    /// Counters for `INFO`. Key counts include expired entries that have
    /// not been evicted yet.
    pub fn stats(&self) -> StorageStats {
        let (keys, expires) = count_entries(&self.read_all());

        StorageStats {
            keys,
            expires,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    fn evict_expired(&self, guards: &mut [RwLockWriteGuard<'_, ShardMap>]) {
        let mut evicted = 0u64;
        for data in guards.iter_mut() {
            let before = data.len();
            data.retain(|_, slot| !slot.is_expired());
            evicted += (before - data.len()) as u64;
        }
        if evicted > 0 {
            self.expired_count.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    fn collect_live(&self, guards: &mut [RwLockWriteGuard<'_, ShardMap>]) -> Vec<Entry> {
        self.evict_expired(guards);
        guards
            .iter()
            .flat_map(|data| {
                data.iter().map(|(key, slot)| Entry {
                    key: key.clone(),
                    value: slot.value.clone(),
                    expiry: slot.expiry,
                })
            })
            .collect()
    }
}

/// Counts `(entries, entries with an expiry)` across locked shards.
fn count_entries<G: Deref<Target = ShardMap>>(guards: &[G]) -> (usize, usize) {
    guards.iter().fold((0, 0), |(size, expires), data| {
        let with_expiry = data.values().filter(|slot| slot.expiry.is_some()).count();
        (size + data.len(), expires + with_expiry)
    })
}

/// Inserts `slot` under `key`, or evicts the key if the slot is already expired.
fn store(data: &mut ShardMap, key: String, slot: Slot) -> bool {
    if slot.is_expired() {
        data.remove(&key);
        return false;
    }
    data.insert(key, slot);
    true
}

//! Public index facade
//!
//! [`LippIndex`] owns the root pointer, the epoch manager, the two-key
//! recycle pool, and the build statistics. `insert`, `lookup` and `exists`
//! are safe under arbitrary multi-thread concurrency; `bulk_load` takes
//! `&mut self`; `verify` and `size_bytes` expect a quiescent index.

mod build;
mod node;
mod ops;
mod rebuild;

use std::mem;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;

use crate::config::LippConfig;
use crate::epoch::{EpochGuard, EpochManager};
use crate::key::{IndexKey, IndexValue};
use crate::sync::Restart;

use node::{destroy_tree, Item, Node, TwoKeyPool};

/// Running build statistics (atomic; written by builders and rebuilds).
#[derive(Default)]
pub(crate) struct BuildStats {
    pub fmcd_success: AtomicU64,
    pub fmcd_broken: AtomicU64,
    pub rebuilds: AtomicU64,
}

/// Snapshot of the index's build statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Bulk-built nodes whose FMCD fit succeeded
    pub fmcd_success_times: u64,
    /// Bulk-built nodes where FMCD aborted and the three-point fit was
    /// used instead
    pub fmcd_broken_times: u64,
    /// Completed adaptive subtree rebuilds
    pub num_rebuilds: u64,
}

/// Concurrent in-memory learned index.
///
/// Maps a numeric key type `K` to a `Copy` value type `V` through a tree
/// of linear-model nodes. See the crate documentation for an overview.
pub struct LippIndex<K: IndexKey, V: IndexValue> {
    root: AtomicPtr<Node<K, V>>,
    epoch: Arc<EpochManager>,
    pool: Arc<TwoKeyPool<K, V>>,
    config: LippConfig,
    stats: BuildStats,
}

// Safety: all shared state is guarded by per-node optimistic locks plus
// the epoch reclaimer; K and V are Send + Sync by trait bound.
unsafe impl<K: IndexKey, V: IndexValue> Send for LippIndex<K, V> {}
unsafe impl<K: IndexKey, V: IndexValue> Sync for LippIndex<K, V> {}

impl<K: IndexKey, V: IndexValue> LippIndex<K, V> {
    /// Create an empty index with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LippConfig::default())
    }

    /// Create an empty index with the given configuration.
    pub fn with_config(config: LippConfig) -> Self {
        if !config.quiet && config.use_fmcd {
            tracing::info!("FMCD model fitting enabled");
        }
        Self {
            root: AtomicPtr::new(build::build_none()),
            epoch: Arc::new(EpochManager::new()),
            pool: Arc::new(TwoKeyPool::new()),
            config,
            stats: BuildStats::default(),
        }
    }

    /// Acquire the scoped epoch guard every public operation runs under.
    fn pin(&self) -> EpochGuard<'_> {
        match self.epoch.enter() {
            Ok(guard) => guard,
            Err(err) => panic!("epoch protection unavailable: {err}"),
        }
    }

    /// Insert a key/value pair.
    ///
    /// Inserting a key that is already present is unsupported and aborts.
    pub fn insert(&self, key: K, value: V) {
        let guard = self.pin();
        let backoff = Backoff::new();
        loop {
            match self.try_insert(&guard, key, value) {
                Ok(()) => return,
                Err(Restart) => backoff.snooze(),
            }
        }
    }

    /// Insert a `(key, value)` pair.
    pub fn insert_entry(&self, entry: (K, V)) {
        self.insert(entry.0, entry.1);
    }

    /// Look up `key`, returning its value if present.
    pub fn lookup(&self, key: K) -> Option<V> {
        let _guard = self.pin();
        let backoff = Backoff::new();
        loop {
            match self.try_search(key) {
                Ok(found) => return found,
                Err(Restart) => backoff.snooze(),
            }
        }
    }

    /// Look up `key` without existence checks, trusting the prediction.
    ///
    /// Slightly faster than [`lookup`](LippIndex::lookup) because the
    /// emptiness and key-equality checks are skipped.
    ///
    /// # Safety
    ///
    /// `key` must currently be present in the index; looking up an absent
    /// key reads an unrelated or uninitialized slot.
    pub unsafe fn lookup_unchecked(&self, key: K) -> V {
        let _guard = self.pin();
        let backoff = Backoff::new();
        loop {
            match self.try_search_unchecked(key) {
                Ok(value) => return value,
                Err(Restart) => backoff.snooze(),
            }
        }
    }

    /// Whether `key` is present.
    pub fn exists(&self, key: K) -> bool {
        self.lookup(key).is_some()
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        // Safety: the root is always a valid node; `size` is atomic.
        unsafe {
            (*self.root.load(Ordering::Acquire))
                .size
                .load(Ordering::Relaxed)
        }
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the index contents with `pairs`, which must be strictly
    /// ascending by key.
    ///
    /// Must not run concurrently with any other operation (enforced by
    /// `&mut self`).
    pub fn bulk_load(&mut self, pairs: &[(K, V)]) {
        match pairs.len() {
            0 => {
                self.destroy_root();
                *self.root.get_mut() = build::build_none();
            }
            1 => {
                self.destroy_root();
                *self.root.get_mut() = build::build_none();
                self.insert(pairs[0].0, pairs[0].1);
            }
            2 => {
                self.destroy_root();
                let two = self.build_two(pairs[0].0, pairs[0].1, pairs[1].0, pairs[1].1);
                *self.root.get_mut() = two;
            }
            _ => {
                for window in pairs.windows(2) {
                    assert!(
                        window[0].0 < window[1].0,
                        "bulk_load requires strictly ascending keys"
                    );
                }
                let keys: Vec<K> = pairs.iter().map(|p| p.0).collect();
                let values: Vec<V> = pairs.iter().map(|p| p.1).collect();
                self.destroy_root();
                let new_root = self.build_bulk(&keys, &values);
                *self.root.get_mut() = new_root;
            }
        }
    }

    fn destroy_root(&mut self) {
        let root = *self.root.get_mut();
        // Safety: `&mut self` excludes concurrent operations.
        unsafe { destroy_tree(root, &self.pool) };
    }

    /// Check the structural invariants of the whole tree, panicking on
    /// any violation. Expects a quiescent index.
    pub fn verify(&self) {
        let mut stack = vec![self.root.load(Ordering::Acquire)];
        while let Some(ptr) = stack.pop() {
            // Safety: quiescent tree, all reachable nodes are live.
            unsafe {
                let node = &*ptr;
                let mut sum = 0usize;
                for i in 0..node.num_items {
                    if node.none_bitmap.get(i) {
                        assert!(
                            !node.child_bitmap.get(i),
                            "slot marked both empty and child"
                        );
                        continue;
                    }
                    if node.child_bitmap.get(i) {
                        let child = node.child_at(i);
                        sum += (*child).size.load(Ordering::Relaxed);
                        stack.push(child);
                    } else {
                        let entry = node.entry_at(i);
                        assert_eq!(
                            node.predict(entry.key),
                            i,
                            "leaf slot disagrees with the model prediction"
                        );
                        sum += 1;
                    }
                }
                assert_eq!(
                    sum,
                    node.size.load(Ordering::Relaxed),
                    "node size disagrees with its subtree"
                );
            }
        }
    }

    /// Heap footprint estimate in bytes. Expects a quiescent index.
    ///
    /// With `ignore_child` only nodes that exist are charged wholesale;
    /// `total` additionally charges every slot rather than only occupied
    /// child slots.
    pub fn size_bytes(&self, total: bool, ignore_child: bool) -> usize {
        let item_size = mem::size_of::<Item<K, V>>();
        let node_size = mem::size_of::<Node<K, V>>();

        let mut bytes = 0;
        let mut stack = vec![self.root.load(Ordering::Acquire)];
        while let Some(ptr) = stack.pop() {
            // Safety: quiescent tree.
            unsafe {
                let node = &*ptr;
                let mut counted_items = false;
                if !ignore_child {
                    bytes += node_size;
                }
                for i in 0..node.num_items {
                    if ignore_child {
                        bytes += item_size;
                        counted_items = true;
                    } else if total {
                        bytes += item_size;
                    }
                    if node.child_bitmap.get(i) {
                        if !total {
                            bytes += item_size;
                        }
                        stack.push(node.child_at(i));
                    }
                }
                if ignore_child && counted_items {
                    bytes += node_size;
                }
            }
        }
        bytes
    }

    /// Snapshot the build statistics.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            fmcd_success_times: self.stats.fmcd_success.load(Ordering::Relaxed),
            fmcd_broken_times: self.stats.fmcd_broken.load(Ordering::Relaxed),
            num_rebuilds: self.stats.rebuilds.load(Ordering::Relaxed),
        }
    }

    /// Log the build statistics.
    pub fn print_stats(&self) {
        let stats = self.stats();
        tracing::info!(
            fmcd_success_times = stats.fmcd_success_times,
            fmcd_broken_times = stats.fmcd_broken_times,
            num_rebuilds = stats.num_rebuilds,
            "index statistics"
        );
    }
}

impl<K: IndexKey, V: IndexValue> Default for LippIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IndexKey, V: IndexValue> Drop for LippIndex<K, V> {
    fn drop(&mut self) {
        self.destroy_root();
        // The epoch manager drains its deferred deleters when it drops;
        // the pool frees its recycled nodes last.
    }
}
